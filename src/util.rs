//! Utility helpers shared by the outbound clients.
//!
//! Outbound calls never rely on process-wide header state: each call builds
//! a `RequestContext` carrying its own target URL and authorization, and
//! applies it to the shared `reqwest::Client`.

use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Url};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Everything one outbound request needs besides its body.
#[derive(Clone)]
pub struct RequestContext {
    pub url: Url,
    pub authorization: Option<String>,
    pub content_type: &'static str,
}

impl RequestContext {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            authorization: None,
            content_type: JSON_CONTENT_TYPE,
        }
    }

    /// Attach a bearer credential. Tokens that already carry a `Bearer`
    /// scheme are used verbatim.
    pub fn with_bearer(mut self, token: Option<&str>) -> Self {
        self.authorization = token.map(bearer_header);
        self
    }

    /// Apply headers to a request built for `self.url`.
    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        match &self.authorization {
            Some(value) => builder.header(AUTHORIZATION, value.as_str()),
            None => builder,
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("url", &self.url.as_str())
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Format a token as an `Authorization` header value.
pub fn bearer_header(token: &str) -> String {
    let token = token.trim();
    let has_scheme = token
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("bearer "));
    if has_scheme && token.len() > 7 {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

/// Parse a base URL and append path segments to it, encoding each segment.
/// Returns `None` for URLs that cannot carry a path (e.g. `mailto:`).
pub fn join_segments(base: &str, segments: &[&str]) -> Option<Url> {
    let mut url = Url::parse(base.trim_end_matches('/')).ok()?;
    {
        let mut path = url.path_segments_mut().ok()?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Some(url)
}

/// Build the HTTP client shared by the tracker and chat clients.
pub fn http_client(timeout: Option<Duration>) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Truncate an error body for log output.
pub fn snippet(body: &str, max_chars: usize) -> String {
    let mut out: String = body.chars().take(max_chars).collect();
    if body.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
