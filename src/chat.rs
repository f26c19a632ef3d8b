//! Reply dispatch to the chat platform (`chat.postMessage`).

use serde::{Deserialize, Serialize};

use crate::credentials::AccessCredential;
use crate::error::ChatError;
use crate::util::{join_segments, snippet, RequestContext};

pub const DEFAULT_CHAT_API_URL: &str = "https://slack.com/api";

/// One threaded reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub thread_ts: String,
    pub text: String,
}

#[async_trait::async_trait]
pub trait ReplyDispatcher: Send + Sync {
    async fn post(
        &self,
        credential: &AccessCredential,
        message: &OutboundMessage,
    ) -> Result<(), ChatError>;
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

pub struct SlackDispatcher {
    http: reqwest::Client,
    api_base: String,
}

impl SlackDispatcher {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }
}

#[async_trait::async_trait]
impl ReplyDispatcher for SlackDispatcher {
    async fn post(
        &self,
        credential: &AccessCredential,
        message: &OutboundMessage,
    ) -> Result<(), ChatError> {
        let url = join_segments(&self.api_base, &["chat.postMessage"])
            .ok_or_else(|| ChatError::InvalidUrl(self.api_base.clone()))?;
        let ctx = RequestContext::new(url).with_bearer(Some(credential.expose()));
        let response = ctx
            .apply(self.http.post(ctx.url.clone()))
            .json(message)
            .send()
            .await
            .map_err(ChatError::Transport)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(ChatError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: snippet(&body, 300),
            });
        }

        let parsed: PostMessageResponse = response.json().await.map_err(ChatError::Decode)?;
        if !parsed.ok {
            return Err(ChatError::Api(
                parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}
