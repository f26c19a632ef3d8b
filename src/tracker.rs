//! Tracker client: project prefixes and issue lookups against the YouTrack
//! REST API.

use futures_util::future::join_all;
use serde::Deserialize;

use crate::error::TrackerError;
use crate::extract::{IssueKey, ProjectPrefixSet};
use crate::util::{join_segments, snippet, RequestContext};

const ISSUE_FIELDS: &str = "summary,description,idReadable";
const PROJECT_FIELDS: &str = "shortName";

/// Display fields of one issue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIssue {
    pub key: IssueKey,
    pub display_id: String,
    pub summary: String,
    pub description: String,
}

/// Read access to the issue tracker.
#[async_trait::async_trait]
pub trait IssueTracker: Send + Sync {
    async fn project_prefixes(&self) -> Result<ProjectPrefixSet, TrackerError>;
    async fn resolve(&self, key: &IssueKey) -> Result<ResolvedIssue, TrackerError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueFields {
    id_readable: Option<String>,
    summary: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFields {
    short_name: Option<String>,
}

pub struct YouTrackClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl YouTrackClient {
    /// `api_base` is the REST root, e.g. `https://yt.example.com/youtrack/api`.
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            token,
        }
    }

    fn context(&self, segments: &[&str], fields: &str) -> Result<RequestContext, TrackerError> {
        let mut url = join_segments(&self.api_base, segments)
            .ok_or_else(|| TrackerError::InvalidUrl(self.api_base.clone()))?;
        url.query_pairs_mut().append_pair("fields", fields);
        Ok(RequestContext::new(url).with_bearer(self.token.as_deref()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        ctx: RequestContext,
    ) -> Result<T, TrackerError> {
        let request = ctx.apply(self.http.get(ctx.url.clone()));
        let response = request.send().await.map_err(TrackerError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::Status {
                status: status.as_u16(),
                body: snippet(&body, 300),
            });
        }
        response.json::<T>().await.map_err(TrackerError::Decode)
    }
}

#[async_trait::async_trait]
impl IssueTracker for YouTrackClient {
    async fn project_prefixes(&self) -> Result<ProjectPrefixSet, TrackerError> {
        let ctx = self.context(&["admin", "projects"], PROJECT_FIELDS)?;
        let projects: Vec<ProjectFields> = self.get_json(ctx).await?;
        Ok(ProjectPrefixSet::new(
            projects.into_iter().filter_map(|p| p.short_name),
        ))
    }

    async fn resolve(&self, key: &IssueKey) -> Result<ResolvedIssue, TrackerError> {
        let ctx = self.context(&["issues", key.as_str()], ISSUE_FIELDS)?;
        let fields: IssueFields = self.get_json(ctx).await?;
        Ok(ResolvedIssue {
            key: key.clone(),
            display_id: fields
                .id_readable
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| key.to_string()),
            summary: fields.summary.unwrap_or_default(),
            description: fields.description.unwrap_or_default(),
        })
    }
}

/// Resolve every key concurrently. Each key settles on its own: a failed
/// lookup is logged and comes back as `None`, siblings are unaffected.
pub async fn resolve_all(
    tracker: &dyn IssueTracker,
    keys: &[IssueKey],
) -> Vec<(IssueKey, Option<ResolvedIssue>)> {
    let lookups = keys.iter().map(|key| async move {
        match tracker.resolve(key).await {
            Ok(issue) => (key.clone(), Some(issue)),
            Err(err) => {
                tracing::warn!(
                    key = %key,
                    status = ?err.status(),
                    error = %err,
                    "error retrieving issue from tracker"
                );
                (key.clone(), None)
            }
        }
    });
    join_all(lookups).await
}
