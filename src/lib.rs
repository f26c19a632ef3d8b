//! Core library for issuelink. This module wires the chat webhook to the
//! message-processing pipeline and exposes the HTTP router.
//!
//! The webhook is acknowledged immediately; the pipeline runs on a spawned
//! task so that slow tracker or chat calls never delay the response the
//! chat platform is waiting for.

mod config;
pub mod chat;
pub mod credentials;
pub mod error;
pub mod extract;
pub mod fanout;
pub mod format;
pub mod metrics;
pub mod pipeline;
pub mod telemetry;
pub mod tracker;
pub mod util;

pub use config::{AppConfig, ChatAuthMode};

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::chat::SlackDispatcher;
use crate::credentials::{AppTokenStore, CredentialStore, UserTokenStore};
use crate::format::MessageFormatter;
use crate::metrics::Metrics;
use crate::pipeline::{Pipeline, PipelineSettings, RunOutcome};
use crate::telemetry::{RotatingWriter, RunLog, RunRecord};
use crate::tracker::YouTrackClient;

pub use crate::chat::{OutboundMessage, ReplyDispatcher};
pub use crate::credentials::AccessCredential;
pub use crate::extract::{extract_issue_keys, IssueKey, ProjectPrefixSet};
pub use crate::pipeline::ChatEvent;
pub use crate::tracker::{IssueTracker, ResolvedIssue};

/// Header the chat platform adds when it re-delivers an event it considers
/// unacknowledged.
pub const RETRY_HEADER: &str = "x-slack-retry-num";

const GREETING: &str = "Hello! Mention an issue key in a channel and I'll reply with its summary.";

/// Webhook payload as seen at the boundary. Anything beyond `event` and
/// `challenge` is ignored.
#[derive(Debug, Default)]
pub struct WebhookEnvelope {
    pub event: Option<serde_json::Value>,
    /// Echoed as sent, whatever its JSON type.
    pub challenge: Option<serde_json::Value>,
}

impl WebhookEnvelope {
    /// Never fails: a body that is not a JSON object yields an empty
    /// envelope, which short-circuits to the acknowledgement.
    pub fn parse(body: &[u8]) -> Self {
        let Ok(serde_json::Value::Object(mut map)) = serde_json::from_slice::<serde_json::Value>(body) else {
            return Self::default();
        };
        let challenge = map.remove("challenge").filter(|c| !c.is_null());
        let event = map.remove("event").filter(|e| !e.is_null());
        Self { event, challenge }
    }
}

/// Webhook response body. `challenge` is omitted when the request had none.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct WebhookAck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<serde_json::Value>,
}

/// Shared application state handed to each handler.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub metrics: Arc<Metrics>,
    pub run_log: RunLog,
    /// Run the pipeline for platform re-deliveries too.
    pub process_retries: bool,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            metrics: Arc::new(Metrics::new()),
            run_log: RunLog::default(),
            process_retries: false,
        }
    }

    /// Run the pipeline for one event and record the outcome.
    pub async fn process(&self, event: Option<serde_json::Value>) -> RunOutcome {
        let channel = event
            .as_ref()
            .and_then(|e| e.get("channel"))
            .and_then(|c| c.as_str())
            .map(str::to_owned);
        let start = Instant::now();
        let outcome = self.pipeline.run(event).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        self.metrics.record_outcome(&outcome, latency_ms);
        if self.run_log.is_enabled() {
            let record = RunRecord::new(channel.as_deref(), &outcome, latency_ms);
            if !self.run_log.emit(&record) {
                self.metrics.record_run_log_error();
            }
        }
        outcome
    }
}

/// Build state from environment variables (see `AppConfig::from_env`).
pub async fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    build_state(&config)
}

pub fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    use anyhow::Context;

    let http = util::http_client(config.http_timeout).context("failed to build http client")?;

    let tracker = Arc::new(YouTrackClient::new(
        http.clone(),
        config.tracker_api_url(),
        config.tracker_auth.clone(),
    ));
    let dispatcher = Arc::new(SlackDispatcher::new(http, config.chat_api_url.clone()));

    let credentials: Arc<dyn CredentialStore> = match config.chat_auth_mode {
        ChatAuthMode::App => {
            let token = config
                .chat_auth
                .clone()
                .context("CHAT_AUTH must be set when ISSUELINK_CHAT_AUTH_MODE=app")?;
            Arc::new(AppTokenStore::new(token))
        }
        ChatAuthMode::PerUser => match &config.credentials_file {
            Some(path) => {
                let store = UserTokenStore::from_file(path)?;
                tracing::info!(users = store.len(), "loaded user credentials");
                Arc::new(store)
            }
            None => {
                tracing::warn!(
                    "ISSUELINK_CREDENTIALS_FILE not set; no user has a credential and no replies will be sent"
                );
                Arc::new(UserTokenStore::default())
            }
        },
    };

    let formatter = MessageFormatter::new(config.tracker_url.clone(), config.message_max_chars);
    let settings = PipelineSettings {
        spam_threshold: config.spam_threshold,
        prefix_cache_ttl: config.prefix_cache_ttl,
    };
    let pipeline = Pipeline::new(tracker, dispatcher, credentials, formatter, settings);

    let writer = match config.log_file.as_deref() {
        Some(path) => match RotatingWriter::open(path, config.rotation.clone()) {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "failed to open LOG_FILE; run log disabled");
                None
            }
        },
        None => None,
    };

    let mut state = AppState::new(pipeline);
    state.run_log = RunLog::new(writer, config.log_stdout);
    state.process_retries = config.process_retries;
    Ok(state)
}

/// Build the Axum router and attach handlers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler).post(webhook_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root_handler() -> &'static str {
    GREETING
}

/// Chat platform event webhook. Always answers `200` with the echoed
/// challenge, whatever the payload or the pipeline's fate.
async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    state.metrics.record_event();
    let envelope = WebhookEnvelope::parse(&body);
    let ack = WebhookAck {
        challenge: envelope.challenge,
    };

    if let Some(retry) = headers.get(RETRY_HEADER).and_then(|v| v.to_str().ok()) {
        if !state.process_retries {
            tracing::debug!(retry_num = %retry, "acknowledging platform retry without processing");
            state.metrics.record_retry_ignored();
            return (StatusCode::OK, Json(ack)).into_response();
        }
    }

    match envelope.event {
        Some(event) => {
            let task_state = state.clone();
            tokio::spawn(async move {
                task_state.process(Some(event)).await;
            });
        }
        None => {
            state.process(None).await;
        }
    }

    (StatusCode::OK, Json(ack)).into_response()
}

async fn healthz_handler(State(state): State<AppState>) -> axum::response::Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "spamThreshold": state.pipeline.settings().spam_threshold,
        "messageMaxChars": state.pipeline.formatter().max_chars(),
    });
    (StatusCode::OK, Json(json)).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> axum::response::Response {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.metrics.render(),
    )
        .into_response()
}
