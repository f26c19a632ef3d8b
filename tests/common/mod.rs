#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use issuelink::telemetry::RotationConfig;
use issuelink::{AppConfig, ChatAuthMode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// One request seen by a mock server.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Recorded>>>);

impl Recorder {
    fn push(&self, uri: &Uri, headers: &HeaderMap, body: Option<Value>) {
        let authorization = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        self.0.lock().unwrap().push(Recorded {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_owned),
            authorization,
            body,
        });
    }

    pub fn all(&self) -> Vec<Recorded> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn paths(&self) -> Vec<String> {
        self.all().into_iter().map(|r| r.path).collect()
    }

    /// Texts of every posted chat message, in arrival order.
    pub fn texts(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|r| r.body)
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()).map(str::to_owned))
            .collect()
    }
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Tracker double serving `/api/admin/projects` and `/api/issues/:key`.
pub struct MockTracker {
    pub url: String,
    pub recorder: Recorder,
}

#[derive(Clone)]
struct TrackerState {
    recorder: Recorder,
    projects: Arc<Value>,
    project_status: StatusCode,
    issues: Arc<HashMap<String, Value>>,
}

impl MockTracker {
    /// `issues` maps an upper-case key to its JSON body; any other key is a 404.
    pub async fn start(projects: &[&str], issues: &[(&str, Value)]) -> Self {
        Self::start_with_status(projects, issues, StatusCode::OK).await
    }

    pub async fn start_with_status(
        projects: &[&str],
        issues: &[(&str, Value)],
        project_status: StatusCode,
    ) -> Self {
        let recorder = Recorder::default();
        let state = TrackerState {
            recorder: recorder.clone(),
            projects: Arc::new(Value::Array(
                projects
                    .iter()
                    .map(|p| json!({"shortName": p, "$type": "Project"}))
                    .collect(),
            )),
            project_status,
            issues: Arc::new(
                issues
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            ),
        };
        let router = Router::new()
            .route("/api/admin/projects", get(tracker_projects))
            .route("/api/issues/:key", get(tracker_issue))
            .with_state(state);
        let url = serve(router).await;
        Self { url, recorder }
    }

    pub fn project_fetches(&self) -> usize {
        self.recorder
            .paths()
            .iter()
            .filter(|p| p.as_str() == "/api/admin/projects")
            .count()
    }

    pub fn issue_fetches(&self) -> Vec<String> {
        self.recorder
            .paths()
            .into_iter()
            .filter_map(|p| p.strip_prefix("/api/issues/").map(str::to_owned))
            .collect()
    }
}

async fn tracker_projects(
    State(state): State<TrackerState>,
    uri: Uri,
    headers: HeaderMap,
) -> axum::response::Response {
    state.recorder.push(&uri, &headers, None);
    if !state.project_status.is_success() {
        return (state.project_status, "tracker unavailable").into_response();
    }
    Json((*state.projects).clone()).into_response()
}

async fn tracker_issue(
    State(state): State<TrackerState>,
    Path(key): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> axum::response::Response {
    state.recorder.push(&uri, &headers, None);
    match state.issues.get(&key) {
        Some(body) => Json(body.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Not Found", "error_description": "Entity with id not found"})),
        )
            .into_response(),
    }
}

/// How the chat double answers `chat.postMessage`.
#[derive(Clone, Debug)]
pub enum ChatBehavior {
    Ok,
    /// `{"ok": false, "error": ...}` with HTTP 200.
    ApiError(&'static str),
    RateLimited,
    /// HTTP 500 for messages whose text contains the marker, ok otherwise.
    FailWhenTextContains(&'static str),
}

pub struct MockChat {
    pub url: String,
    pub recorder: Recorder,
}

#[derive(Clone)]
struct ChatState {
    recorder: Recorder,
    behavior: ChatBehavior,
}

impl MockChat {
    pub async fn start(behavior: ChatBehavior) -> Self {
        let recorder = Recorder::default();
        let state = ChatState {
            recorder: recorder.clone(),
            behavior,
        };
        let router = Router::new()
            .route("/chat.postMessage", post(chat_post_message))
            .with_state(state);
        let url = serve(router).await;
        Self { url, recorder }
    }
}

async fn chat_post_message(
    State(state): State<ChatState>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let text = body
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    state.recorder.push(&uri, &headers, Some(body));
    match state.behavior {
        ChatBehavior::Ok => Json(json!({"ok": true, "ts": "1700000000.000200"})).into_response(),
        ChatBehavior::ApiError(code) => Json(json!({"ok": false, "error": code})).into_response(),
        ChatBehavior::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "30")],
            Json(json!({"ok": false, "error": "ratelimited"})),
        )
            .into_response(),
        ChatBehavior::FailWhenTextContains(marker) if text.contains(marker) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response()
        }
        ChatBehavior::FailWhenTextContains(_) => Json(json!({"ok": true})).into_response(),
    }
}

/// Config pointing at the two doubles, posting with an app token.
pub fn config_for(tracker: &MockTracker, chat: &MockChat) -> AppConfig {
    AppConfig {
        tracker_url: tracker.url.clone(),
        tracker_auth: Some("perm:tracker-token".to_string()),
        chat_api_url: chat.url.clone(),
        chat_auth: Some("xoxb-app-token".to_string()),
        chat_auth_mode: ChatAuthMode::App,
        credentials_file: None,
        spam_threshold: 10,
        message_max_chars: 3000,
        prefix_cache_ttl: None,
        http_timeout: Some(Duration::from_secs(5)),
        process_retries: false,
        port: 0,
        log_file: None,
        rotation: RotationConfig::default(),
        log_stdout: false,
    }
}

/// Build a webhook body around one message event.
pub fn message_payload(text: &str) -> Value {
    json!({
        "type": "event_callback",
        "event": {
            "type": "message",
            "text": text,
            "channel": "C123",
            "ts": "1700000000.000100",
            "user": "U1"
        }
    })
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
