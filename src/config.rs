use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::chat::DEFAULT_CHAT_API_URL;
use crate::format::DEFAULT_MAX_CHARS;
use crate::pipeline::DEFAULT_SPAM_THRESHOLD;
use crate::telemetry::RotationConfig;

pub const DEFAULT_PORT: u16 = 3000;

/// Whose token replies are posted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAuthMode {
    /// Look up the mentioning user's own token.
    PerUser,
    /// Post everything with the app-level `CHAT_AUTH` token.
    App,
}

#[derive(Clone)]
pub struct AppConfig {
    /// Tracker web root; the REST API lives under `{tracker_url}/api`.
    pub tracker_url: String,
    pub tracker_auth: Option<String>,
    pub chat_api_url: String,
    pub chat_auth: Option<String>,
    pub chat_auth_mode: ChatAuthMode,
    pub credentials_file: Option<PathBuf>,
    pub spam_threshold: usize,
    pub message_max_chars: usize,
    pub prefix_cache_ttl: Option<Duration>,
    pub http_timeout: Option<Duration>,
    pub process_retries: bool,
    pub port: u16,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("tracker_url", &self.tracker_url)
            .field("tracker_auth", &self.tracker_auth.as_ref().map(|_| "<redacted>"))
            .field("chat_api_url", &self.chat_api_url)
            .field("chat_auth", &self.chat_auth.as_ref().map(|_| "<redacted>"))
            .field("chat_auth_mode", &self.chat_auth_mode)
            .field("credentials_file", &self.credentials_file)
            .field("spam_threshold", &self.spam_threshold)
            .field("message_max_chars", &self.message_max_chars)
            .field("prefix_cache_ttl", &self.prefix_cache_ttl)
            .field("http_timeout", &self.http_timeout)
            .field("process_retries", &self.process_retries)
            .field("port", &self.port)
            .field("log_file", &self.log_file)
            .field("rotation", &self.rotation)
            .field("log_stdout", &self.log_stdout)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let tracker_url = parse_string_env("ISSUELINK_TRACKER_URL")
            .ok_or_else(|| anyhow!("ISSUELINK_TRACKER_URL must be set to the tracker root url"))?
            .trim_end_matches('/')
            .to_string();
        let tracker_auth = parse_string_env("TRACKER_AUTH");
        let chat_api_url = parse_string_env("ISSUELINK_CHAT_API_URL")
            .unwrap_or_else(|| DEFAULT_CHAT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let chat_auth = parse_string_env("CHAT_AUTH");

        let chat_auth_mode = match parse_string_env("ISSUELINK_CHAT_AUTH_MODE")
            .map(|m| m.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("user") => ChatAuthMode::PerUser,
            Some("app") => ChatAuthMode::App,
            Some(other) => bail!(
                "ISSUELINK_CHAT_AUTH_MODE must be 'user' or 'app' (got '{}')",
                other
            ),
        };
        if chat_auth_mode == ChatAuthMode::App && chat_auth.is_none() {
            bail!("CHAT_AUTH must be set when ISSUELINK_CHAT_AUTH_MODE=app");
        }

        let credentials_file = parse_string_env("ISSUELINK_CREDENTIALS_FILE").map(PathBuf::from);

        let spam_threshold = parse_optional_u64("ISSUELINK_SPAM_THRESHOLD")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_SPAM_THRESHOLD);
        let message_max_chars = parse_optional_u64("ISSUELINK_MESSAGE_MAX_CHARS")?
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_CHARS);
        if message_max_chars < 4 {
            bail!("ISSUELINK_MESSAGE_MAX_CHARS must be at least 4");
        }
        let prefix_cache_ttl = parse_optional_u64("ISSUELINK_PREFIX_CACHE_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let http_timeout = parse_optional_u64("ISSUELINK_HTTP_TIMEOUT_MS")?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let process_retries = parse_bool_env("ISSUELINK_PROCESS_RETRIES")?.unwrap_or(false);

        let port = match parse_optional_u64("PORT")? {
            Some(p) => u16::try_from(p).map_err(|_| anyhow!("PORT must be between 0 and 65535"))?,
            None => DEFAULT_PORT,
        };

        let log_file = parse_string_env("LOG_FILE");
        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };
        let log_stdout = parse_bool_env("ISSUELINK_LOG_STDOUT")?.unwrap_or(false);

        Ok(Self {
            tracker_url,
            tracker_auth,
            chat_api_url,
            chat_auth,
            chat_auth_mode,
            credentials_file,
            spam_threshold,
            message_max_chars,
            prefix_cache_ttl,
            http_timeout,
            process_retries,
            port,
            log_file,
            rotation,
            log_stdout,
        })
    }

    /// REST root of the tracker.
    pub fn tracker_api_url(&self) -> String {
        format!("{}/api", self.tracker_url)
    }
}

fn parse_string_env(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "ISSUELINK_TRACKER_URL",
        "TRACKER_AUTH",
        "ISSUELINK_CHAT_API_URL",
        "CHAT_AUTH",
        "ISSUELINK_CHAT_AUTH_MODE",
        "ISSUELINK_CREDENTIALS_FILE",
        "ISSUELINK_SPAM_THRESHOLD",
        "ISSUELINK_MESSAGE_MAX_CHARS",
        "ISSUELINK_PREFIX_CACHE_TTL_SECS",
        "ISSUELINK_HTTP_TIMEOUT_MS",
        "ISSUELINK_PROCESS_RETRIES",
        "PORT",
        "LOG_FILE",
        "LOG_MAX_BYTES",
        "LOG_ROTATE_KEEP",
        "LOG_ROTATE_COMPRESS",
        "ISSUELINK_LOG_STDOUT",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("ISSUELINK_TRACKER_URL", "https://yt.example.com/youtrack/");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.tracker_url, "https://yt.example.com/youtrack");
        assert_eq!(cfg.tracker_api_url(), "https://yt.example.com/youtrack/api");
        assert_eq!(cfg.chat_api_url, "https://slack.com/api");
        assert_eq!(cfg.chat_auth_mode, ChatAuthMode::PerUser);
        assert_eq!(cfg.spam_threshold, 10);
        assert_eq!(cfg.message_max_chars, 3000);
        assert!(cfg.prefix_cache_ttl.is_none());
        assert!(cfg.http_timeout.is_none());
        assert!(!cfg.process_retries);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.rotation.keep, 1);
        assert!(cfg.log_file.is_none());
        clear_env();
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("ISSUELINK_TRACKER_URL", "https://yt.example.com");
        std::env::set_var("TRACKER_AUTH", "perm:abc");
        std::env::set_var("ISSUELINK_CHAT_API_URL", "http://localhost:9000/api/");
        std::env::set_var("CHAT_AUTH", "xoxb-app");
        std::env::set_var("ISSUELINK_CHAT_AUTH_MODE", "APP");
        std::env::set_var("ISSUELINK_SPAM_THRESHOLD", "4");
        std::env::set_var("ISSUELINK_MESSAGE_MAX_CHARS", "500");
        std::env::set_var("ISSUELINK_PREFIX_CACHE_TTL_SECS", "60");
        std::env::set_var("ISSUELINK_HTTP_TIMEOUT_MS", "2500");
        std::env::set_var("ISSUELINK_PROCESS_RETRIES", "yes");
        std::env::set_var("PORT", "8081");
        std::env::set_var("LOG_FILE", "/tmp/runs.jsonl");
        std::env::set_var("LOG_MAX_BYTES", "1024");
        std::env::set_var("LOG_ROTATE_KEEP", "3");
        std::env::set_var("LOG_ROTATE_COMPRESS", "true");
        std::env::set_var("ISSUELINK_LOG_STDOUT", "1");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.tracker_auth.as_deref(), Some("perm:abc"));
        assert_eq!(cfg.chat_api_url, "http://localhost:9000/api");
        assert_eq!(cfg.chat_auth_mode, ChatAuthMode::App);
        assert_eq!(cfg.spam_threshold, 4);
        assert_eq!(cfg.message_max_chars, 500);
        assert_eq!(cfg.prefix_cache_ttl, Some(Duration::from_secs(60)));
        assert_eq!(cfg.http_timeout, Some(Duration::from_millis(2500)));
        assert!(cfg.process_retries);
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.log_file.as_deref(), Some("/tmp/runs.jsonl"));
        assert_eq!(cfg.rotation.max_bytes, Some(1024));
        assert_eq!(cfg.rotation.keep, 3);
        assert!(cfg.rotation.compress);
        assert!(cfg.log_stdout);
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("perm:abc"));
        assert!(!rendered.contains("xoxb-app"));
        clear_env();
    }

    #[test]
    fn app_mode_requires_chat_auth() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("ISSUELINK_TRACKER_URL", "https://yt.example.com");
        std::env::set_var("ISSUELINK_CHAT_AUTH_MODE", "app");
        let err = AppConfig::from_env().unwrap_err();
        assert!(format!("{}", err).contains("CHAT_AUTH"));
        clear_env();
    }

    #[test]
    fn requires_tracker_url() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        let err = AppConfig::from_env().unwrap_err();
        assert!(format!("{}", err).contains("ISSUELINK_TRACKER_URL"));
    }

    #[test]
    fn rejects_tiny_message_cap() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("ISSUELINK_TRACKER_URL", "https://yt.example.com");
        std::env::set_var("ISSUELINK_MESSAGE_MAX_CHARS", "3");
        let err = AppConfig::from_env().unwrap_err();
        assert!(format!("{}", err).contains("ISSUELINK_MESSAGE_MAX_CHARS"));
        clear_env();
    }

    #[test]
    fn zero_is_accepted_and_negatives_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        std::env::set_var("ISSUELINK_TRACKER_URL", "https://yt.example.com");
        std::env::set_var("ISSUELINK_PREFIX_CACHE_TTL_SECS", "0");
        let cfg = AppConfig::from_env().unwrap();
        assert!(cfg.prefix_cache_ttl.is_none());

        std::env::set_var("ISSUELINK_PREFIX_CACHE_TTL_SECS", "-1");
        let err = AppConfig::from_env().unwrap_err().to_string();
        assert!(err.contains("ISSUELINK_PREFIX_CACHE_TTL_SECS"));
        assert!(err.contains("non-negative integer"));
        clear_env();
    }
}
