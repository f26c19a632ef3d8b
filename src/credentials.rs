//! Credential lookup: which token a reply is posted with.
//!
//! Two deployment shapes exist. Per-user tokens (stored after each user
//! installs the app) make replies appear as the mentioning user; a single
//! app-level token posts every reply as the app.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Opaque access token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessCredential(String);

impl AccessCredential {
    pub fn new(token: impl Into<String>) -> Self {
        AccessCredential(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessCredential(<redacted>)")
    }
}

/// Maps a chat user id to the credential replies are posted with. Lookups
/// are read-only and may run concurrently.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(&self, user_id: &str) -> Option<AccessCredential>;
}

/// One stored user token, as written by the install flow.
#[derive(Debug, Deserialize)]
pub struct StoredToken {
    pub user_id: String,
    pub access_token: String,
}

/// Per-user tokens held in memory.
#[derive(Default)]
pub struct UserTokenStore {
    tokens: HashMap<String, AccessCredential>,
}

impl UserTokenStore {
    pub fn new<I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = StoredToken>,
    {
        let tokens = tokens
            .into_iter()
            .filter(|t| !t.user_id.trim().is_empty() && !t.access_token.trim().is_empty())
            .map(|t| (t.user_id, AccessCredential::new(t.access_token)))
            .collect();
        Self { tokens }
    }

    /// Load a JSON array of `{"user_id", "access_token"}` records.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read ISSUELINK_CREDENTIALS_FILE '{}': file unreadable",
                path.display()
            )
        })?;
        let tokens: Vec<StoredToken> = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse ISSUELINK_CREDENTIALS_FILE '{}': expected a JSON array of {{user_id, access_token}}",
                path.display()
            )
        })?;
        Ok(Self::new(tokens))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait::async_trait]
impl CredentialStore for UserTokenStore {
    async fn lookup(&self, user_id: &str) -> Option<AccessCredential> {
        self.tokens.get(user_id).cloned()
    }
}

/// Every user resolves to the same app-level token.
pub struct AppTokenStore {
    token: AccessCredential,
}

impl AppTokenStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessCredential::new(token),
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for AppTokenStore {
    async fn lookup(&self, _user_id: &str) -> Option<AccessCredential> {
        Some(self.token.clone())
    }
}
