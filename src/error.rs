//! Error types for the outbound tracker and chat calls.
//!
//! Every failure here is scoped to one call (one issue lookup, one reply).
//! The pipeline logs them and moves on; none of them reach the webhook
//! response.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid tracker url '{0}'")]
    InvalidUrl(String),

    #[error("tracker request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("tracker responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("tracker response could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),
}

impl TrackerError {
    /// HTTP status of the failed call, when the tracker answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            TrackerError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid chat api url '{0}'")]
    InvalidUrl(String),

    #[error("chat request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("chat platform rate limited the request (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("chat platform responded {status}: {body}")]
    Status { status: u16, body: String },

    #[error("chat platform rejected the message: {0}")]
    Api(String),

    #[error("chat response could not be decoded: {0}")]
    Decode(#[source] reqwest::Error),
}
