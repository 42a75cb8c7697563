//! Error types for the coordination core.
//!
//! Rejections (debounced, duplicate content) are not errors; see
//! `completion::CompletionOutcome`.

use thiserror::Error;

/// Failures talking to the shared key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Failures submitting a completion to the enrichment pipeline.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("enrichment pipeline not configured")]
    NotConfigured,
    #[error("enrichment request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("enrichment pipeline returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("enrichment pipeline returned an unusable response: {0}")]
    BadResponse(String),
}

/// Failures in the result relay loop.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to subscribe to {channel}: {reason}")]
    Subscribe { channel: String, reason: String },
    #[error("result channel closed")]
    ChannelClosed,
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Failure delivering a message to one observer.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("observer disconnected")]
    Closed,
    #[error("observer outbound queue full")]
    Backpressure,
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}
