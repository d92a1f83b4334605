//! Error types for the bridge.

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur in bridge operations.
///
/// Errors are `Clone` because a single failure settles every pending call of
/// a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// Network error (connection, timeout, unreadable body).
    #[error("network error: {0}")]
    Network(String),

    /// Protocol error (response does not match the exchange format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The server denied access (401, 403 or an access-denied error payload).
    #[error("access denied ({status}): {message}")]
    AccessDenied {
        status: u16,
        error_type: Option<String>,
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The action exists only as server-delivered source text.
    #[error("action `{0}` has no client implementation")]
    RejectedAction(String),

    /// A native action returned an error.
    #[error("action `{action}` failed: {reason}")]
    Action { action: String, reason: String },

    /// A definition failed validation.
    #[error("invalid definition: {0}")]
    Definition(String),

    /// The bridge or transport is misconfigured.
    #[error("configuration error: {0}")]
    Config(String),

    /// Router navigation failed.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The bridge owning an entity was dropped.
    #[error("bridge is gone")]
    Detached,

    /// The batch was dropped before it settled.
    #[error("batch dropped before completion")]
    Dropped,
}

impl BridgeError {
    /// Whether this error came from an access-control denial.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<flow_model::ModelError> for BridgeError {
    fn from(err: flow_model::ModelError) -> Self {
        match err {
            flow_model::ModelError::Serialization(e) => Self::Serialization(e.to_string()),
            other => Self::Definition(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
