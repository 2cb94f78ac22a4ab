//! Error types for the deployment client

use thiserror::Error;

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by the orchestrator's collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The job API rejected a request
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Unknown job id
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Ledger RPC failure or rejected transaction
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Wallet refused or failed to sign
    #[error("Wallet error: {0}")]
    Wallet(String),

    /// Subscription stream broke before a terminal event
    #[error("Subscription error: {0}")]
    Stream(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Reading or writing the persisted job id failed
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else {
            ClientError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Persistence(err.to_string())
    }
}
