//! Error types for pool deployment primitives

use thiserror::Error;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while building, splitting, signing or attesting
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed input (bad address, empty token, unknown network)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Not enough full-rights signers to form a custody pair
    #[error("Insufficient quorum: {required} full-rights signers required, found {found}")]
    InsufficientQuorum { required: usize, found: usize },

    /// Signature or witness does not match the authorization root
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// A signer or key is not part of the structure being queried
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cryptographic error
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<ed25519_dalek::SignatureError> for CoreError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        CoreError::Crypto(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for CoreError {
    fn from(err: base64::DecodeError) -> Self {
        CoreError::Validation(format!("Invalid base64 encoding: {}", err))
    }
}

impl From<chacha20poly1305::Error> for CoreError {
    fn from(_: chacha20poly1305::Error) -> Self {
        CoreError::Crypto("AEAD operation failed".into())
    }
}
