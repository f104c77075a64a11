//! Defines the custom error type for the `shard-kit` crate.

use thiserror::Error;

/// The main error type for the `shard-kit` crate.
///
/// Variants map to the failure classes callers are expected to branch on:
/// malformed input, missing records, strict-mode collisions, cryptographic
/// failures, persistence failures and remote-config failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Cryptographic failure. The message is intentionally generic so callers
    /// cannot distinguish a wrong key from corrupted data.
    #[error("{context}")]
    Crypto {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("store failure: {0}")]
    Store(String),

    #[error("config failure: {0}")]
    Config(String),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decoding from Base64 failed: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl Error {
    /// A cryptographic failure with no underlying cause.
    pub fn crypto(context: impl Into<String>) -> Self {
        Error::Crypto {
            context: context.into(),
            source: None,
        }
    }

    /// A cryptographic failure wrapping the error that caused it.
    pub fn crypto_with(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Crypto {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
