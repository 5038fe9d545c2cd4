//! Error types for kemono-sync
//!
//! A single [`Error`] enum covers every failure the library can surface:
//! - configuration and subject-store problems
//! - transport failures (timeouts, refused connections) from the HTTP session
//! - HTTP status failures carrying the status code for retry classification
//! - retry exhaustion, wrapping the last underlying cause

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kemono-sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kemono-sync
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure (timeout, connection refused, body read)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a status the caller cannot use
    #[error("HTTP {status} from {url}")]
    Http {
        /// Response status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A retryable operation kept failing until its attempt budget ran out
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Name of the wrapped operation (e.g., "fetch_post")
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// The last underlying failure
        #[source]
        source: Box<Error>,
    },

    /// A subject or media URL could not be understood
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A recurrence rule or filter rule is malformed
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// Subject not found in the store
    #[error("not found: {0}")]
    NotFound(String),

    /// Subject store could not be read or written
    #[error("subject store error at {path}: {reason}")]
    Store {
        /// Path of the backing file
        path: PathBuf,
        /// Why the operation failed
        reason: String,
    },

    /// Work was interrupted by shutdown
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convenience constructor for configuration errors tied to a key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// The HTTP status carried by this error, looking through retry wrappers
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            Error::RetriesExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}
