//! Error types for the ingestion worker.

use crate::retry::IsRetryable;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Fetch failures, split by whether retrying can help.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Timeouts, connection failures, 5xx and 429 responses. Worth
    /// retrying with backoff.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Bad URLs, other 4xx responses, unreadable paths. Retrying the
    /// same request yields the same failure.
    #[error("permanent fetch error: {0}")]
    Permanent(String),
}

impl FetchError {
    /// Classify a reqwest error. Request construction problems (bad URL,
    /// bad header) are permanent; network failures and timeouts are
    /// transient.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_builder() {
            FetchError::Permanent(err.to_string())
        } else {
            FetchError::Transient(err.to_string())
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, url: &str) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            FetchError::Transient(format!("{url} returned {status}"))
        } else {
            FetchError::Permanent(format!("{url} returned {status}"))
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Errors that can occur during an ingestion cycle.
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch error.
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] nimbus_store::StoreError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload parsing error (the whole body, not a single record).
    #[error("payload error: {0}")]
    Payload(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the next cycle should back off exponentially rather than
    /// wait the regular poll interval. Storage and transient fetch
    /// failures tend to clear on their own; the rest need intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Fetch(fetch) => fetch.is_retryable(),
            Error::Store(_) | Error::Io(_) => true,
            Error::Payload(_) | Error::Config(_) => false,
        }
    }
}
