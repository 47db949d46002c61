//! Error types for the proxy pool.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for proxy pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur while maintaining or consuming the pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// A directory source could not be reached or answered with an error.
    #[error("Failed to fetch source '{url}': {reason}")]
    SourceFetch { url: String, reason: String },

    /// A probe through an endpoint did not confirm liveness.
    #[error("Probe through {endpoint} failed: {reason}")]
    ProbeFailure { endpoint: String, reason: String },

    /// No endpoint became available before the checkout deadline.
    #[error("No proxy available within {0:?}")]
    CheckoutTimeout(Duration),

    /// Every attempt to obtain a working endpoint failed.
    #[error("Proxy pool exhausted after {0} attempts")]
    PoolExhausted(u32),

    /// Unexpected fault inside a maintenance cycle.
    #[error("Maintenance cycle failed: {0}")]
    MaintenanceCycle(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// An endpoint string could not be parsed.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl PoolError {
    /// Returns true for the expected "nothing available yet" outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::CheckoutTimeout(_))
    }
}
