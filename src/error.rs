//! Error types for transistor
//!
//! This module provides the crate-wide error enum. Errors fall into a few groups:
//! - Configuration errors, raised while a [`Manager`](crate::Manager) is being built
//! - Transport errors (network, I/O, timeouts) raised by a rendering session
//! - Errors raised while a worker drives one task (scraper, export)
//! - Broker errors raised by the stream consumer
//!
//! Transient upstream faults (overloaded, upstream timeout) are never errors: the
//! [`RetryableSession`](crate::session::RetryableSession) absorbs them and hands the
//! last response back to the caller.

use thiserror::Error;

/// Result type alias for transistor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for transistor
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pool_size")
        key: Option<String>,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A local deadline elapsed before the remote endpoint answered
    #[error("timed out: {0}")]
    Timeout(String),

    /// A replay was requested but the session never sent a request
    #[error("the current page is not refreshable: no request has been sent")]
    NotRefreshable,

    /// Scraper-specific failure while driving a task
    #[error("scraper error: {0}")]
    Scraper(String),

    /// Exporting or persisting items failed
    #[error("export error: {0}")]
    Export(String),

    /// A broker message could not be decoded into tasks
    #[error("decode error: {0}")]
    Decode(String),

    /// Message broker failure (connect, receive, acknowledge)
    #[error("broker error: {0}")]
    Broker(String),

    /// Every worker retired while tasks were still pending or could still arrive
    #[error("run stalled: no live workers remain and {pending} task(s) are pending")]
    Stalled {
        /// Number of tasks left in matched tracker queues
        pending: usize,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error for the given key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Returns true if this error is a transport-level timeout
    ///
    /// A rendering session converts these into a synthetic response carrying
    /// [`TIMEOUT_SENTINEL_STATUS`](crate::session::TIMEOUT_SENTINEL_STATUS) instead of
    /// propagating them.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout(),
            Error::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            Error::Timeout(_) => true,
            _ => false,
        }
    }
}
