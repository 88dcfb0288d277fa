//! Error types for taskline
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] - the crate-wide error returned by fallible operations and tasks
//! - [`ConnectError`] - classified transport failures (authentication, server, fatal)
//! - [`TaskError`] - the cloneable terminal error recorded in a task handle

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for taskline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type observed through a task handle
pub type TaskResult<T> = std::result::Result<T, TaskError>;

/// Main error type for taskline
///
/// Tasks submitted to a [`Scheduler`](crate::Scheduler) return this error type;
/// the scheduler wraps it into a [`TaskError`] when recording the outcome.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration or policy construction error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "backoff_multiplier")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Low-level HTTP client error (classified into [`ConnectError`] before reaching callers)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL could not be parsed or uses an unsupported scheme
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Classified connection failure
    #[error("connection error: {0}")]
    Connect(#[from] ConnectError),

    /// Response body could not be decoded into the requested type
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The task observed its cancel flag and stopped
    #[error("task canceled")]
    Canceled,

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::Config`] for the given key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Classified failure of a single request/response exchange
///
/// Transport errors and non-2xx statuses are mapped onto these variants before
/// they reach the caller, so the caller never sees a raw client error.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    /// 401/403-class response; not retried, handled by an auth recovery hook
    #[error("authentication failed for {url} (HTTP {status})")]
    Authentication {
        /// Request URL
        url: String,
        /// HTTP status returned by the server
        status: u16,
    },

    /// 5xx response or connection-level timeout; retried per policy
    #[error("server error for {url}: {reason}")]
    Server {
        /// Request URL
        url: String,
        /// HTTP status, if a response was received at all
        status: Option<u16>,
        /// What went wrong
        reason: String,
    },

    /// The resource does not exist (HTTP 404); retrying cannot help
    #[error("resource not found: {url}")]
    NotFound {
        /// Request URL
        url: String,
    },

    /// Anything else; not retried
    #[error("request to {url} failed: {reason}")]
    Fatal {
        /// Request URL
        url: String,
        /// HTTP status, if a response was received at all
        status: Option<u16>,
        /// What went wrong
        reason: String,
    },
}

impl ConnectError {
    /// HTTP status attached to the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ConnectError::Authentication { status, .. } => Some(*status),
            ConnectError::Server { status, .. } | ConnectError::Fatal { status, .. } => *status,
            ConnectError::NotFound { .. } => Some(404),
        }
    }

    /// URL of the failed request
    pub fn url(&self) -> &str {
        match self {
            ConnectError::Authentication { url, .. }
            | ConnectError::Server { url, .. }
            | ConnectError::NotFound { url }
            | ConnectError::Fatal { url, .. } => url,
        }
    }
}

/// Terminal error recorded in a [`TaskHandle`](crate::TaskHandle)
///
/// Cloneable so the same outcome can be handed to every waiter and to the
/// listener.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task was canceled before it started, or stopped after observing its cancel flag
    #[error("task canceled")]
    Canceled,

    /// A wait deadline elapsed before the task reached a terminal state
    #[error("timed out after {0:?} waiting for task")]
    Timeout(Duration),

    /// The scheduler shut down while the task was still queued
    #[error("scheduler shut down before the task ran")]
    ShutDown,

    /// The task panicked; the payload message is preserved
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task returned an error
    #[error("task failed: {0}")]
    Failed(Arc<Error>),
}

impl TaskError {
    /// The underlying task error, if the task itself failed
    pub fn error(&self) -> Option<&Error> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// The classified connection error, if the task failed with one
    pub fn connect_error(&self) -> Option<&ConnectError> {
        match self.error() {
            Some(Error::Connect(e)) => Some(e),
            _ => None,
        }
    }

    /// True for [`TaskError::Canceled`]
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }

    /// True for [`TaskError::Timeout`]
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout(_))
    }
}

impl From<Error> for TaskError {
    fn from(e: Error) -> Self {
        match e {
            Error::Canceled => TaskError::Canceled,
            other => TaskError::Failed(Arc::new(other)),
        }
    }
}
