//! Retry logic with exponential backoff
//!
//! This module provides the validated [`RetryPolicy`], the classification of
//! transport failures into retryable and non-retryable kinds, and a blocking
//! retry loop used by connections running on scheduler workers.
//!
//! The backoff before retry `n` (0-indexed) is always `base * multiplier^n`,
//! recomputed from the configured base rather than compounded from the
//! previous wait. No jitter is applied.
//!
//! Backoff sleeps happen on the calling thread. When that thread is a
//! scheduler worker it is unavailable to the pool for the whole wait, so heavy
//! concurrent retrying can starve the pool.
//!
//! # Example
//!
//! ```
//! use taskline::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, 2.0, Duration::from_millis(100)).unwrap();
//! assert_eq!(policy.next_backoff(0), Duration::from_millis(100));
//! assert_eq!(policy.next_backoff(1), Duration::from_millis(200));
//! assert_eq!(policy.next_backoff(2), Duration::from_millis(400));
//! ```

use crate::config::RetryConfig;
use crate::error::{ConnectError, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Granularity at which a backoff sleep re-checks the cancel flag
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Validated exponential backoff parameters
///
/// Construction fails for `backoff_multiplier <= 1.0` or a zero base wait, so
/// an invalid policy can never reach a retry loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RetryConfig", into = "RetryConfig")]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_multiplier: f64,
    base_wait: Duration,
}

impl RetryPolicy {
    /// Create a policy, validating every parameter
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `backoff_multiplier` is not a finite value
    /// greater than 1.0, or `base_wait` is zero.
    pub fn new(max_retries: u32, backoff_multiplier: f64, base_wait: Duration) -> Result<Self> {
        if !backoff_multiplier.is_finite() || backoff_multiplier <= 1.0 {
            return Err(Error::config(
                "backoff_multiplier",
                format!("backoff multiplier must be greater than 1.0, got {backoff_multiplier}"),
            ));
        }
        if base_wait.is_zero() {
            return Err(Error::config(
                "base_wait",
                "base wait must be greater than zero",
            ));
        }
        Ok(Self {
            max_retries,
            backoff_multiplier,
            base_wait,
        })
    }

    /// A policy that performs exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            backoff_multiplier: 2.0,
            base_wait: Duration::from_millis(1),
        }
    }

    /// Maximum number of retries after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Exponential growth factor
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Wait before the first retry
    pub fn base_wait(&self) -> Duration {
        self.base_wait
    }

    /// Wait before retry `attempt` (0-indexed), derived from the configured base
    pub fn next_backoff(&self, attempt: u32) -> Duration {
        let ms = next_backoff_ms(
            attempt,
            self.base_wait.as_millis() as u64,
            self.backoff_multiplier,
        );
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_retries: config.max_retries,
            backoff_multiplier: config.backoff_multiplier,
            base_wait: config.base_wait,
        }
    }
}

impl TryFrom<RetryConfig> for RetryPolicy {
    type Error = Error;

    fn try_from(config: RetryConfig) -> Result<Self> {
        RetryPolicy::new(config.max_retries, config.backoff_multiplier, config.base_wait)
    }
}

impl From<RetryPolicy> for RetryConfig {
    fn from(policy: RetryPolicy) -> Self {
        RetryConfig {
            max_retries: policy.max_retries,
            backoff_multiplier: policy.backoff_multiplier,
            base_wait: policy.base_wait,
        }
    }
}

/// `base * multiplier^attempt`, saturating at `u64::MAX` milliseconds
pub fn next_backoff_ms(attempt: u32, base_ms: u64, multiplier: f64) -> u64 {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let wait = base_ms as f64 * multiplier.powi(exponent);
    if wait.is_finite() && wait < u64::MAX as f64 {
        wait as u64
    } else {
        u64::MAX
    }
}

/// How a failure should be treated by the retry loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credentials rejected; needs an external re-auth step
    Authentication,
    /// Transient failure; retry after backoff
    Retryable,
    /// Everything else; give up immediately
    Fatal,
}

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (5xx, connection timeouts, resets) should return `true`.
/// Permanent failures (authentication rejected, not found, undecodable body)
/// should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ConnectError {
    fn is_retryable(&self) -> bool {
        matches!(self, ConnectError::Server { .. })
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Connect(e) => e.is_retryable(),
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => is_transient_io(e.kind()),
            _ => false,
        }
    }
}

/// Classify an HTTP status code
///
/// 401/403 are authentication failures, 5xx and 408 are retryable, anything
/// else is fatal. 2xx never reaches this function.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 => ErrorClass::Authentication,
        408 | 500..=599 => ErrorClass::Retryable,
        _ => ErrorClass::Fatal,
    }
}

impl ConnectError {
    /// Build the classified error for a non-success HTTP status
    pub fn from_status(url: &str, status: u16) -> Self {
        let url = url.to_string();
        if status == 404 {
            return ConnectError::NotFound { url };
        }
        match classify_status(status) {
            ErrorClass::Authentication => ConnectError::Authentication { url, status },
            ErrorClass::Retryable => ConnectError::Server {
                url,
                status: Some(status),
                reason: format!("HTTP {status}"),
            },
            ErrorClass::Fatal => ConnectError::Fatal {
                url,
                status: Some(status),
                reason: format!("HTTP {status}"),
            },
        }
    }

    /// Classification of this error for the retry loop
    pub fn class(&self) -> ErrorClass {
        match self {
            ConnectError::Authentication { .. } => ErrorClass::Authentication,
            ConnectError::Server { .. } => ErrorClass::Retryable,
            ConnectError::NotFound { .. } | ConnectError::Fatal { .. } => ErrorClass::Fatal,
        }
    }
}

/// Map a low-level transport failure onto the classified taxonomy
///
/// Already-classified errors, cancellation and decode errors pass through
/// unchanged; client and I/O errors become [`ConnectError::Server`] when
/// transient and [`ConnectError::Fatal`] otherwise.
pub fn classify_transport_error(url: &str, error: Error) -> Error {
    match error {
        Error::Connect(_) | Error::Canceled | Error::Decode(_) => error,
        other => {
            let reason = other.to_string();
            let status = match &other {
                Error::Network(e) => e.status().map(|s| s.as_u16()),
                _ => None,
            };
            if let Some(status) = status {
                return Error::Connect(ConnectError::from_status(url, status));
            }
            let classified = if other.is_retryable() {
                ConnectError::Server {
                    url: url.to_string(),
                    status: None,
                    reason,
                }
            } else {
                ConnectError::Fatal {
                    url: url.to_string(),
                    status: None,
                    reason,
                }
            };
            Error::Connect(classified)
        }
    }
}

fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::UnexpectedEof
    )
}

/// Execute a blocking operation with exponential backoff retry logic
///
/// `operation` receives the 0-indexed attempt number. Retryable errors are
/// retried up to `policy.max_retries()` times; a non-retryable error ends the
/// loop immediately. `is_canceled` is polled before each attempt and during
/// each backoff sleep: once it reports true the loop stops with
/// [`Error::Canceled`] instead of starting another attempt. An attempt already
/// in progress is never interrupted.
///
/// # Returns
///
/// The first successful result, or the last error once retries are exhausted.
pub fn retry_blocking<T, F, C>(policy: &RetryPolicy, is_canceled: C, mut operation: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
    C: Fn() -> bool,
{
    let mut attempt = 0;

    loop {
        if is_canceled() {
            tracing::debug!(attempt = attempt, "Task canceled before attempt");
            return Err(Error::Canceled);
        }
        match operation(attempt) {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Attempt succeeded after backoff");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries() => {
                let delay = policy.next_backoff(attempt);
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = policy.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off"
                );

                if !sleep_unless_canceled(delay, &is_canceled) {
                    tracing::debug!(attempt = attempt, "Retry abandoned, task canceled");
                    return Err(Error::Canceled);
                }
            }
            Err(e) => {
                let exhausted = e.is_retryable();
                tracing::warn!(error = %e, attempts = attempt + 1, exhausted, "Giving up");
                return Err(e);
            }
        }
    }
}

/// Sleep for `delay`, waking early if canceled. Returns false when canceled.
fn sleep_unless_canceled<C: Fn() -> bool>(delay: Duration, is_canceled: &C) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if is_canceled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL_INTERVAL));
    }
}
