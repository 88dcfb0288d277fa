//! Configuration types for taskline

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Worker pool configuration
///
/// One worker is always alive; additional workers are spawned on demand up to
/// `max_workers` and reaped after `keep_alive` without work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently running worker threads (default: 4)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Idle time after which a worker beyond the first exits (default: 15 seconds)
    #[serde(default = "default_keep_alive", with = "duration_serde")]
    pub keep_alive: Duration,

    /// Worker thread name prefix (default: "taskline-worker")
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            keep_alive: default_keep_alive(),
            thread_name: default_thread_name(),
        }
    }
}

/// File cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cache files (default: "./cache")
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Cache file extension without the leading dot (default: "cache")
    #[serde(default = "default_cache_extension")]
    pub extension: String,

    /// Whether the connector reads and writes the cache at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            extension: default_cache_extension(),
            enabled: true,
        }
    }
}

/// Response body buffering configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Bytes read from the transport per chunk (default: 4096)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Upper bound on buffer pre-allocation from Content-Length (default: 1 MiB)
    ///
    /// A server-announced size only sizes the initial buffer up to this limit;
    /// larger bodies still grow the buffer as they arrive.
    #[serde(default = "default_max_prealloc")]
    pub max_prealloc_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_prealloc_bytes: default_max_prealloc(),
        }
    }
}

/// Settings for the default reqwest-based transport
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Follow 3xx redirects (default: true)
    #[serde(default = "default_true")]
    pub follow_redirects: bool,

    /// Maximum redirects followed before giving up (default: 10)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            follow_redirects: true,
            max_redirects: default_max_redirects(),
        }
    }
}

/// Retry configuration
///
/// Serialized form of [`RetryPolicy`]; converting it validates the values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 10)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Multiplier for exponential backoff, must exceed 1.0 (default: 1.5)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Wait before the first retry (default: 1000 milliseconds)
    #[serde(default = "default_base_wait", with = "duration_ms_serde")]
    pub base_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            base_wait: default_base_wait(),
        }
    }
}

/// Main configuration for taskline
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// File cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Body buffering settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Default transport settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry policy applied to requests that do not carry their own
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Check every section for values the runtime cannot honor
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_workers == 0 {
            return Err(Error::config(
                "scheduler.max_workers",
                "at least one worker is required",
            ));
        }
        if self.scheduler.keep_alive.is_zero() {
            return Err(Error::config(
                "scheduler.keep_alive",
                "keep-alive must be greater than zero",
            ));
        }
        if self.stream.chunk_size == 0 {
            return Err(Error::config(
                "stream.chunk_size",
                "chunk size must be greater than zero",
            ));
        }
        if self.cache.extension.is_empty() || self.cache.extension.contains(['.', '/', '\\']) {
            return Err(Error::config(
                "cache.extension",
                format!(
                    "extension must be non-empty and contain no dots or separators, got {:?}",
                    self.cache.extension
                ),
            ));
        }
        self.default_retry_policy()?;
        Ok(())
    }

    /// The validated default retry policy
    pub fn default_retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::try_from(self.retry.clone())
    }
}

// Default value functions
fn default_max_workers() -> usize {
    4
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(15)
}

fn default_thread_name() -> String {
    "taskline-worker".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_cache_extension() -> String {
    "cache".to_string()
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    4096
}

fn default_max_prealloc() -> usize {
    1024 * 1024
}

fn default_user_agent() -> String {
    format!("taskline/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_redirects() -> usize {
    10
}

fn default_max_retries() -> u32 {
    10
}

fn default_backoff_multiplier() -> f64 {
    1.5
}

fn default_base_wait() -> Duration {
    Duration::from_millis(1000)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
