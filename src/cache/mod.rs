//! Content-addressed response cache
//!
//! Entries live as flat files named after a digest of the canonical request
//! signature. Freshness is checked lazily on read against the caller's TTL;
//! there is no background sweeper. Writes go through a temporary file that is
//! renamed over the entry on commit, so readers never see a partial body.

mod key;
mod store;

pub use key::CacheKey;
pub use store::{CacheEntry, CacheStore, CacheWriter, FileCacheStore};

use std::time::Duration;

/// One minute
pub const ONE_MINUTE: Duration = Duration::from_secs(60);
/// One hour
pub const ONE_HOUR: Duration = Duration::from_secs(60 * 60);
/// One day
pub const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);
/// One week
pub const ONE_WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Four weeks
pub const ONE_MONTH: Duration = Duration::from_secs(4 * 7 * 24 * 60 * 60);
/// 365 days
pub const ONE_YEAR: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// How a request interacts with the cache
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    /// How long a stored body stays fresh; below [`CachePolicy::MIN_TTL`] the cache is bypassed
    pub ttl: Duration,

    /// Bodies larger than this are fetched but not stored
    pub max_item_bytes: u64,

    /// Request headers whose values take part in the cache key
    pub vary_headers: Vec<String>,
}

impl CachePolicy {
    /// Shortest TTL that enables caching
    pub const MIN_TTL: Duration = Duration::from_secs(1);

    /// Default upper bound on cached body size (1 MiB)
    pub const DEFAULT_MAX_ITEM_BYTES: u64 = 1024 * 1024;

    /// Never read or write the cache
    pub fn none() -> Self {
        Self {
            ttl: Duration::ZERO,
            max_item_bytes: Self::DEFAULT_MAX_ITEM_BYTES,
            vary_headers: Vec::new(),
        }
    }

    /// Cache bodies for `ttl`
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::none()
        }
    }

    /// Override the size limit for stored bodies
    pub fn with_max_item_bytes(mut self, max_item_bytes: u64) -> Self {
        self.max_item_bytes = max_item_bytes;
        self
    }

    /// Add a request header to the cache key
    pub fn vary(mut self, header: impl Into<String>) -> Self {
        self.vary_headers.push(header.into());
        self
    }

    /// True if the TTL is long enough for the cache to be consulted
    pub fn is_active(&self) -> bool {
        self.ttl >= Self::MIN_TTL
    }

    /// True if a body of `len` bytes may be stored
    pub fn admits(&self, len: u64) -> bool {
        len <= self.max_item_bytes
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::none()
    }
}
