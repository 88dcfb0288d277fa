//! One request/response exchange executed on a scheduler worker
//!
//! Flow: cache lookup, network fetch under the retry policy, digest, write
//! through to the cache, decode.

use super::decoder::Decoder;
use super::header::HttpHeader;
use super::request::ConnectRequest;
use super::stream::StreamBuffer;
use super::transport::Transport;
use crate::cache::{CacheKey, CacheStore};
use crate::error::{ConnectError, Error, Result};
use crate::retry::{ErrorClass, RetryPolicy, classify_transport_error, retry_blocking};
use crate::task::TaskContext;
use parking_lot::Mutex;
use std::sync::Arc;

/// Digest pair shared between a running connection and its result handle
#[derive(Clone, Debug, Default)]
pub(crate) struct Digests {
    /// Digest of the cached body, when a cache entry was found
    pub(crate) cache: Option<String>,
    /// Digest of the body the value was decoded from
    pub(crate) content: Option<String>,
}

/// Hook consulted once when a request fails authentication
pub trait AuthRecovery: Send + Sync {
    /// Return headers to merge into the request for a single re-attempt, or
    /// `None` to let the authentication error surface
    fn recover(&self, request: &ConnectRequest, error: &ConnectError) -> Option<HttpHeader>;
}

impl<F> AuthRecovery for F
where
    F: Fn(&ConnectRequest, &ConnectError) -> Option<HttpHeader> + Send + Sync,
{
    fn recover(&self, request: &ConnectRequest, error: &ConnectError) -> Option<HttpHeader> {
        self(request, error)
    }
}

pub(crate) struct Connection<T> {
    pub(crate) request: ConnectRequest,
    pub(crate) decoder: Arc<dyn Decoder<T>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cache: Option<Arc<dyn CacheStore>>,
    pub(crate) stream: StreamBuffer,
    pub(crate) retry: RetryPolicy,
    pub(crate) auth: Option<Arc<dyn AuthRecovery>>,
    pub(crate) digests: Arc<Mutex<Digests>>,
}

impl<T> Connection<T> {
    pub(crate) fn run(self, ctx: &TaskContext<'_>) -> Result<T> {
        let key = self.request.cache_key();
        let cache = self
            .cache
            .as_deref()
            .filter(|_| self.request.cache_policy().is_active());

        if let Some(store) = cache {
            if let Some(value) = self.read_cached(store, &key) {
                return Ok(value);
            }
        }

        let body = match self.fetch_with_retry(ctx, &self.request, &key, cache) {
            Err(Error::Connect(error)) if error.class() == ErrorClass::Authentication => {
                self.recover_auth(ctx, &key, cache, error)?
            }
            other => other?,
        };

        self.decoder.decode(&body)
    }

    /// Decoded cached value, if a fresh entry exists and decodes
    fn read_cached(&self, store: &dyn CacheStore, key: &CacheKey) -> Option<T> {
        let policy = self.request.cache_policy();
        let entry = match store.read(key, policy.ttl) {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        {
            let mut digests = self.digests.lock();
            digests.cache = Some(entry.digest.clone());
            digests.content = Some(entry.digest.clone());
        }

        match self.decoder.decode(&entry.body) {
            Ok(value) => {
                tracing::debug!(url = %self.request.url(), "Served from cache");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Cached body failed to decode, fetching from network"
                );
                self.digests.lock().content = None;
                None
            }
        }
    }

    fn recover_auth(
        &self,
        ctx: &TaskContext<'_>,
        key: &CacheKey,
        cache: Option<&dyn CacheStore>,
        error: ConnectError,
    ) -> Result<Vec<u8>> {
        let Some(auth) = self.auth.as_ref() else {
            return Err(error.into());
        };
        let Some(replacement) = auth.recover(&self.request, &error) else {
            tracing::debug!(url = %self.request.url(), "Auth recovery declined");
            return Err(error.into());
        };

        tracing::info!(url = %self.request.url(), "Retrying with recovered credentials");
        let mut request = self.request.clone();
        request.header_mut().extend_from(&replacement);
        self.fetch_with_retry(ctx, &request, key, cache)
    }

    fn fetch_with_retry(
        &self,
        ctx: &TaskContext<'_>,
        request: &ConnectRequest,
        key: &CacheKey,
        cache: Option<&dyn CacheStore>,
    ) -> Result<Vec<u8>> {
        let policy = request.retry_policy().unwrap_or(&self.retry);
        retry_blocking(policy, || ctx.is_canceled(), |attempt| {
            tracing::trace!(
                task = %ctx.id(),
                url = %request.url(),
                attempt = attempt,
                "Fetching"
            );
            self.fetch_once(request, key, cache)
        })
    }

    fn fetch_once(
        &self,
        request: &ConnectRequest,
        key: &CacheKey,
        cache: Option<&dyn CacheStore>,
    ) -> Result<Vec<u8>> {
        let url = request.url().as_str();
        let mut response = self
            .transport
            .execute(request)
            .map_err(|e| classify_transport_error(url, e))?;

        if !response.is_success() {
            return Err(ConnectError::from_status(url, response.status).into());
        }

        let policy = request.cache_policy();
        let expected = response.header.content_full_size();
        let mut writer = match cache {
            Some(store) if expected.is_none_or(|len| policy.admits(len)) => {
                match store.open_writer(key) {
                    Ok(writer) => Some(writer),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Could not open cache writer");
                        None
                    }
                }
            }
            _ => None,
        };

        let buffered = self
            .stream
            .read_all(
                response.body.as_mut(),
                expected,
                writer.as_deref_mut(),
                policy.max_item_bytes,
            )
            .map_err(|e| classify_transport_error(url, Error::Io(e)))?;

        self.digests.lock().content = Some(buffered.digest.clone());

        if let Some(writer) = writer {
            if buffered.tee_complete {
                // A failed commit still returns the fetched body
                if let Err(e) = writer.commit() {
                    tracing::warn!(key = %key, error = %e, "Cache commit failed");
                }
            } else {
                writer.abort();
            }
        }

        tracing::debug!(
            url = %url,
            bytes = buffered.body.len(),
            digest = %buffered.digest,
            "Fetched from network"
        );
        Ok(buffered.body)
    }
}
