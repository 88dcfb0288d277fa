//! Connector facade wiring the scheduler, transport, cache and buffering

use super::connection::{AuthRecovery, Connection, Digests};
use super::decoder::Decoder;
use super::request::ConnectRequest;
use super::stream::StreamBuffer;
use super::transport::{ReqwestTransport, Transport};
use crate::cache::{CachePolicy, CacheStore, FileCacheStore};
use crate::config::Config;
use crate::error::{Result, TaskResult};
use crate::retry::RetryPolicy;
use crate::task::{Dispatcher, ImmediateDispatcher, Scheduler, TaskContext, TaskHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Submits requests to a scheduler and hands back [`ConnectResult`]s
///
/// # Example
///
/// ```no_run
/// use taskline::{Config, Connector, ConnectRequest, TextDecoder, ImmediateDispatcher};
/// use taskline::cache::ONE_HOUR;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn main() -> taskline::Result<()> {
/// let connector = Connector::new(Config::default(), Arc::new(ImmediateDispatcher))?;
/// let request = ConnectRequest::get("https://example.com/feed.json")?.with_ttl(ONE_HOUR);
/// let result = connector.connect(request, TextDecoder)?;
///
/// let body = result.wait(Duration::from_secs(30)).expect("request failed");
/// if result.is_content_modified() {
///     println!("fresh content: {} bytes", body.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Connector {
    scheduler: Arc<Scheduler>,
    transport: Arc<dyn Transport>,
    cache: Option<Arc<dyn CacheStore>>,
    stream: StreamBuffer,
    retry: RetryPolicy,
    auth: Option<Arc<dyn AuthRecovery>>,
}

impl Connector {
    /// Connector with its own scheduler, the reqwest transport and the file cache from `config`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for invalid settings, or
    /// [`Error::Io`](crate::Error::Io) if the cache directory or first worker
    /// cannot be created.
    pub fn new(config: Config, dispatcher: Arc<dyn Dispatcher>) -> Result<Self> {
        Self::builder(config).dispatcher(dispatcher).build()
    }

    /// Start a builder to swap individual collaborators
    pub fn builder(config: Config) -> ConnectorBuilder {
        ConnectorBuilder {
            config,
            dispatcher: None,
            scheduler: None,
            transport: None,
            cache: None,
            auth: None,
        }
    }

    /// Queue `request` behind already submitted work
    pub fn connect<T, D>(&self, request: ConnectRequest, decoder: D) -> Result<ConnectResult<T>>
    where
        T: Clone + Send + 'static,
        D: Decoder<T> + 'static,
    {
        self.submit(false, request, Arc::new(decoder))
    }

    /// Queue `request` ahead of everything already queued
    pub fn connect_urgent<T, D>(
        &self,
        request: ConnectRequest,
        decoder: D,
    ) -> Result<ConnectResult<T>>
    where
        T: Clone + Send + 'static,
        D: Decoder<T> + 'static,
    {
        self.submit(true, request, Arc::new(decoder))
    }

    /// GET `url`, caching the body for `ttl`
    pub fn get<T, D>(&self, url: &str, decoder: D, ttl: Duration) -> Result<ConnectResult<T>>
    where
        T: Clone + Send + 'static,
        D: Decoder<T> + 'static,
    {
        let request = ConnectRequest::get(url)?.with_cache(CachePolicy::ttl(ttl));
        self.connect(request, decoder)
    }

    fn submit<T>(
        &self,
        front: bool,
        request: ConnectRequest,
        decoder: Arc<dyn Decoder<T>>,
    ) -> Result<ConnectResult<T>>
    where
        T: Clone + Send + 'static,
    {
        let digests = Arc::new(Mutex::new(Digests::default()));
        let method = request.method();
        let url = request.url().to_string();

        let connection = Connection {
            request,
            decoder,
            transport: self.transport.clone(),
            cache: self.cache.clone(),
            stream: self.stream.clone(),
            retry: self.retry.clone(),
            auth: self.auth.clone(),
            digests: digests.clone(),
        };
        let task = move |ctx: &TaskContext<'_>| connection.run(ctx);

        let handle = if front {
            self.scheduler.push_front(task)?
        } else {
            self.scheduler.push_back(task)?
        };

        tracing::debug!(
            task = %handle.id(),
            method = %method,
            url = %url,
            urgent = front,
            "Connection queued"
        );
        Ok(ConnectResult { handle, digests })
    }

    /// Delete every cached entry. Returns the number of files removed.
    pub fn clear_cache(&self) -> Result<usize> {
        match &self.cache {
            Some(cache) => cache.clear(),
            None => Ok(0),
        }
    }

    /// Delete cached entries older than `max_age`
    pub fn purge_cache(&self, max_age: Duration) -> Result<usize> {
        match &self.cache {
            Some(cache) => cache.purge(max_age),
            None => Ok(0),
        }
    }

    /// The cache store, if caching is enabled
    pub fn cache_store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }

    /// The scheduler executing connections
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Retry policy used for requests without their own
    pub fn default_retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("scheduler", &self.scheduler)
            .field("cache", &self.cache.is_some())
            .field("stream", &self.stream)
            .field("retry", &self.retry)
            .field("auth", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Connector`]
#[must_use]
pub struct ConnectorBuilder {
    config: Config,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    scheduler: Option<Arc<Scheduler>>,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Option<Arc<dyn CacheStore>>>,
    auth: Option<Arc<dyn AuthRecovery>>,
}

impl ConnectorBuilder {
    /// Where listener callbacks run (default: [`ImmediateDispatcher`])
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Share an existing scheduler instead of creating one
    pub fn scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Replace the reqwest transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the file cache store
    pub fn cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(Some(cache));
        self
    }

    /// Run without any cache
    pub fn without_cache(mut self) -> Self {
        self.cache = Some(None);
        self
    }

    /// Install an authentication recovery hook
    pub fn auth_recovery(mut self, auth: Arc<dyn AuthRecovery>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Validate the configuration and assemble the connector
    pub fn build(self) -> Result<Connector> {
        self.config.validate()?;
        let retry = self.config.default_retry_policy()?;

        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => {
                let dispatcher: Arc<dyn Dispatcher> = match self.dispatcher {
                    Some(dispatcher) => dispatcher,
                    None => Arc::new(ImmediateDispatcher),
                };
                Arc::new(Scheduler::new(self.config.scheduler.clone(), dispatcher)?)
            }
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.http.clone())),
        };

        let cache: Option<Arc<dyn CacheStore>> = match self.cache {
            Some(cache) => cache,
            None if self.config.cache.enabled => {
                Some(Arc::new(FileCacheStore::from_config(&self.config.cache)?))
            }
            None => None,
        };

        tracing::info!(
            max_workers = self.config.scheduler.max_workers,
            cache = cache.is_some(),
            max_retries = retry.max_retries(),
            "Connector ready"
        );

        Ok(Connector {
            scheduler,
            transport,
            cache,
            stream: StreamBuffer::from_config(&self.config.stream),
            retry,
            auth: self.auth,
        })
    }
}

/// Handle to a submitted connection plus its cache/staleness metadata
pub struct ConnectResult<T> {
    handle: TaskHandle<T>,
    digests: Arc<Mutex<Digests>>,
}

impl<T> Clone for ConnectResult<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            digests: self.digests.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ConnectResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let digests = self.digests.lock();
        f.debug_struct("ConnectResult")
            .field("handle", &self.handle)
            .field("cache_digest", &digests.cache)
            .field("content_digest", &digests.content)
            .finish()
    }
}

impl<T> ConnectResult<T> {
    /// False only when a cached copy exists and matches the delivered content
    pub fn is_content_modified(&self) -> bool {
        let digests = self.digests.lock();
        match &digests.cache {
            None => true,
            Some(cache) => digests.content.as_ref() != Some(cache),
        }
    }

    /// True if a fresh cache entry was found for the request
    pub fn has_cache(&self) -> bool {
        self.digests.lock().cache.is_some()
    }

    /// True once a body (cached or fetched) has been digested
    pub fn has_content(&self) -> bool {
        self.digests.lock().content.is_some()
    }

    /// Digest of the cached body, if any
    pub fn cache_digest(&self) -> Option<String> {
        self.digests.lock().cache.clone()
    }

    /// Digest of the body the value came from
    pub fn content_digest(&self) -> Option<String> {
        self.digests.lock().content.clone()
    }

    /// Request cancellation; see [`TaskHandle::cancel`]
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// True once [`cancel`](Self::cancel) has been called
    pub fn is_canceled(&self) -> bool {
        self.handle.is_canceled()
    }

    /// True once the connection has a terminal outcome
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Underlying task handle
    pub fn handle(&self) -> &TaskHandle<T> {
        &self.handle
    }
}

impl<T: Clone + Send + 'static> ConnectResult<T> {
    /// Register a completion listener; see [`TaskHandle::set_listener`]
    pub fn set_listener<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(TaskResult<T>) + Send + 'static,
    {
        self.handle.set_listener(listener);
        self
    }

    /// Block until the connection finishes or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> TaskResult<T> {
        self.handle.wait(timeout)
    }

    /// Block until the connection finishes
    pub fn join(&self) -> TaskResult<T> {
        self.handle.join()
    }

    /// Await the outcome from async code
    pub async fn completion(&self) -> TaskResult<T> {
        self.handle.completion().await
    }
}
