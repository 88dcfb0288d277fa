//! Request model: method, URL, headers, body source and policies

use super::header::{CONTENT_TYPE, HttpHeader};
use crate::cache::{CacheKey, CachePolicy};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default connect timeout (10 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read timeout (10 seconds)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Content type used for form bodies
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// HTTP method
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// HEAD
    Head,
    /// DELETE
    Delete,
    /// PUT
    Put,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Delete => "DELETE",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can produce a request body, possibly more than once
///
/// Retries reopen the source for every attempt.
pub trait ContentSource: Send + Sync {
    /// Open a fresh reader over the body
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;
}

struct BytesSource(Arc<[u8]>);

impl ContentSource for BytesSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(io::Cursor::new(self.0.clone())))
    }
}

struct FileSource(PathBuf);

impl ContentSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::fs::File::open(&self.0)?))
    }
}

/// Request body descriptor: `{length, content_type, open_stream()}`
#[derive(Clone)]
pub struct ConnectContent {
    length: Option<u64>,
    content_type: String,
    source: Arc<dyn ContentSource>,
}

impl ConnectContent {
    /// Body from a custom source
    pub fn from_source(
        length: Option<u64>,
        content_type: impl Into<String>,
        source: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            length,
            content_type: content_type.into(),
            source,
        }
    }

    /// In-memory body
    pub fn bytes(body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        let body: Vec<u8> = body.into();
        let body: Arc<[u8]> = body.into();
        Self {
            length: Some(body.len() as u64),
            content_type: content_type.into(),
            source: Arc::new(BytesSource(body)),
        }
    }

    /// Body streamed from a file; the length is taken from its metadata
    pub fn file(path: impl Into<PathBuf>, content_type: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let length = std::fs::metadata(&path)?.len();
        Ok(Self {
            length: Some(length),
            content_type: content_type.into(),
            source: Arc::new(FileSource(path)),
        })
    }

    /// `application/x-www-form-urlencoded` body
    pub fn form<K, V>(params: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::bytes(encode_pairs(params), FORM_CONTENT_TYPE)
    }

    /// Body length in bytes, if known
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// MIME type of the body
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Open a new reader over the body
    pub fn open_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        self.source.open()
    }
}

impl fmt::Debug for ConnectContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectContent")
            .field("length", &self.length)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// `k1=v1&k2=v2` with both sides percent-encoded
fn encode_pairs<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    params
        .iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                urlencoding::encode(k.as_ref()),
                urlencoding::encode(v.as_ref())
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// One request/response exchange
///
/// Built with the method constructors and `with_*` setters; immutable once
/// handed to a [`Connector`](crate::Connector).
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    method: Method,
    url: Url,
    header: HttpHeader,
    content: Option<ConnectContent>,
    cache_policy: CachePolicy,
    retry_policy: Option<RetryPolicy>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl ConnectRequest {
    /// Request with the given method
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` does not parse or is not http(s).
    pub fn new(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "{url}: unsupported scheme {:?}",
                url.scheme()
            )));
        }

        Ok(Self {
            method,
            url,
            header: HttpHeader::new(),
            content: None,
            cache_policy: CachePolicy::none(),
            retry_policy: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// GET request
    pub fn get(url: &str) -> Result<Self> {
        Self::new(Method::Get, url)
    }

    /// POST request
    pub fn post(url: &str) -> Result<Self> {
        Self::new(Method::Post, url)
    }

    /// HEAD request
    pub fn head(url: &str) -> Result<Self> {
        Self::new(Method::Head, url)
    }

    /// DELETE request
    pub fn delete(url: &str) -> Result<Self> {
        Self::new(Method::Delete, url)
    }

    /// PUT request
    pub fn put(url: &str) -> Result<Self> {
        Self::new(Method::Put, url)
    }

    /// Set a request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.put(name, value);
        self
    }

    /// Append url-encoded query parameters to the URL
    pub fn with_query<K, V>(mut self, params: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        if params.is_empty() {
            return self;
        }
        let encoded = encode_pairs(params);
        let query = match self.url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
            _ => encoded,
        };
        self.url.set_query(Some(&query));
        self
    }

    /// Send `params` as a form body
    pub fn with_form<K, V>(self, params: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.with_content(ConnectContent::form(params))
    }

    /// Send an in-memory body
    pub fn with_body(self, body: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        self.with_content(ConnectContent::bytes(body, content_type))
    }

    /// Stream a file as the body
    pub fn with_file(self, path: impl Into<PathBuf>, content_type: impl Into<String>) -> Result<Self> {
        Ok(self.with_content(ConnectContent::file(path, content_type)?))
    }

    /// Set the body source; also sets `Content-Type`
    pub fn with_content(mut self, content: ConnectContent) -> Self {
        self.header.put(CONTENT_TYPE, content.content_type());
        self.content = Some(content);
        self
    }

    /// Set the cache policy
    pub fn with_cache(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Cache the response for `ttl`
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_policy.ttl = ttl;
        self
    }

    /// Override the connector's default retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// Full URL including query
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request headers
    pub fn header(&self) -> &HttpHeader {
        &self.header
    }

    /// Mutable request headers
    pub fn header_mut(&mut self) -> &mut HttpHeader {
        &mut self.header
    }

    /// Body source, if any
    pub fn content(&self) -> Option<&ConnectContent> {
        self.content.as_ref()
    }

    /// Cache policy
    pub fn cache_policy(&self) -> &CachePolicy {
        &self.cache_policy
    }

    /// Retry policy set on this request, if any
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Read timeout
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Cache key over method, URL and the policy's vary headers
    pub fn cache_key(&self) -> CacheKey {
        let vary = self
            .cache_policy
            .vary_headers
            .iter()
            .filter_map(|name| self.header.get(name).map(|value| (name.as_str(), value)));
        CacheKey::with_headers(self.method.as_str(), self.url.as_str(), vary)
    }
}
