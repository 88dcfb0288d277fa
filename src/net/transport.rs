//! Transport port and the default reqwest-backed implementation

use super::header::HttpHeader;
use super::request::{ConnectRequest, Method};
use crate::config::HttpConfig;
use crate::error::Result;
use parking_lot::Mutex;
use reqwest::blocking::{Body, Client};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::time::Duration;

/// Raw response handed back by a [`Transport`]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub header: HttpHeader,
    /// Unread response body
    pub body: Box<dyn Read + Send>,
}

impl TransportResponse {
    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Performs one blocking request/response exchange
///
/// Called from scheduler worker threads. Implementations return any status
/// code as a response; classification and retry happen in the caller.
pub trait Transport: Send + Sync {
    /// Send `request` and return the response with an unread body
    fn execute(&self, request: &ConnectRequest) -> Result<TransportResponse>;
}

/// [`Transport`] built on `reqwest::blocking`
///
/// Keeps one client per distinct connect timeout so connection pools are
/// reused across requests. Like any blocking reqwest client it must not be
/// dropped from inside an async runtime.
pub struct ReqwestTransport {
    config: HttpConfig,
    clients: Mutex<HashMap<Duration, Client>>,
}

impl ReqwestTransport {
    /// Transport using the given HTTP settings
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client(&self, connect_timeout: Duration) -> Result<Client> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }

        let redirect = if self.config.follow_redirects {
            reqwest::redirect::Policy::limited(self.config.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(self.config.user_agent.as_str())
            .redirect(redirect)
            .build()?;

        tracing::debug!(
            connect_timeout_ms = connect_timeout.as_millis() as u64,
            "Created HTTP client"
        );
        clients.insert(connect_timeout, client.clone());
        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(HttpConfig::default())
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("config", &self.config)
            .field("clients", &self.clients.lock().len())
            .finish()
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Head => reqwest::Method::HEAD,
        Method::Delete => reqwest::Method::DELETE,
        Method::Put => reqwest::Method::PUT,
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &ConnectRequest) -> Result<TransportResponse> {
        let client = self.client(request.connect_timeout())?;

        let mut builder = client
            .request(to_reqwest_method(request.method()), request.url().clone())
            .timeout(request.read_timeout());
        for (name, value) in request.header().iter() {
            builder = builder.header(name, value);
        }
        if let Some(content) = request.content() {
            let reader = content.open_stream()?;
            let body = match content.length() {
                Some(length) => Body::sized(reader, length),
                None => Body::new(reader),
            };
            builder = builder.body(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();

        let mut header = HttpHeader::new();
        for (name, value) in response.headers() {
            match value.to_str() {
                Ok(value) => {
                    header.put(name.as_str(), value);
                }
                Err(_) => {
                    tracing::trace!(header = %name, "Skipping non-ASCII response header");
                }
            }
        }

        tracing::trace!(
            method = %request.method(),
            url = %request.url(),
            status = status,
            "Response received"
        );
        Ok(TransportResponse {
            status,
            header,
            body: Box::new(response),
        })
    }
}
