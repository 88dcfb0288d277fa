//! Network connector: request model, transport port, cached and retried
//! exchanges executed on the task scheduler

mod connection;
mod connector;
mod decoder;
pub mod header;
mod request;
mod stream;
mod transport;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use connection::AuthRecovery;
pub use connector::{ConnectResult, Connector, ConnectorBuilder};
pub use decoder::{BytesDecoder, Decoder, JsonDecoder, TextDecoder};
pub use header::HttpHeader;
pub use request::{
    ConnectContent, ConnectRequest, ContentSource, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
    FORM_CONTENT_TYPE, Method,
};
pub use stream::{BufferedBody, StreamBuffer};
pub use transport::{ReqwestTransport, Transport, TransportResponse};
