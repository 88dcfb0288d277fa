//! Scripted transport and connector fixtures for connection tests

use super::header::HttpHeader;
use super::request::{ConnectRequest, Method};
use super::transport::{Transport, TransportResponse};
use super::connector::{Connector, ConnectorBuilder};
use crate::config::Config;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted transport outcome
#[derive(Clone, Debug)]
pub(crate) enum MockReply {
    Respond {
        status: u16,
        header: HttpHeader,
        body: Vec<u8>,
    },
    /// Transport-level failure before any response
    Fail(io::ErrorKind),
}

impl MockReply {
    pub(crate) fn ok(body: &[u8]) -> Self {
        Self::status(200, body)
    }

    pub(crate) fn status(status: u16, body: &[u8]) -> Self {
        let header = HttpHeader::new().with("Content-Length", body.len().to_string());
        MockReply::Respond {
            status,
            header,
            body: body.to_vec(),
        }
    }
}

/// A request as the transport saw it
#[derive(Clone, Debug)]
pub(crate) struct SeenRequest {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) header: HttpHeader,
}

/// Transport that replays scripted replies in order, then the fallback
pub(crate) struct MockTransport {
    script: Mutex<VecDeque<MockReply>>,
    fallback: Option<MockReply>,
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenRequest>>,
    gate: Option<(Sender<()>, Receiver<()>)>,
}

impl MockTransport {
    pub(crate) fn new(script: Vec<MockReply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Always reply with `reply`
    pub(crate) fn always(reply: MockReply) -> Self {
        Self {
            fallback: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    /// Each call announces itself on the returned receiver, then blocks until
    /// the returned sender sends (or is dropped)
    pub(crate) fn gated(reply: MockReply) -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let transport = Self {
            gate: Some((entered_tx, release_rx)),
            ..Self::always(reply)
        };
        (transport, entered_rx, release_tx)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &ConnectRequest) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(SeenRequest {
            method: request.method(),
            url: request.url().to_string(),
            header: request.header().clone(),
        });

        if let Some((entered, release)) = &self.gate {
            let _ = entered.send(());
            let _ = release.recv();
        }

        let next = self.script.lock().pop_front();
        let reply = next
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| Error::Other("mock transport script exhausted".into()))?;

        match reply {
            MockReply::Respond {
                status,
                header,
                body,
            } => Ok(TransportResponse {
                status,
                header,
                body: Box::new(io::Cursor::new(body)),
            }),
            MockReply::Fail(kind) => Err(Error::Io(io::Error::from(kind))),
        }
    }
}

/// Config with a fast retry policy and the cache rooted at `cache_dir`
pub(crate) fn test_config(cache_dir: &Path) -> Config {
    let mut config = Config::default();
    config.cache.dir = cache_dir.to_path_buf();
    config.scheduler.max_workers = 2;
    config.scheduler.thread_name = "test-connect".to_string();
    config.retry.max_retries = 3;
    config.retry.backoff_multiplier = 2.0;
    config.retry.base_wait = Duration::from_millis(10);
    config
}

pub(crate) fn builder(transport: Arc<MockTransport>, cache_dir: &Path) -> ConnectorBuilder {
    Connector::builder(test_config(cache_dir)).transport(transport)
}

pub(crate) fn connector(transport: Arc<MockTransport>, cache_dir: &Path) -> Connector {
    builder(transport, cache_dir).build().unwrap()
}
