//! Chunked body buffering with a single-pass digest and cache tee

use crate::config::StreamConfig;
use std::io::{self, Read, Write};

/// Body read to the end
#[derive(Debug)]
pub struct BufferedBody {
    /// Full body
    pub body: Vec<u8>,
    /// Hex MD5 of `body`
    pub digest: String,
    /// True if every byte reached the tee without error and within its limit
    pub tee_complete: bool,
}

/// Reads a response body in fixed-size chunks
#[derive(Clone, Debug)]
pub struct StreamBuffer {
    chunk_size: usize,
    max_prealloc: usize,
}

impl StreamBuffer {
    /// Buffer reading `chunk_size` bytes at a time, pre-allocating at most `max_prealloc`
    pub fn new(chunk_size: usize, max_prealloc: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_prealloc,
        }
    }

    /// Buffer described by a [`StreamConfig`]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.chunk_size, config.max_prealloc_bytes)
    }

    /// Bytes read per chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read `reader` to the end
    ///
    /// Every chunk updates the digest, is appended to the body and is copied
    /// into `tee` while the tee stays healthy and under `tee_limit` bytes. A
    /// failing or overflowing tee is dropped silently; read errors abort.
    pub fn read_all<R, W>(
        &self,
        reader: &mut R,
        expected_len: Option<u64>,
        mut tee: Option<&mut W>,
        tee_limit: u64,
    ) -> io::Result<BufferedBody>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let capacity = expected_len
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0)
            .min(self.max_prealloc);
        let mut body = Vec::with_capacity(capacity);
        let mut chunk = vec![0u8; self.chunk_size];
        let mut context = md5::Context::new();
        let mut tee_complete = tee.is_some();

        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let bytes = &chunk[..n];
            context.consume(bytes);
            body.extend_from_slice(bytes);

            if let Some(sink) = tee.as_deref_mut() {
                if body.len() as u64 > tee_limit {
                    tracing::debug!(limit = tee_limit, "Body exceeds cache item limit, not caching");
                    tee = None;
                    tee_complete = false;
                } else if let Err(e) = sink.write_all(bytes) {
                    tracing::warn!(error = %e, "Cache write failed, continuing without cache");
                    tee = None;
                    tee_complete = false;
                }
            }
        }

        if let Some(sink) = tee {
            if let Err(e) = sink.flush() {
                tracing::warn!(error = %e, "Cache flush failed, continuing without cache");
                tee_complete = false;
            }
        }

        Ok(BufferedBody {
            body,
            digest: format!("{:x}", context.compute()),
            tee_complete,
        })
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}
