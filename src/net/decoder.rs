//! Body decoders

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Turns a buffered response body into a value
///
/// Implemented for any `Fn(&[u8]) -> Result<T>` closure.
pub trait Decoder<T>: Send + Sync {
    /// Decode `body`
    fn decode(&self, body: &[u8]) -> Result<T>;
}

impl<T, F> Decoder<T> for F
where
    F: Fn(&[u8]) -> Result<T> + Send + Sync,
{
    fn decode(&self, body: &[u8]) -> Result<T> {
        self(body)
    }
}

/// Returns the raw body
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesDecoder;

impl Decoder<Vec<u8>> for BytesDecoder {
    fn decode(&self, body: &[u8]) -> Result<Vec<u8>> {
        Ok(body.to_vec())
    }
}

/// Decodes the body as UTF-8 text
#[derive(Clone, Copy, Debug, Default)]
pub struct TextDecoder;

impl Decoder<String> for TextDecoder {
    fn decode(&self, body: &[u8]) -> Result<String> {
        String::from_utf8(body.to_vec()).map_err(|e| Error::Decode(format!("invalid UTF-8: {e}")))
    }
}

/// Deserializes the body as JSON into `T`
pub struct JsonDecoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDecoder<T> {
    /// JSON decoder for `T`
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonDecoder")
    }
}

impl<T: DeserializeOwned> Decoder<T> for JsonDecoder<T> {
    fn decode(&self, body: &[u8]) -> Result<T> {
        serde_json::from_slice(body).map_err(|e| Error::Decode(format!("invalid JSON: {e}")))
    }
}
