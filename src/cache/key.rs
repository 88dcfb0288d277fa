//! Cache key derivation

use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identity of a cacheable request
///
/// The canonical signature is `METHOD/url`, followed by one `\nname:value`
/// line per cache-relevant header (names lower-cased, sorted). The file name
/// is the SHA-256 of that signature, so any change to the signature yields a
/// different entry rather than an in-place update.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    signature: String,
    digest: String,
}

impl CacheKey {
    /// Build a key from the request method and URL
    pub fn new(method: &str, url: &str) -> Self {
        Self::from_signature(format!("{}/{}", method.to_ascii_uppercase(), url))
    }

    /// Build a key from the request method, URL and cache-relevant headers
    pub fn with_headers<'a, I>(method: &str, url: &str, vary_headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut signature = format!("{}/{}", method.to_ascii_uppercase(), url);

        let mut headers: Vec<(String, &str)> = vary_headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
            .collect();
        headers.sort();
        for (name, value) in headers {
            signature.push('\n');
            signature.push_str(&name);
            signature.push(':');
            signature.push_str(value);
        }

        Self::from_signature(signature)
    }

    /// Build a key from an already canonical signature
    pub fn from_signature(signature: impl Into<String>) -> Self {
        let signature = signature.into();
        let mut hasher = Sha256::new();
        hasher.update(signature.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self { signature, digest }
    }

    /// The canonical request signature
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Hex SHA-256 of the signature
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// File name for this key: `<digest>.<extension>`
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.digest, extension)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature)
    }
}
