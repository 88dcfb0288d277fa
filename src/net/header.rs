//! Header map with case-insensitive names

use std::collections::BTreeMap;

/// `ETag`
pub const ETAG: &str = "ETag";
/// `Content-Length`
pub const CONTENT_LENGTH: &str = "Content-Length";
/// `Content-Type`
pub const CONTENT_TYPE: &str = "Content-Type";
/// `Content-Range`
pub const CONTENT_RANGE: &str = "Content-Range";
/// `Authorization`
pub const AUTHORIZATION: &str = "Authorization";
/// `Range`
pub const RANGE: &str = "Range";

/// Request or response headers
///
/// Names compare case-insensitively; the spelling of the last `put` is kept
/// for iteration. One value per name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HttpHeader {
    /// lower-cased name -> (original name, value)
    entries: BTreeMap<String, (String, String)>,
}

impl HttpHeader {
    /// Empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any previous value
    pub fn put(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()));
        self
    }

    /// Builder form of [`put`](Self::put)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.put(name, value);
        self
    }

    /// Value of `name`, if present
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value.as_str())
    }

    /// Remove `name`, returning its value
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
    }

    /// True if `name` is present
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Copy every entry of `other` into this map, overwriting duplicates
    pub fn extend_from(&mut self, other: &HttpHeader) {
        for (name, value) in other.iter() {
            self.put(name, value);
        }
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no headers are set
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, value)` pairs ordered by lower-cased name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Set the `Range` header for `length` bytes starting at `offset`
    pub fn set_range(&mut self, offset: u64, length: u64) -> &mut Self {
        self.put(RANGE, range(offset, length))
    }

    /// `Content-Length`, if present and numeric
    pub fn content_length(&self) -> Option<u64> {
        self.get(CONTENT_LENGTH)?.trim().parse().ok()
    }

    /// `Content-Type`, if present
    pub fn content_type(&self) -> Option<&str> {
        self.get(CONTENT_TYPE)
    }

    /// `ETag`, if present
    pub fn etag(&self) -> Option<&str> {
        self.get(ETAG)
    }

    /// Full size of the remote content
    ///
    /// Taken from the total after `/` in `Content-Range` when the response is
    /// partial, otherwise from `Content-Length`. `None` when neither header
    /// carries a usable number (including `Content-Range: bytes 0-9/*`).
    pub fn content_full_size(&self) -> Option<u64> {
        if let Some(range) = self.get(CONTENT_RANGE) {
            if let Some((_, total)) = range.rsplit_once('/') {
                return total.trim().parse().ok();
            }
        }
        self.content_length()
    }
}

/// Render a `Range` value: `bytes=<offset>-<offset+length-1>`
///
/// A zero `length` yields an open-ended range (`bytes=<offset>-`).
pub fn range(offset: u64, length: u64) -> String {
    match length {
        0 => format!("bytes={}-", offset),
        _ => format!("bytes={}-{}", offset, offset.saturating_add(length - 1)),
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for HttpHeader {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut header = HttpHeader::new();
        for (name, value) in iter {
            header.put(name, value);
        }
        header
    }
}
