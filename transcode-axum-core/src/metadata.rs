//! Call metadata.
//!
//! Metadata is the protocol view of HTTP headers and trailers: lowercase
//! keys mapped to ASCII or binary values. Keys ending in `-bin` hold bytes,
//! which are base64 encoded when they cross an HTTP boundary.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::Status;
use crate::protocol::{
    decode_binary_header, encode_binary_header, is_binary_header, is_filtered_header,
};

/// A single metadata value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetadataValue {
    Ascii(String),
    Binary(Bytes),
}

impl MetadataValue {
    /// The ASCII value, if this is not a binary entry.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Ascii(value) => Some(value),
            MetadataValue::Binary(_) => None,
        }
    }

    /// The binary value, if this is a binary entry.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            MetadataValue::Ascii(_) => None,
            MetadataValue::Binary(value) => Some(value),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Ascii(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Ascii(value)
    }
}

impl From<Bytes> for MetadataValue {
    fn from(value: Bytes) -> Self {
        MetadataValue::Binary(value)
    }
}

/// An ordered multi-map of metadata entries.
///
/// # Example
///
/// ```
/// use transcode_axum_core::{Metadata, MetadataValue};
///
/// let mut metadata = Metadata::new();
/// metadata.append("x-tag", "a");
/// metadata.append("x-tag", "b");
/// assert_eq!(metadata.get_all("x-tag").count(), 2);
/// assert_eq!(metadata.get_ascii("x-tag"), Some("a"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add an entry, keeping existing entries with the same key.
    pub fn append<K: AsRef<str>, V: Into<MetadataValue>>(&mut self, key: K, value: V) {
        self.entries
            .push((key.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// Set an entry, replacing all existing entries with the same key.
    pub fn insert<K: AsRef<str>, V: Into<MetadataValue>>(&mut self, key: K, value: V) {
        let key = key.as_ref().to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value.into()));
    }

    /// Remove all entries with the given key.
    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// The first value for `key`.
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// All values for `key`, in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a MetadataValue> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// The first ASCII value for `key`.
    pub fn get_ascii(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_str)
    }

    /// The first binary value for `key`.
    pub fn get_bin(&self, key: &str) -> Option<&Bytes> {
        self.get(key).and_then(MetadataValue::as_bytes)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Append every entry of `other`.
    pub fn extend(&mut self, other: Metadata) {
        self.entries.extend(other.entries);
    }

    /// Convert request headers into metadata.
    ///
    /// Filtered transport headers are skipped. Values of `-bin` headers are
    /// base64 decoded, and malformed values fail with `InvalidArgument`.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Status> {
        let mut metadata = Metadata::new();

        for (name, value) in headers {
            let key = name.as_str();
            if is_filtered_header(key) {
                continue;
            }

            if is_binary_header(key) {
                let text = value.to_str().map_err(|_| {
                    Status::invalid_argument(format!(
                        "Invalid binary header value for '{key}'."
                    ))
                })?;
                let bytes = decode_binary_header(text).map_err(|_| {
                    Status::invalid_argument(format!(
                        "Invalid Base64 encoded value for binary header '{key}'."
                    ))
                })?;
                metadata.append(key, MetadataValue::Binary(bytes));
            } else {
                let text = String::from_utf8_lossy(value.as_bytes()).into_owned();
                metadata.append(key, MetadataValue::Ascii(text));
            }
        }

        Ok(metadata)
    }

    /// Convert metadata into HTTP headers.
    ///
    /// Binary values are base64 encoded without padding. Entries whose key or
    /// value is not a valid header are skipped.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.entries.len());

        for (key, value) in &self.entries {
            let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
                continue;
            };
            let value = match value {
                MetadataValue::Ascii(text) => HeaderValue::from_str(text),
                MetadataValue::Binary(bytes) => {
                    HeaderValue::from_str(&encode_binary_header(bytes))
                }
            };
            if let Ok(value) = value {
                headers.append(name, value);
            }
        }

        headers
    }
}
