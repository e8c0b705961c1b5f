//! Response metadata stored in the first value slot
//!
//! Encoded as JSON so that headers survive byte-for-byte.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Everything about a response except its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Request method that produced the response
    pub method: String,
    /// HTTP status code
    pub status: u16,
    /// Header name/value pairs in received order
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// When the response was written to the cache
    pub stored_at: DateTime<Utc>,
}

impl ResponseMetadata {
    /// Creates metadata stamped with the current time.
    pub fn new(method: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            status,
            headers: Vec::new(),
            stored_at: Utc::now(),
        }
    }

    /// Appends a header, keeping earlier values with the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the first value of `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let metadata = ResponseMetadata::new("GET", 200)
            .with_header("Content-Type", "text/plain")
            .with_header("Set-Cookie", "a=1")
            .with_header("set-cookie", "b=2");

        assert_eq!(metadata.header("content-type"), Some("text/plain"));
        assert_eq!(metadata.header("SET-COOKIE"), Some("a=1"));
        assert_eq!(metadata.header("etag"), None);
    }

    #[test]
    fn test_bytes_preserve_headers() {
        let metadata = ResponseMetadata::new("GET", 304).with_header("ETag", "\"v1\"");
        let decoded = ResponseMetadata::from_bytes(&metadata.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let result = ResponseMetadata::from_bytes(b"not json");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
