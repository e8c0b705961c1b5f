//! Responses handed back from the cache

use serde::Serialize;

use crate::models::ResponseMetadata;

/// Where a response handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Fetched from the network by the transport
    Network,
    /// Served entirely from the cache
    Cache,
    /// Served from the cache after the server confirmed it is unchanged
    ConditionalCache,
}

/// A response read back from the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedResponse {
    pub metadata: ResponseMetadata,
    pub body: Vec<u8>,
    pub source: DataSource,
}

impl CachedResponse {
    pub fn status(&self) -> u16 {
        self.metadata.status
    }

    /// Returns the body as UTF-8 text, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
