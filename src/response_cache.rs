//! Response Cache Module
//!
//! Stores HTTP responses in a two-slot [`DiskLruCache`]: slot 0 holds the
//! JSON-encoded [`ResponseMetadata`], slot 1 holds the raw body.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::runtime::Handle;
use tracing::warn;

use crate::cache::{CacheStats, DiskLruCache};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{CachedResponse, DataSource, ResponseMetadata};

/// Slot holding the encoded metadata
pub const METADATA_SLOT: usize = 0;
/// Slot holding the body
pub const BODY_SLOT: usize = 1;
/// Values stored per response
pub const VALUE_COUNT: usize = 2;

// == Response Cache ==
/// Response storage keyed by request URL.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    cache: DiskLruCache,
}

impl ResponseCache {
    /// Opens a response cache in `directory`.
    pub fn open(
        directory: impl AsRef<Path>,
        app_version: u32,
        max_size: u64,
        scheduler: Handle,
    ) -> Result<Self> {
        let cache = DiskLruCache::open(directory, app_version, VALUE_COUNT, max_size, scheduler)?;
        Ok(Self { cache })
    }

    /// Opens a response cache from `config`, which must use two values per entry.
    pub fn from_config(config: &Config, scheduler: Handle) -> Result<Self> {
        if config.value_count != VALUE_COUNT {
            return Err(CacheError::InvalidArgument(format!(
                "response cache needs {} values per entry, config has {}",
                VALUE_COUNT, config.value_count
            )));
        }
        let cache = DiskLruCache::from_config(config, scheduler)?;
        Ok(Self { cache })
    }

    // == Cache Key ==
    /// Lowercase hex SHA-256 of `url`; always a valid cache key.
    pub fn cache_key(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    // == Get ==
    /// Returns the stored response for `url`.
    ///
    /// A response whose metadata cannot be decoded is treated as a miss.
    pub fn get(&self, url: &str) -> Result<Option<CachedResponse>> {
        let Some(mut snapshot) = self.cache.get(&Self::cache_key(url))? else {
            return Ok(None);
        };

        let metadata = match ResponseMetadata::from_bytes(&snapshot.read_bytes(METADATA_SLOT)?) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(url, error = %e, "Stored response metadata is unreadable");
                return Ok(None);
            }
        };
        let body = snapshot.read_bytes(BODY_SLOT)?;

        Ok(Some(CachedResponse {
            metadata,
            body,
            source: DataSource::Cache,
        }))
    }

    // == Put ==
    /// Stores a response. Returns false if the response is already being
    /// written or a write failed.
    pub fn put(&self, url: &str, metadata: &ResponseMetadata, body: &[u8]) -> Result<bool> {
        let encoded = metadata.to_bytes()?;
        let Some(mut editor) = self.cache.edit(&Self::cache_key(url))? else {
            return Ok(false);
        };
        editor.set(METADATA_SLOT, encoded)?;
        editor.set(BODY_SLOT, body)?;
        editor.commit()
    }

    // == Update Metadata ==
    /// Replaces the metadata of a stored response and keeps its body, as
    /// after a conditional request confirmed the body is unchanged.
    ///
    /// Returns false if nothing is stored, the entry changed meanwhile, or
    /// the write failed.
    pub fn update_metadata(&self, url: &str, metadata: &ResponseMetadata) -> Result<bool> {
        let encoded = metadata.to_bytes()?;
        let Some(snapshot) = self.cache.get(&Self::cache_key(url))? else {
            return Ok(false);
        };
        let Some(mut editor) = snapshot.edit()? else {
            return Ok(false);
        };
        drop(snapshot);
        editor.set(METADATA_SLOT, encoded)?;
        editor.commit()
    }

    pub fn remove(&self, url: &str) -> Result<bool> {
        self.cache.remove(&Self::cache_key(url))
    }

    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }

    pub fn close(&self) -> Result<()> {
        self.cache.close()
    }

    pub fn size(&self) -> u64 {
        self.cache.size()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The underlying engine.
    pub fn disk_cache(&self) -> &DiskLruCache {
        &self.cache
    }
}
