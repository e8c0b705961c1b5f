//! Disk Cache - A journaled, disk-backed key/value cache
//!
//! Stores a fixed number of byte values per key on the file system, evicts
//! least recently used entries to stay under a size limit, and survives
//! unclean shutdowns through an append-only journal.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod response_cache;
pub mod tasks;

pub use cache::{DiskLruCache, Editor, Snapshot};
pub use config::Config;
pub use error::{CacheError, Result};
pub use response_cache::ResponseCache;
