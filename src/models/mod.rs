//! Data models for responses stored in the cache
//!
//! The cache engine stores opaque byte blobs; these types describe what the
//! shipped two-slot configuration keeps in them.

pub mod metadata;
pub mod response;

// Re-export commonly used types
pub use metadata::ResponseMetadata;
pub use response::{CachedResponse, DataSource};
