//! Error types for the disk cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the disk cache.
///
/// Expected negative outcomes (a key that is absent, an entry that is already
/// being edited, a stale snapshot) are not errors; they surface as `None` or
/// `false` from the corresponding operation.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key does not match `[a-z0-9_-]{1,120}`
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// Out-of-range slot index, zero size or zero value count
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// One of the five journal header lines differs from what was expected
    #[error("Journal header mismatch in {field}: expected {expected:?}, found {found:?}")]
    HeaderMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    /// A journal body line could not be parsed
    #[error("Invalid journal line: {0:?}")]
    InvalidJournalLine(String),

    /// A newly created entry was committed without a value for every slot
    #[error("Newly created entry {key:?} didn't create value for index {slot}")]
    IncompleteValueSet { key: String, slot: usize },

    /// The cache has been closed
    #[error("Cache is closed")]
    ClosedCache,

    /// The editor no longer owns its entry
    #[error("Editor for {0:?} is no longer active")]
    EditorDetached(String),

    /// File system failure on a file the cache manages
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response metadata could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Returns true for errors that mean the journal cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CacheError::HeaderMismatch { .. } | CacheError::InvalidJournalLine(_)
        )
    }
}

// == Result Type Alias ==
/// Convenience Result type for the disk cache.
pub type Result<T> = std::result::Result<T, CacheError>;
