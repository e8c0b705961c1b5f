//! Cache Module
//!
//! Provides a disk-backed key/value cache with LRU eviction, atomic
//! multi-value edits and a crash-consistent journal.

mod editor;
mod entry;
mod index;
mod journal;
mod line_reader;
mod snapshot;
mod stats;
mod store;


use std::fs;
use std::io;
use std::path::Path;

use crate::error::{CacheError, Result};

// Re-export public types
pub use editor::{Editor, FaultHidingWriter};
pub use entry::Entry;
pub(crate) use index::LruIndex;
pub use journal::{
    JournalHeader, JournalRecord, JournalWriter, JOURNAL_FILE, JOURNAL_FILE_BACKUP,
    JOURNAL_FILE_TEMP,
};
pub use line_reader::LineReader;
pub use snapshot::Snapshot;
pub use stats::CacheStats;
pub use store::DiskLruCache;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 120;

/// Redundant journal records tolerated before a rebuild is considered
pub const DEFAULT_REBUILD_THRESHOLD: usize = 2000;

// == Key Validation ==
/// Checks that `key` matches `[a-z0-9_-]{1,120}`.
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LENGTH
        && key
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-'));

    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

// == File Helpers ==
/// Deletes `path`, treating a missing file as success.
pub(crate) fn delete_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
