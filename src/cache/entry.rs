//! Cache Entry Module
//!
//! Per-key metadata tracked by the index and the file names of its values.

use std::path::{Path, PathBuf};

/// Editor id recorded for `DIRTY` entries found while replaying the journal.
///
/// Live editors are numbered from 1, so an orphan can never be committed.
pub const ORPHANED_EDITOR: u64 = 0;

// == Entry ==
/// Metadata for one key; the values themselves live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Byte length of each published value
    pub lengths: Vec<u64>,
    /// True once the entry has been committed at least once
    pub readable: bool,
    /// Id of the editor currently holding the entry, if any
    pub current_editor: Option<u64>,
    /// Bumped on every successful commit; snapshots compare against it
    pub sequence_number: u64,
}

impl Entry {
    // == Constructor ==
    /// Creates an unpublished entry with `value_count` zero-length slots.
    pub fn new(value_count: usize) -> Self {
        Self {
            lengths: vec![0; value_count],
            readable: false,
            current_editor: None,
            sequence_number: 0,
        }
    }

    /// Total bytes of all published values.
    pub fn total_len(&self) -> u64 {
        self.lengths.iter().sum()
    }

    /// Total bytes, or `None` if the lengths do not fit in a `u64`.
    ///
    /// Lengths read back from a journal are untrusted; check them with this
    /// before they feed the size counter.
    pub fn checked_total_len(&self) -> Option<u64> {
        self.lengths
            .iter()
            .try_fold(0u64, |total, &length| total.checked_add(length))
    }

    pub fn is_being_edited(&self) -> bool {
        self.current_editor.is_some()
    }
}

// == File Names ==
/// Path of the published value for `slot`: `<key>.<slot>`.
pub fn clean_file(directory: &Path, key: &str, slot: usize) -> PathBuf {
    directory.join(format!("{}.{}", key, slot))
}

/// Path of the in-progress value for `slot`: `<key>.<slot>.tmp`.
pub fn dirty_file(directory: &Path, key: &str, slot: usize) -> PathBuf {
    directory.join(format!("{}.{}.tmp", key, slot))
}
