//! Snapshot Module
//!
//! Read-only, point-in-time view of an entry's values.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::cache::store::Inner;
use crate::cache::Editor;
use crate::error::{CacheError, Result};

// == Snapshot ==
/// The values of one entry as they were when [`get`] returned.
///
/// Every value file was opened before the snapshot was handed out. Commits
/// replace files by rename, so later edits never change what a snapshot
/// reads. Dropping the snapshot closes its files.
///
/// [`get`]: crate::cache::DiskLruCache::get
#[derive(Debug)]
pub struct Snapshot {
    cache: Arc<Inner>,
    key: String,
    sequence_number: u64,
    files: Vec<File>,
    lengths: Vec<u64>,
}

impl Snapshot {
    pub(crate) fn new(
        cache: Arc<Inner>,
        key: String,
        sequence_number: u64,
        files: Vec<File>,
        lengths: Vec<u64>,
    ) -> Self {
        Self {
            cache,
            key,
            sequence_number,
            files,
            lengths,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn value_count(&self) -> usize {
        self.files.len()
    }

    // == Lengths ==
    /// Byte length of `slot` when the snapshot was taken.
    pub fn length(&self, slot: usize) -> Option<u64> {
        self.lengths.get(slot).copied()
    }

    pub fn lengths(&self) -> &[u64] {
        &self.lengths
    }

    // == Readers ==
    /// Returns the open file for `slot`, positioned wherever the last read left it.
    pub fn reader(&mut self, slot: usize) -> Option<&mut File> {
        self.files.get_mut(slot)
    }

    /// Reads the whole value of `slot` from the start.
    pub fn read_bytes(&mut self, slot: usize) -> Result<Vec<u8>> {
        let file = self.file_at_start(slot)?;
        let mut value = Vec::new();
        file.read_to_end(&mut value)?;
        Ok(value)
    }

    /// Reads the whole value of `slot` from the start as UTF-8.
    pub fn read_string(&mut self, slot: usize) -> Result<String> {
        let file = self.file_at_start(slot)?;
        let mut value = String::new();
        file.read_to_string(&mut value)?;
        Ok(value)
    }

    // == Edit ==
    /// Starts an edit of this entry, or returns `None` if the entry changed
    /// since the snapshot was taken or another edit is in progress.
    pub fn edit(&self) -> Result<Option<Editor>> {
        self.cache.edit(&self.key, Some(self.sequence_number))
    }

    /// Releases the value files.
    pub fn close(self) {}

    fn file_at_start(&mut self, slot: usize) -> Result<&mut File> {
        let count = self.files.len();
        let file = self.files.get_mut(slot).ok_or_else(|| {
            CacheError::InvalidArgument(format!("slot {} out of range for {} values", slot, count))
        })?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }
}
