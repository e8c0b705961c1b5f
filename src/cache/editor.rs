//! Editor Module
//!
//! Write transactions over the values of a single entry.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::cache::entry::{clean_file, dirty_file};
use crate::cache::store::{EditOutcome, Inner};
use crate::error::{CacheError, Result};

// == Editor ==
/// Exclusive edit of one entry's values.
///
/// Values are written to dirty files outside the cache lock. Nothing becomes
/// visible to readers until [`Editor::commit`]; [`Editor::abort`] throws the
/// written values away. An editor dropped without either leaves the entry
/// locked until the cache is closed, and is cleaned up on the next open.
#[derive(Debug)]
pub struct Editor {
    cache: Arc<Inner>,
    key: String,
    id: u64,
    written: Vec<bool>,
    has_errors: Arc<AtomicBool>,
}

impl Editor {
    pub(crate) fn new(cache: Arc<Inner>, key: String, id: u64, value_count: usize) -> Self {
        Self {
            cache,
            key,
            id,
            written: vec![false; value_count],
            has_errors: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true if a write through this editor has failed.
    pub fn has_errors(&self) -> bool {
        self.has_errors.load(Ordering::SeqCst)
    }

    // == New Writer ==
    /// Returns a writer for the new value of `slot`.
    ///
    /// Write failures are not reported through the writer; they mark the
    /// editor as failed and the edit is discarded on commit.
    pub fn new_writer(&mut self, slot: usize) -> Result<FaultHidingWriter> {
        self.check_slot(slot)?;
        self.cache.check_editor(&self.key, self.id)?;
        self.written[slot] = true;

        let path = dirty_file(self.cache.directory(), &self.key, slot);
        let file = File::create(&path).or_else(|_| {
            // The directory may have been deleted out from under us
            fs::create_dir_all(self.cache.directory())?;
            File::create(&path)
        });

        match file {
            Ok(file) => Ok(FaultHidingWriter::new(file, Arc::clone(&self.has_errors))),
            Err(e) => {
                warn!(key = %self.key, slot, error = %e, "Failed to create value file");
                self.has_errors.store(true, Ordering::SeqCst);
                Ok(FaultHidingWriter::failed(Arc::clone(&self.has_errors)))
            }
        }
    }

    // == Set ==
    /// Writes `value` as the new value of `slot`.
    pub fn set(&mut self, slot: usize, value: impl AsRef<[u8]>) -> Result<()> {
        let mut writer = self.new_writer(slot)?;
        // Failures are recorded in `has_errors`
        let _ = writer.write_all(value.as_ref());
        let _ = writer.flush();
        Ok(())
    }

    // == New Reader ==
    /// Opens the last published value of `slot`, or `None` if the entry has
    /// never been published.
    pub fn new_reader(&self, slot: usize) -> Result<Option<File>> {
        self.check_slot(slot)?;
        if !self.cache.check_editor(&self.key, self.id)? {
            return Ok(None);
        }
        match File::open(clean_file(self.cache.directory(), &self.key, slot)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the last published value of `slot` as a string.
    pub fn get_string(&self, slot: usize) -> Result<Option<String>> {
        let Some(mut file) = self.new_reader(slot)? else {
            return Ok(None);
        };
        let mut value = String::new();
        file.read_to_string(&mut value)?;
        Ok(Some(value))
    }

    // == Commit ==
    /// Publishes the written values.
    ///
    /// Returns `Ok(false)` if a write failed, in which case the entry has been
    /// removed from the cache entirely. A newly created entry must have a
    /// value for every slot, otherwise the edit is aborted and
    /// `IncompleteValueSet` is returned.
    pub fn commit(self) -> Result<bool> {
        let outcome = if self.has_errors() {
            warn!(key = %self.key, "Discarding edit after write failure");
            EditOutcome::Discard
        } else {
            EditOutcome::Commit
        };
        self.cache
            .complete_edit(&self.key, self.id, &self.written, outcome)
    }

    // == Abort ==
    /// Discards the written values. The previously published values, if any,
    /// remain readable. Aborting an editor the cache already aborted is a no-op.
    pub fn abort(self) -> Result<()> {
        match self
            .cache
            .complete_edit(&self.key, self.id, &self.written, EditOutcome::Abort)
        {
            Ok(_) | Err(CacheError::ClosedCache) | Err(CacheError::EditorDetached(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot < self.written.len() {
            Ok(())
        } else {
            Err(CacheError::InvalidArgument(format!(
                "slot {} out of range for {} values",
                slot,
                self.written.len()
            )))
        }
    }

    #[cfg(test)]
    pub(crate) fn has_errors_flag(&self) -> &AtomicBool {
        &self.has_errors
    }
}

// == Fault Hiding Writer ==
/// Writer over a dirty value file that never returns an error.
///
/// The first failure sets the editor's error flag and every later byte is
/// dropped, so callers streaming into the cache are never interrupted by it.
#[derive(Debug)]
pub struct FaultHidingWriter {
    file: Option<File>,
    has_errors: Arc<AtomicBool>,
}

impl FaultHidingWriter {
    pub(crate) fn new(file: File, has_errors: Arc<AtomicBool>) -> Self {
        Self {
            file: Some(file),
            has_errors,
        }
    }

    pub(crate) fn failed(has_errors: Arc<AtomicBool>) -> Self {
        Self {
            file: None,
            has_errors,
        }
    }

    fn fail(&mut self, error: io::Error) {
        warn!(error = %error, "Value write failed");
        self.has_errors.store(true, Ordering::SeqCst);
        self.file = None;
    }
}

impl Write for FaultHidingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(buf) {
                self.fail(e);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush() {
                self.fail(e);
            }
        }
        Ok(())
    }
}
