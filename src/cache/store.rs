//! Cache Store Module
//!
//! The cache engine: recovers the index from the journal on open, serves
//! get/edit/remove, and keeps the directory within its size limit.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cache::entry::{clean_file, dirty_file, ORPHANED_EDITOR};
use crate::cache::journal::{self, JournalHeader, JournalRecord, JournalWriter};
use crate::cache::{
    delete_if_exists, validate_key, CacheStats, Editor, Entry, LineReader, LruIndex, Snapshot,
    DEFAULT_REBUILD_THRESHOLD, JOURNAL_FILE, JOURNAL_FILE_BACKUP, JOURNAL_FILE_TEMP,
};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::tasks::{Compact, CompactionWorker};

// == Disk LRU Cache ==
/// A cache that stores a fixed number of values per key in a directory on
/// the file system, bounded by a maximum total size.
///
/// Cloning is cheap; all clones share the same engine. Every operation takes
/// a single engine-wide lock for its bookkeeping only; bytes are streamed
/// through [`Editor`] and [`Snapshot`] outside the lock.
///
/// # Example
/// ```ignore
/// let cache = DiskLruCache::open("/tmp/cache", 1, 2, 10 * 1024 * 1024, Handle::current())?;
/// if let Some(mut editor) = cache.edit("k1")? {
///     editor.set(0, b"headers")?;
///     editor.set(1, b"body")?;
///     editor.commit()?;
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DiskLruCache {
    inner: Arc<Inner>,
}

/// Shared engine state referenced by the cache handle, editors and snapshots.
#[derive(Debug)]
pub(crate) struct Inner {
    directory: PathBuf,
    header: JournalHeader,
    rebuild_threshold: usize,
    state: Mutex<State>,
    worker: CompactionWorker,
}

/// Everything guarded by the engine lock.
#[derive(Debug)]
struct State {
    index: LruIndex<Entry>,
    journal: Option<JournalWriter>,
    size: u64,
    max_size: u64,
    redundant_op_count: usize,
    next_sequence_number: u64,
    next_editor_id: u64,
    closed: bool,
    stats: CacheStats,
}

/// How an edit is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EditOutcome {
    /// Publish the written values
    Commit,
    /// Drop the written values, keep what was published before
    Abort,
    /// Drop the written values and the entry itself
    Discard,
}

impl DiskLruCache {
    // == Open ==
    /// Opens the cache in `directory`, creating it if needed.
    ///
    /// A journal that cannot be trusted (wrong header, malformed record) is
    /// not an error: the directory is wiped and the cache starts empty.
    /// `scheduler` is the runtime the background compaction worker runs on.
    pub fn open(
        directory: impl AsRef<Path>,
        app_version: u32,
        value_count: usize,
        max_size: u64,
        scheduler: Handle,
    ) -> Result<Self> {
        let config = Config {
            directory: directory.as_ref().to_path_buf(),
            app_version,
            value_count,
            max_size,
            rebuild_threshold: DEFAULT_REBUILD_THRESHOLD,
        };
        Self::from_config(&config, scheduler)
    }

    /// Opens the cache described by `config`.
    pub fn from_config(config: &Config, scheduler: Handle) -> Result<Self> {
        if config.max_size == 0 {
            return Err(CacheError::InvalidArgument(
                "max_size must be greater than 0".to_string(),
            ));
        }
        if config.value_count == 0 {
            return Err(CacheError::InvalidArgument(
                "value_count must be greater than 0".to_string(),
            ));
        }

        let directory = config.directory.clone();
        let header = JournalHeader::new(config.app_version, config.value_count);
        let state = State::recover(&directory, &header, config.max_size)?;

        info!(
            directory = %directory.display(),
            entries = state.index.len(),
            size = state.size,
            max_size = state.max_size,
            "Cache opened"
        );

        let inner = Arc::new_cyclic(|weak| Inner {
            directory,
            header,
            rebuild_threshold: config.rebuild_threshold,
            state: Mutex::new(state),
            worker: CompactionWorker::spawn(&scheduler, weak.clone()),
        });

        Ok(Self { inner })
    }

    // == Get ==
    /// Returns a snapshot of the entry named `key`, or `None` if it is absent
    /// or not yet readable. A returned snapshot is the most recently used.
    pub fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        self.inner.get(key)
    }

    // == Edit ==
    /// Returns an editor for `key`, or `None` if another edit is in progress.
    pub fn edit(&self, key: &str) -> Result<Option<Editor>> {
        self.inner.edit(key, None)
    }

    // == Remove ==
    /// Drops the entry for `key`. Returns false if it is absent or being edited.
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        state.check_not_closed()?;

        let removed = state.remove_entry(&self.inner.directory, key)?;
        if removed && state.journal_rebuild_required(self.inner.rebuild_threshold) {
            self.inner.worker.schedule();
        }
        Ok(removed)
    }

    // == Flush ==
    /// Trims the cache to its size limit and flushes the journal.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        state.check_not_closed()?;
        state.trim_to_size(&self.inner.directory)?;
        state.journal_mut()?.flush()
    }

    // == Close ==
    /// Aborts in-flight edits, flushes and closes the journal.
    ///
    /// Closing an already closed cache does nothing.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        if state.closed {
            return Ok(());
        }

        let result = state.shut_down(&self.inner.directory, self.inner.header.value_count);
        state.closed = true;
        self.inner.worker.shutdown();
        info!(directory = %self.inner.directory.display(), "Cache closed");
        result
    }

    // == Delete ==
    /// Closes the cache and deletes its directory, including files the cache
    /// did not create.
    pub fn delete(&self) -> Result<()> {
        self.close()?;
        match fs::remove_dir_all(&self.inner.directory) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // == Evict All ==
    /// Removes every entry. In-flight edits are aborted.
    pub fn evict_all(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let state = &mut *guard;
        state.check_not_closed()?;

        let value_count = self.inner.header.value_count;
        for key in state.index.keys() {
            if state.index.get(&key).is_some_and(Entry::is_being_edited) {
                state.finish_edit(&self.inner.directory, value_count, &key, EditOutcome::Abort)?;
            }
            state.remove_entry(&self.inner.directory, &key)?;
        }
        state.journal_mut()?.flush()
    }

    // == Size ==
    /// Bytes of published values currently stored.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    pub fn max_size(&self) -> u64 {
        self.inner.lock().max_size
    }

    /// Changes the size limit. Lowering it schedules eviction in the background.
    pub fn set_max_size(&self, max_size: u64) -> Result<()> {
        if max_size == 0 {
            return Err(CacheError::InvalidArgument(
                "max_size must be greater than 0".to_string(),
            ));
        }
        let mut state = self.inner.lock();
        state.check_not_closed()?;
        let lowered = max_size < state.max_size;
        state.max_size = max_size;
        if lowered {
            self.inner.worker.schedule();
        }
        Ok(())
    }

    // == Keys ==
    /// Readable keys, least recently used first.
    pub fn keys(&self) -> Result<Vec<String>> {
        let state = self.inner.lock();
        state.check_not_closed()?;
        Ok(state
            .index
            .iter()
            .filter(|(_, entry)| entry.readable)
            .map(|(key, _)| key.to_string())
            .collect())
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        let mut stats = state.stats.clone();
        stats.total_entries = state.index.len();
        stats.size = state.size;
        stats.max_size = state.max_size;
        stats
    }

    // == Compact Now ==
    /// Runs a compaction pass on the calling thread.
    pub fn compact_now(&self) -> Result<()> {
        self.inner.compact()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn value_count(&self) -> usize {
        self.inner.header.value_count
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn directory(&self) -> &Path {
        &self.directory
    }

    pub(crate) fn get(self: &Arc<Self>, key: &str) -> Result<Option<Snapshot>> {
        validate_key(key)?;
        let mut guard = self.lock();
        let state = &mut *guard;
        state.check_not_closed()?;

        let (lengths, sequence_number) = match state.index.get(key) {
            Some(entry) if entry.readable => (entry.lengths.clone(), entry.sequence_number),
            _ => {
                state.stats.record_miss();
                return Ok(None);
            }
        };

        // Open every value before handing anything out; a value deleted
        // behind our back is a miss, not an error.
        let mut files = Vec::with_capacity(self.header.value_count);
        for slot in 0..self.header.value_count {
            match File::open(clean_file(&self.directory, key, slot)) {
                Ok(file) => files.push(file),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    state.stats.record_miss();
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        state.index.touch(key);
        state.redundant_op_count += 1;
        state.stats.record_hit();
        if let Err(e) = state
            .journal_mut()
            .and_then(|journal| journal.append(&JournalRecord::Read(key.to_string())))
        {
            warn!(key, error = %e, "Failed to journal read");
        }
        if state.journal_rebuild_required(self.rebuild_threshold) {
            self.worker.schedule();
        }

        Ok(Some(Snapshot::new(
            Arc::clone(self),
            key.to_string(),
            sequence_number,
            files,
            lengths,
        )))
    }

    pub(crate) fn edit(
        self: &Arc<Self>,
        key: &str,
        expected_sequence_number: Option<u64>,
    ) -> Result<Option<Editor>> {
        validate_key(key)?;
        let mut guard = self.lock();
        let state = &mut *guard;
        state.check_not_closed()?;

        if let Some(expected) = expected_sequence_number {
            match state.index.get(key) {
                Some(entry) if entry.sequence_number == expected => {}
                // Snapshot is stale
                _ => return Ok(None),
            }
        }
        if state
            .index
            .touch(key)
            .is_some_and(|entry| entry.is_being_edited())
        {
            return Ok(None);
        }

        // Journal the edit before any value is written
        let journal = state.journal_mut()?;
        journal.append(&JournalRecord::Dirty(key.to_string()))?;
        journal.flush()?;

        let editor_id = state.next_editor_id;
        state.next_editor_id += 1;
        let value_count = self.header.value_count;
        let entry = state
            .index
            .touch_or_insert_with(key, || Entry::new(value_count));
        entry.current_editor = Some(editor_id);

        debug!(key, editor_id, "Edit started");
        Ok(Some(Editor::new(
            Arc::clone(self),
            key.to_string(),
            editor_id,
            value_count,
        )))
    }

    /// Fails unless editor `editor_id` still owns `key`; returns whether the
    /// entry has been published before.
    pub(crate) fn check_editor(&self, key: &str, editor_id: u64) -> Result<bool> {
        let state = self.lock();
        state.owned_entry(key, editor_id).map(|entry| entry.readable)
    }

    /// Resolves an edit. Returns true if the written values were published.
    pub(crate) fn complete_edit(
        &self,
        key: &str,
        editor_id: u64,
        written: &[bool],
        outcome: EditOutcome,
    ) -> Result<bool> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let readable = state.owned_entry(key, editor_id)?.readable;
        let value_count = self.header.value_count;

        // A newly created entry must supply every value
        if outcome == EditOutcome::Commit && !readable {
            for (slot, &was_written) in written.iter().enumerate() {
                if !was_written || !dirty_file(&self.directory, key, slot).exists() {
                    state.finish_edit(&self.directory, value_count, key, EditOutcome::Abort)?;
                    return Err(CacheError::IncompleteValueSet {
                        key: key.to_string(),
                        slot,
                    });
                }
            }
        }

        let published = state.finish_edit(&self.directory, value_count, key, outcome)?;
        if state.size > state.max_size || state.journal_rebuild_required(self.rebuild_threshold) {
            self.worker.schedule();
        }
        Ok(published)
    }
}

impl Compact for Inner {
    fn compact(&self) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Ok(());
        }

        state.trim_to_size(&self.directory)?;
        if state.journal_rebuild_required(self.rebuild_threshold) {
            state.rebuild_journal(&self.directory, &self.header)?;
        }
        Ok(())
    }
}

impl State {
    fn empty(max_size: u64) -> Self {
        Self {
            index: LruIndex::new(),
            journal: None,
            size: 0,
            max_size,
            redundant_op_count: 0,
            // Recovered entries sit at 0, so the first commit must move past it
            next_sequence_number: 1,
            next_editor_id: ORPHANED_EDITOR + 1,
            closed: false,
            stats: CacheStats::new(),
        }
    }

    // == Recovery ==
    /// Restores state from the journal in `directory`, or starts empty.
    fn recover(directory: &Path, header: &JournalHeader, max_size: u64) -> Result<Self> {
        let journal_file = directory.join(JOURNAL_FILE);
        let backup_file = directory.join(JOURNAL_FILE_BACKUP);

        // A backup means a rebuild was interrupted
        if backup_file.exists() {
            if journal_file.exists() {
                delete_if_exists(&backup_file)?;
            } else {
                fs::rename(&backup_file, &journal_file)?;
            }
        }

        if journal_file.exists() {
            match Self::replay(directory, header, max_size) {
                Ok(state) => return Ok(state),
                Err(e) => {
                    warn!(
                        directory = %directory.display(),
                        error = %e,
                        corrupt = e.is_corruption(),
                        "Journal unusable, removing cache contents"
                    );
                    match fs::remove_dir_all(directory) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        fs::create_dir_all(directory)?;
        let mut state = Self::empty(max_size);
        state.journal = Some(journal::rebuild(directory, header, std::iter::empty())?);
        Ok(state)
    }

    /// Replays the journal, then reconciles the value files with it.
    fn replay(directory: &Path, header: &JournalHeader, max_size: u64) -> Result<Self> {
        let mut reader = LineReader::new(File::open(directory.join(JOURNAL_FILE))?);
        header.verify(&mut reader)?;

        let mut state = Self::empty(max_size);
        let mut line_count = 0usize;
        while let Some(line) = reader.read_line()? {
            let record = JournalRecord::parse(&line, header.value_count)?;
            state.apply(record, header.value_count);
            line_count += 1;
        }
        state.redundant_op_count = line_count.saturating_sub(state.index.len());

        delete_if_exists(&directory.join(JOURNAL_FILE_TEMP))?;
        state.process_journal(directory, header.value_count)?;

        if reader.has_unterminated_line() {
            info!(directory = %directory.display(), "Journal ends in a partial line, rebuilding");
            state.rebuild_journal(directory, header)?;
        } else {
            state.journal = Some(JournalWriter::open_append(&directory.join(JOURNAL_FILE))?);
        }
        Ok(state)
    }

    fn apply(&mut self, record: JournalRecord, value_count: usize) {
        match record {
            JournalRecord::Clean { key, lengths } => {
                let entry = self
                    .index
                    .touch_or_insert_with(&key, || Entry::new(value_count));
                entry.readable = true;
                entry.current_editor = None;
                entry.lengths = lengths;
            }
            JournalRecord::Dirty(key) => {
                let entry = self
                    .index
                    .touch_or_insert_with(&key, || Entry::new(value_count));
                entry.current_editor = Some(ORPHANED_EDITOR);
            }
            JournalRecord::Remove(key) => {
                self.index.remove(&key);
            }
            JournalRecord::Read(key) => {
                self.index.touch(&key);
            }
        }
    }

    /// Drops entries whose edit never finished and sums up the rest.
    fn process_journal(&mut self, directory: &Path, value_count: usize) -> Result<()> {
        let orphans: Vec<String> = self
            .index
            .iter()
            .filter(|(_, entry)| entry.is_being_edited())
            .map(|(key, _)| key.to_string())
            .collect();

        for key in &orphans {
            for slot in 0..value_count {
                delete_if_exists(&clean_file(directory, key, slot))?;
                delete_if_exists(&dirty_file(directory, key, slot))?;
            }
            self.index.remove(key);
        }
        if !orphans.is_empty() {
            debug!(count = orphans.len(), "Dropped unfinished edits");
        }

        let mut size = 0u64;
        for (key, entry) in self.index.iter() {
            size = entry
                .checked_total_len()
                .and_then(|len| size.checked_add(len))
                .ok_or_else(|| {
                    CacheError::InvalidJournalLine(format!(
                        "CLEAN {} lengths overflow the cache size",
                        key
                    ))
                })?;
        }
        self.size = size;
        Ok(())
    }

    // == Bookkeeping ==
    fn check_not_closed(&self) -> Result<()> {
        if self.closed {
            Err(CacheError::ClosedCache)
        } else {
            Ok(())
        }
    }

    fn journal_mut(&mut self) -> Result<&mut JournalWriter> {
        self.journal.as_mut().ok_or(CacheError::ClosedCache)
    }

    /// Rebuilding only pays off once it would at least halve the journal.
    fn journal_rebuild_required(&self, threshold: usize) -> bool {
        self.redundant_op_count >= threshold && self.redundant_op_count >= self.index.len()
    }

    fn owned_entry(&self, key: &str, editor_id: u64) -> Result<&Entry> {
        match self.index.get(key) {
            Some(entry) if entry.current_editor == Some(editor_id) => Ok(entry),
            _ if self.closed => Err(CacheError::ClosedCache),
            _ => Err(CacheError::EditorDetached(key.to_string())),
        }
    }

    /// Publishes or drops the values written for `key`, then journals the result.
    fn finish_edit(
        &mut self,
        directory: &Path,
        value_count: usize,
        key: &str,
        outcome: EditOutcome,
    ) -> Result<bool> {
        let success = outcome == EditOutcome::Commit;
        let Some(entry) = self.index.get_mut(key) else {
            return Ok(false);
        };

        for slot in 0..value_count {
            let dirty = dirty_file(directory, key, slot);
            if !success {
                delete_if_exists(&dirty)?;
                continue;
            }
            // A value left unwritten on a re-edit keeps its published bytes
            if dirty.exists() {
                let clean = clean_file(directory, key, slot);
                fs::rename(&dirty, &clean)?;
                let old_length = entry.lengths[slot];
                let new_length = fs::metadata(&clean)?.len();
                entry.lengths[slot] = new_length;
                self.size = self.size - old_length + new_length;
            }
        }

        self.redundant_op_count += 1;
        entry.current_editor = None;

        let record = if entry.readable || success {
            entry.readable = true;
            if success {
                entry.sequence_number = self.next_sequence_number;
                self.next_sequence_number += 1;
            }
            JournalRecord::Clean {
                key: key.to_string(),
                lengths: entry.lengths.clone(),
            }
        } else {
            self.index.remove(key);
            JournalRecord::Remove(key.to_string())
        };

        self.journal_mut()?.append(&record)?;
        if outcome == EditOutcome::Discard {
            self.remove_entry(directory, key)?;
        }
        self.journal_mut()?.flush()?;

        if success {
            self.stats.record_commit();
            debug!(key, "Edit committed");
        } else {
            self.stats.record_abort();
            debug!(key, ?outcome, "Edit aborted");
        }
        Ok(success)
    }

    /// Deletes a published entry. Entries being edited are left alone.
    fn remove_entry(&mut self, directory: &Path, key: &str) -> Result<bool> {
        let (value_count, total_len) = match self.index.get(key) {
            Some(entry) if !entry.is_being_edited() => (entry.lengths.len(), entry.total_len()),
            _ => return Ok(false),
        };

        for slot in 0..value_count {
            delete_if_exists(&clean_file(directory, key, slot))?;
        }
        self.size -= total_len;
        self.index.remove(key);
        self.redundant_op_count += 1;
        self.journal_mut()?
            .append(&JournalRecord::Remove(key.to_string()))?;
        Ok(true)
    }

    // == Trim To Size ==
    /// Evicts least recently used entries until the size limit is respected.
    fn trim_to_size(&mut self, directory: &Path) -> Result<()> {
        while self.size > self.max_size {
            // Entries being edited cannot be evicted; skip past them
            let victim = self
                .index
                .iter()
                .find(|(_, entry)| entry.readable && !entry.is_being_edited())
                .map(|(key, _)| key.to_string());
            let Some(key) = victim else {
                break;
            };

            self.remove_entry(directory, &key)?;
            self.stats.record_eviction();
            debug!(key = %key, size = self.size, max_size = self.max_size, "Evicted entry");
        }
        Ok(())
    }

    // == Rebuild ==
    /// Replaces the journal with one line per live entry.
    fn rebuild_journal(&mut self, directory: &Path, header: &JournalHeader) -> Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.flush()?;
        }

        let records = self.index.iter().map(|(key, entry)| {
            if entry.is_being_edited() {
                JournalRecord::Dirty(key.to_string())
            } else {
                JournalRecord::Clean {
                    key: key.to_string(),
                    lengths: entry.lengths.clone(),
                }
            }
        });
        let writer = journal::rebuild(directory, header, records)?;

        info!(
            directory = %directory.display(),
            entries = self.index.len(),
            dropped = self.redundant_op_count,
            "Journal rebuilt"
        );
        self.journal = Some(writer);
        self.redundant_op_count = 0;
        self.stats.record_rebuild();
        Ok(())
    }

    // == Shut Down ==
    /// Aborts every in-flight edit, trims and flushes the journal for close.
    fn shut_down(&mut self, directory: &Path, value_count: usize) -> Result<()> {
        let editing: Vec<String> = self
            .index
            .iter()
            .filter(|(_, entry)| entry.is_being_edited())
            .map(|(key, _)| key.to_string())
            .collect();
        for key in editing {
            self.finish_edit(directory, value_count, &key, EditOutcome::Abort)?;
        }

        self.trim_to_size(directory)?;
        if let Some(mut journal) = self.journal.take() {
            journal.flush()?;
        }
        Ok(())
    }
}
