//! Cache Statistics Module
//!
//! Tracks cache activity: hits, misses, commits, aborts, evictions and journal rebuilds.

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Stats ==
/// Tracks cache activity counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of `get` calls that returned a snapshot
    pub hits: u64,
    /// Number of `get` calls that found nothing readable
    pub misses: u64,
    /// Number of successful commits
    pub commits: u64,
    /// Number of aborted or discarded edits
    pub aborts: u64,
    /// Number of entries evicted to stay under the size limit
    pub evictions: u64,
    /// Number of times the journal was compacted
    pub journal_rebuilds: u64,
    /// When the journal was last compacted
    pub last_rebuild: Option<DateTime<Utc>>,
    /// Current number of entries in the index
    pub total_entries: usize,
    /// Current bytes of published values
    pub size: u64,
    /// Configured maximum size
    pub max_size: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if nothing has been read.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_commit(&mut self) {
        self.commits += 1;
    }

    pub fn record_abort(&mut self) {
        self.aborts += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    // == Record Rebuild ==
    /// Counts a journal rebuild and stamps its time.
    pub fn record_rebuild(&mut self) {
        self.journal_rebuilds += 1;
        self.last_rebuild = Some(Utc::now());
    }
}
