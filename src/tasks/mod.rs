//! Background Tasks Module
//!
//! Contains the background work the cache schedules while it is open.
//!
//! # Tasks
//! - Compaction: trims the cache to its size limit and rebuilds the journal

mod compaction;

pub use compaction::{Compact, CompactionWorker};
