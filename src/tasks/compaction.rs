//! Compaction Worker
//!
//! The single background task that trims the cache to size and rebuilds the
//! journal when it has accumulated enough redundant records.

use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;

// == Compact Trait ==
/// Work performed by the compaction worker.
pub trait Compact: Send + Sync + 'static {
    /// Runs one blocking compaction pass.
    fn compact(&self) -> Result<()>;
}

// == Compaction Worker ==
/// Handle on the background compaction task.
///
/// Requests coalesce: scheduling while a pass is queued or running results
/// in at most one further pass. Passes never overlap.
#[derive(Debug)]
pub struct CompactionWorker {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl CompactionWorker {
    /// Spawns the worker on `handle`. The worker holds only a weak reference
    /// to `target` and exits once the target is dropped.
    pub fn spawn<T: Compact>(handle: &Handle, target: Weak<T>) -> Self {
        let notify = Arc::new(Notify::new());
        let signal = Arc::clone(&notify);

        let task = handle.spawn(async move {
            debug!("Compaction worker started");

            loop {
                signal.notified().await;

                let Some(strong) = target.upgrade() else {
                    break;
                };

                match tokio::task::spawn_blocking(move || strong.compact()).await {
                    Ok(Ok(())) => debug!("Compaction pass finished"),
                    Ok(Err(e)) => warn!(error = %e, "Compaction pass failed"),
                    Err(e) => error!(error = %e, "Compaction pass panicked"),
                }
            }

            info!("Compaction worker stopped");
        });

        Self { notify, task }
    }

    /// Requests a compaction pass without waiting for it.
    pub fn schedule(&self) {
        self.notify.notify_one();
    }

    /// Stops the worker. A pass already running on the blocking pool finishes.
    pub fn shutdown(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CompactionWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
