//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;

use crate::cache::DEFAULT_REBUILD_THRESHOLD;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory exclusively owned by the cache
    pub directory: PathBuf,
    /// Application version written to the journal header
    pub app_version: u32,
    /// Number of value slots per entry
    pub value_count: usize,
    /// Maximum bytes of value data kept on disk
    pub max_size: u64,
    /// Redundant journal records tolerated before the journal is rebuilt
    pub rebuild_threshold: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DIR` - Cache directory (default: ./cache)
    /// - `CACHE_APP_VERSION` - Application version (default: 1)
    /// - `CACHE_VALUE_COUNT` - Values per entry (default: 2)
    /// - `CACHE_MAX_SIZE` - Maximum size in bytes (default: 10 MiB)
    /// - `CACHE_REBUILD_THRESHOLD` - Redundant records before compaction (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            directory: env::var("CACHE_DIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.directory),
            app_version: env::var("CACHE_APP_VERSION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.app_version),
            value_count: env::var("CACHE_VALUE_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.value_count),
            max_size: env::var("CACHE_MAX_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_size),
            rebuild_threshold: env::var("CACHE_REBUILD_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.rebuild_threshold),
        }
    }

    /// Creates a config for `directory` with the remaining values at their defaults.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./cache"),
            app_version: 1,
            value_count: 2,
            max_size: 10 * 1024 * 1024,
            rebuild_threshold: DEFAULT_REBUILD_THRESHOLD,
        }
    }
}
