//! Disk Cache - command-line inspection tool
//!
//! Opens a cache directory and runs one command against it, printing JSON.
//!
//! # Usage
//! ```text
//! disk_cache stats          # counters, size and entry count
//! disk_cache keys           # readable keys, least recently used first
//! disk_cache show <key>     # value lengths and UTF-8 previews of one entry
//! disk_cache remove <key>   # drop one entry
//! disk_cache trim           # evict down to the size limit and compact
//! disk_cache clear          # drop every entry
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use disk_cache::{Config, DiskLruCache};

/// Longest value prefix printed by `show`.
const PREVIEW_BYTES: usize = 256;

/// Inspect and maintain a disk cache directory.
#[derive(Debug, Parser)]
#[command(name = "disk_cache", version, about)]
struct Cli {
    /// Cache directory
    #[arg(long, env = "CACHE_DIR")]
    dir: Option<PathBuf>,

    /// Maximum bytes of value data to keep
    #[arg(long, env = "CACHE_MAX_SIZE")]
    max_size: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Print counters, size and entry count
    Stats,
    /// List readable keys, least recently used first
    Keys,
    /// Print value lengths and previews of one entry
    Show { key: String },
    /// Drop one entry
    Remove { key: String },
    /// Evict down to the size limit and compact the journal
    Trim,
    /// Drop every entry
    Clear,
}

impl Cli {
    /// Layers the command-line overrides on top of `config`.
    fn apply(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.dir {
            config.directory = dir.clone();
        }
        if let Some(max_size) = self.max_size {
            config.max_size = max_size;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "disk_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.apply(Config::from_env());
    info!(
        "Configuration loaded: directory={}, app_version={}, value_count={}, max_size={}",
        config.directory.display(),
        config.app_version,
        config.value_count,
        config.max_size
    );

    let handle = tokio::runtime::Handle::current();
    let cache = tokio::task::spawn_blocking(move || DiskLruCache::from_config(&config, handle))
        .await?
        .context("failed to open cache")?;

    let command = cli.command;
    let worker_cache = cache.clone();
    let output = tokio::task::spawn_blocking(move || run(&worker_cache, &command)).await??;

    println!("{}", serde_json::to_string_pretty(&output)?);
    cache.close().context("failed to close cache")?;
    Ok(())
}

fn run(cache: &DiskLruCache, command: &Command) -> anyhow::Result<serde_json::Value> {
    let output = match command {
        Command::Stats => serde_json::to_value(cache.stats())?,
        Command::Keys => json!(cache.keys()?),
        Command::Show { key } => match cache.get(key)? {
            Some(mut snapshot) => {
                let mut previews = Vec::with_capacity(snapshot.value_count());
                for slot in 0..snapshot.value_count() {
                    let bytes = snapshot.read_bytes(slot)?;
                    let end = bytes.len().min(PREVIEW_BYTES);
                    previews.push(String::from_utf8_lossy(&bytes[..end]).into_owned());
                }
                json!({
                    "key": key,
                    "sequence_number": snapshot.sequence_number(),
                    "lengths": snapshot.lengths(),
                    "previews": previews,
                })
            }
            None => json!({ "key": key, "found": false }),
        },
        Command::Remove { key } => json!({ "key": key, "removed": cache.remove(key)? }),
        Command::Trim => {
            cache.flush()?;
            cache.compact_now()?;
            serde_json::to_value(cache.stats())?
        }
        Command::Clear => {
            cache.evict_all()?;
            serde_json::to_value(cache.stats())?
        }
    };
    Ok(output)
}
