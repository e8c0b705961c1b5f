//! Integration Tests for the Disk Cache
//!
//! Exercise the public API end to end against real directories: recovery
//! after unclean shutdown, corruption handling, background compaction and
//! concurrent use.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, sleep};
use std::time::Duration;

use disk_cache::cache::{JOURNAL_FILE, JOURNAL_FILE_BACKUP, JOURNAL_FILE_TEMP};
use disk_cache::models::ResponseMetadata;
use disk_cache::{CacheError, Config, DiskLruCache, ResponseCache};
use tempfile::TempDir;
use tokio::runtime::Runtime;

// == Helper Functions ==

const APP_VERSION: u32 = 100;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn open(dir: &Path, rt: &Runtime, max_size: u64) -> DiskLruCache {
    DiskLruCache::open(dir, APP_VERSION, 2, max_size, rt.handle().clone()).unwrap()
}

fn set(cache: &DiskLruCache, key: &str, a: &str, b: &str) {
    let mut editor = cache.edit(key).unwrap().unwrap();
    editor.set(0, a).unwrap();
    editor.set(1, b).unwrap();
    assert!(editor.commit().unwrap());
}

fn read(cache: &DiskLruCache, key: &str) -> Option<(String, String)> {
    let mut snapshot = cache.get(key).unwrap()?;
    Some((
        snapshot.read_string(0).unwrap(),
        snapshot.read_string(1).unwrap(),
    ))
}

fn journal(dir: &Path) -> String {
    fs::read_to_string(dir.join(JOURNAL_FILE)).unwrap()
}

fn write_journal(dir: &Path, body: &str) {
    let contents = format!("disk_cache.journal\n1\n{}\n2\n\n{}", APP_VERSION, body);
    fs::write(dir.join(JOURNAL_FILE), contents).unwrap();
}

/// Polls `condition` for up to two seconds.
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10));
    }
    condition()
}

// == Persistence ==

#[test]
fn test_round_trip_after_reopen() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "headers", "body bytes");
    set(&cache, "k2", "", "x");
    cache.close().unwrap();

    let cache = open(dir.path(), &rt, 1024);
    assert_eq!(read(&cache, "k1"), Some(("headers".into(), "body bytes".into())));
    assert_eq!(read(&cache, "k2"), Some(("".into(), "x".into())));
    let snapshot = cache.get("k1").unwrap().unwrap();
    assert_eq!(snapshot.lengths(), &[7, 10]);
    assert_eq!(cache.size(), 18);
}

#[test]
fn test_reopen_without_close_keeps_committed_entries() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    {
        let cache = open(dir.path(), &rt, 1024);
        set(&cache, "k1", "a", "b");
        // Dropped without close, as after a crash
    }

    let cache = open(dir.path(), &rt, 1024);
    assert_eq!(read(&cache, "k1"), Some(("a".into(), "b".into())));
}

#[test]
fn test_lru_order_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "a", "a", "a");
    set(&cache, "b", "b", "b");
    cache.get("a").unwrap().unwrap();
    cache.close().unwrap();

    let cache = open(dir.path(), &rt, 1024);
    assert_eq!(cache.keys().unwrap(), vec!["b", "a"]);
}

// == Recovery ==

#[test]
fn test_corrupted_header_recovers_empty() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "a", "b");
    cache.close().unwrap();
    fs::write(dir.path().join("unrelated"), "x").unwrap();

    let cache = DiskLruCache::open(dir.path(), APP_VERSION + 1, 2, 1024, rt.handle().clone())
        .unwrap();
    assert!(cache.get("k1").unwrap().is_none());
    assert_eq!(cache.size(), 0);
    assert!(cache.keys().unwrap().is_empty());
    assert!(!dir.path().join("k1.0").exists());
    assert!(!dir.path().join("k1.1").exists());
    assert!(!dir.path().join("unrelated").exists());
}

#[test]
fn test_value_count_mismatch_recovers_empty() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "a", "b");
    cache.close().unwrap();

    let cache = DiskLruCache::open(dir.path(), APP_VERSION, 1, 1024, rt.handle().clone()).unwrap();
    assert!(cache.get("k1").unwrap().is_none());
}

#[test]
fn test_invalid_journal_line_recovers_empty() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    fs::write(dir.path().join("k1.0"), "a").unwrap();
    fs::write(dir.path().join("k1.1"), "b").unwrap();
    write_journal(dir.path(), "CLEAN k1 1 1\nBOGUS k1\n");

    let cache = open(dir.path(), &rt, 1024);
    assert!(cache.get("k1").unwrap().is_none());
    assert!(!dir.path().join("k1.0").exists());
}

#[test]
fn test_wrong_value_count_in_record_recovers_empty() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    fs::write(dir.path().join("k1.0"), "a").unwrap();
    fs::write(dir.path().join("k1.1"), "b").unwrap();
    write_journal(dir.path(), "CLEAN k1 1 1 1\n");

    let cache = open(dir.path(), &rt, 1024);
    assert!(cache.get("k1").unwrap().is_none());
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_orphaned_dirty_entry_is_cleaned_on_open() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    fs::write(dir.path().join("k1.0"), "a").unwrap();
    fs::write(dir.path().join("k1.1"), "b").unwrap();
    fs::write(dir.path().join("k1.0.tmp"), "new").unwrap();
    fs::write(dir.path().join("k2.0.tmp"), "partial").unwrap();
    write_journal(
        dir.path(),
        "DIRTY k1\nCLEAN k1 1 1\nDIRTY k1\nDIRTY k2\n",
    );

    let cache = open(dir.path(), &rt, 1024);
    assert!(cache.get("k1").unwrap().is_none());
    assert!(cache.get("k2").unwrap().is_none());
    for name in ["k1.0", "k1.1", "k1.0.tmp", "k2.0.tmp"] {
        assert!(!dir.path().join(name).exists(), "{} should be deleted", name);
    }
    assert_eq!(cache.size(), 0);
}

#[test]
fn test_replay_applies_removes() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    fs::write(dir.path().join("k2.0"), "aa").unwrap();
    fs::write(dir.path().join("k2.1"), "bbb").unwrap();
    write_journal(
        dir.path(),
        "DIRTY k1\nCLEAN k1 1 1\nREMOVE k1\nDIRTY k2\nCLEAN k2 2 3\nREAD k2\nREAD k9\n",
    );

    let cache = open(dir.path(), &rt, 1024);
    assert_eq!(cache.keys().unwrap(), vec!["k2"]);
    assert_eq!(cache.size(), 5);
    assert_eq!(read(&cache, "k2"), Some(("aa".into(), "bbb".into())));
}

#[test]
fn test_missing_value_file_is_a_miss() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "a", "b");
    fs::remove_file(dir.path().join("k1.1")).unwrap();

    assert!(cache.get("k1").unwrap().is_none());
}

#[test]
fn test_backup_is_promoted_when_journal_missing() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "a", "b");
    cache.close().unwrap();
    fs::rename(dir.path().join(JOURNAL_FILE), dir.path().join(JOURNAL_FILE_BACKUP)).unwrap();

    let cache = open(dir.path(), &rt, 1024);
    assert_eq!(read(&cache, "k1"), Some(("a".into(), "b".into())));
    assert!(!dir.path().join(JOURNAL_FILE_BACKUP).exists());
    assert!(dir.path().join(JOURNAL_FILE).exists());
}

#[test]
fn test_backup_is_discarded_when_journal_present() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "a", "b");
    cache.close().unwrap();
    fs::write(dir.path().join(JOURNAL_FILE_BACKUP), "garbage\n").unwrap();
    fs::write(dir.path().join(JOURNAL_FILE_TEMP), "half written\n").unwrap();

    let cache = open(dir.path(), &rt, 1024);
    assert_eq!(read(&cache, "k1"), Some(("a".into(), "b".into())));
    assert!(!dir.path().join(JOURNAL_FILE_BACKUP).exists());
    assert!(!dir.path().join(JOURNAL_FILE_TEMP).exists());
}

// == Transactions ==

#[test]
fn test_snapshot_isolation() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "old-a", "old-b");

    let mut snapshot = cache.get("k1").unwrap().unwrap();
    set(&cache, "k1", "new-a", "new-b");

    assert_eq!(snapshot.read_string(0).unwrap(), "old-a");
    assert_eq!(snapshot.read_string(1).unwrap(), "old-b");
    assert_eq!(read(&cache, "k1"), Some(("new-a".into(), "new-b".into())));
}

#[test]
fn test_commit_is_atomic_across_slots() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "a1", "b1");

    let mut editor = cache.edit("k1").unwrap().unwrap();
    editor.set(0, "a2").unwrap();
    // Not visible before commit
    assert_eq!(read(&cache, "k1"), Some(("a1".into(), "b1".into())));
    editor.set(1, "b2").unwrap();
    assert_eq!(read(&cache, "k1"), Some(("a1".into(), "b1".into())));

    editor.commit().unwrap();
    assert_eq!(read(&cache, "k1"), Some(("a2".into(), "b2".into())));
}

#[test]
fn test_key_validation_does_not_mutate() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "a", "b");
    let before = journal(dir.path());

    let too_long = "a".repeat(121);
    for key in ["has space", "has\nnewline", "has/slash", "", too_long.as_str()] {
        assert!(matches!(cache.edit(key), Err(CacheError::InvalidKey(_))));
        assert!(matches!(cache.get(key), Err(CacheError::InvalidKey(_))));
        assert!(matches!(cache.remove(key), Err(CacheError::InvalidKey(_))));
    }

    cache.flush().unwrap();
    assert_eq!(journal(dir.path()), before);
    assert_eq!(cache.keys().unwrap(), vec!["k1"]);
    assert!(cache.edit(&"a".repeat(120)).unwrap().is_some());
}

// == Lifecycle ==

#[test]
fn test_close_is_idempotent_and_keeps_data() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    set(&cache, "k1", "a", "b");
    cache.close().unwrap();
    cache.close().unwrap();

    assert!(dir.path().join("k1.0").exists());
    let cache = open(dir.path(), &rt, 1024);
    assert_eq!(read(&cache, "k1"), Some(("a".into(), "b".into())));
}

#[test]
fn test_operations_after_close_fail() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 1024);
    let clone = cache.clone();
    cache.close().unwrap();

    assert!(matches!(clone.get("k1"), Err(CacheError::ClosedCache)));
    assert!(matches!(clone.keys(), Err(CacheError::ClosedCache)));
    assert!(matches!(clone.evict_all(), Err(CacheError::ClosedCache)));
    assert!(matches!(clone.set_max_size(5), Err(CacheError::ClosedCache)));
}

#[test]
fn test_delete_removes_directory() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    let cache_dir = dir.path().join("cache");

    let cache = open(&cache_dir, &rt, 1024);
    set(&cache, "k1", "a", "b");
    fs::write(cache_dir.join("foreign"), "x").unwrap();

    cache.delete().unwrap();
    assert!(!cache_dir.exists());
    assert!(cache.is_closed());
}

#[test]
fn test_open_creates_missing_directory() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    let nested = dir.path().join("a").join("b");

    let cache = open(&nested, &rt, 1024);
    set(&cache, "k1", "a", "b");
    assert!(nested.join(JOURNAL_FILE).exists());
}

// == Background Compaction ==

#[test]
fn test_growth_evicts_in_background() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 10);
    set(&cache, "a", "a", "aa");
    set(&cache, "b", "b", "bb");
    set(&cache, "c", "c", "cc");
    set(&cache, "b", "b", "bbbb");

    assert!(eventually(|| cache.size() <= 10));
    assert_eq!(cache.size(), 8);
    assert!(cache.get("a").unwrap().is_none());
}

#[test]
fn test_lowering_max_size_evicts_in_background() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();

    let cache = open(dir.path(), &rt, 100);
    set(&cache, "a", "aaaa", "aaaa");
    set(&cache, "b", "bbbb", "bbbb");

    cache.set_max_size(1000).unwrap();
    assert_eq!(cache.size(), 16);

    cache.set_max_size(10).unwrap();
    assert!(eventually(|| cache.size() <= 10));
    assert_eq!(cache.keys().unwrap(), vec!["b"]);
    assert_eq!(cache.max_size(), 10);
}

#[test]
fn test_reads_trigger_journal_rebuild() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    let config = Config {
        directory: dir.path().to_path_buf(),
        app_version: APP_VERSION,
        value_count: 2,
        max_size: 1024,
        rebuild_threshold: 50,
    };

    let cache = DiskLruCache::from_config(&config, rt.handle().clone()).unwrap();
    set(&cache, "k1", "a", "b");
    for _ in 0..200 {
        cache.get("k1").unwrap().unwrap();
    }

    // A pass is always queued while the threshold is exceeded
    assert!(eventually(|| {
        cache.flush().unwrap();
        journal(dir.path()).lines().count() < 100
    }));
    assert!(cache.stats().journal_rebuilds > 0);

    cache.close().unwrap();
    let cache = open(dir.path(), &rt, 1024);
    assert_eq!(read(&cache, "k1"), Some(("a".into(), "b".into())));
}

// == Concurrency ==

#[test]
fn test_concurrent_writers_and_readers() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    let cache = Arc::new(open(dir.path(), &rt, 1024 * 1024));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("k{}", i % 5);
                    let value = format!("{}-{}", t, i);
                    if let Some(mut editor) = cache.edit(&key).unwrap() {
                        editor.set(0, &value).unwrap();
                        editor.set(1, &value).unwrap();
                        editor.commit().unwrap();
                    }
                    if let Some(mut snapshot) = cache.get(&key).unwrap() {
                        // Both slots always come from the same commit
                        let a = snapshot.read_string(0).unwrap();
                        let b = snapshot.read_string(1).unwrap();
                        assert_eq!(a, b);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread should not panic");
    }

    let mut expected = 0;
    for key in cache.keys().unwrap() {
        let snapshot = cache.get(&key).unwrap().unwrap();
        expected += snapshot.lengths().iter().sum::<u64>();
    }
    assert_eq!(cache.size(), expected);
}

// == Response Cache ==

#[test]
fn test_response_cache_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let rt = runtime();
    let url = "https://example.com/index.html";
    let metadata = ResponseMetadata::new("GET", 200).with_header("Content-Length", "5");

    let cache = ResponseCache::open(dir.path(), 1, 1024 * 1024, rt.handle().clone()).unwrap();
    assert!(cache.put(url, &metadata, b"hello").unwrap());
    cache.close().unwrap();

    let cache = ResponseCache::open(dir.path(), 1, 1024 * 1024, rt.handle().clone()).unwrap();
    let response = cache.get(url).unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.metadata.header("content-length"), Some("5"));
    assert_eq!(response.body_text(), "hello");
}
