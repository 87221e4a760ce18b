use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use funcache::{
    CacheKey, FileCache, FileConfig, FileOptions, JsonCodec, Snapshot, SnapshotCodec, StorePhase,
};
use serde_json::json;

fn temp_cache_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("funcache-test")
        .tempdir()
        .expect("failed to create temp dir")
}

fn file_cache(root: &Path) -> FileCache {
    FileCache::file(FileConfig {
        root: root.to_path_buf(),
        extension: None,
        flush_on_exit: false,
    })
}

fn read_store(path: &Path) -> Result<Snapshot> {
    Ok(JsonCodec.decode(&fs::read(path)?)?)
}

#[test]
fn results_survive_a_restart() -> Result<()> {
    let dir = temp_cache_dir();
    let calls = Arc::new(AtomicUsize::new(0));
    let square = |cache: &FileCache| {
        let calls = Arc::clone(&calls);
        cache.wrap_named("square", FileOptions::default(), move |x: i64| {
            calls.fetch_add(1, Ordering::SeqCst);
            x * x
        })
    };

    let first = file_cache(dir.path());
    let f = square(&first);
    assert_eq!(f.call(3), 9);
    assert_eq!(f.call(4), 16);
    first.flush()?;

    let path = dir.path().join("square.json");
    assert_eq!(first.cache_path(f.function_key().unwrap()), Some(path.clone()));
    assert_eq!(read_store(&path)?.len(), 2);

    let second = file_cache(dir.path());
    let g = square(&second);
    assert_eq!(g.call(3), 9);
    assert_eq!(g.call(4), 16);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn flush_merges_entries_written_by_siblings() -> Result<()> {
    let dir = temp_cache_dir();
    let a = file_cache(dir.path());
    let b = file_cache(dir.path());
    let fa = a.wrap_named("shared", FileOptions::default(), |x: i64| x + 1);
    let fb = b.wrap_named("shared", FileOptions::default(), |x: i64| x + 1);

    // Both load the same, still missing, file.
    fa.call(1);
    fb.call(2);
    a.flush()?;
    b.flush()?;

    let stored = read_store(&dir.path().join("shared.json"))?;
    assert_eq!(stored.get(&CacheKey::Int(1)), Some(&json!(2)));
    assert_eq!(stored.get(&CacheKey::Int(2)), Some(&json!(3)));
    assert_eq!(b.metrics().merged, 1);
    assert!(b.contains(fb.function_key().unwrap(), &CacheKey::Int(1)));
    assert_eq!(b.phase(fb.function_key().unwrap()), Some(StorePhase::Flushed));
    Ok(())
}

#[test]
fn in_memory_value_wins_over_disk() -> Result<()> {
    let dir = temp_cache_dir();
    let path = dir.path().join("versioned.json");
    let mut on_disk = Snapshot::new();
    on_disk.insert(CacheKey::Int(1), json!("old"));
    on_disk.insert(CacheKey::Int(2), json!("kept"));

    let cache = file_cache(dir.path());
    let f = cache.wrap_named("versioned", FileOptions::default(), |_: i64| "new".to_string());
    f.call(1);
    fs::write(&path, JsonCodec.encode(&on_disk)?)?;
    cache.flush()?;

    let stored = read_store(&path)?;
    assert_eq!(stored.get(&CacheKey::Int(1)), Some(&json!("new")));
    assert_eq!(stored.get(&CacheKey::Int(2)), Some(&json!("kept")));
    Ok(())
}

#[test]
fn malformed_file_is_overwritten_on_flush() -> Result<()> {
    let dir = temp_cache_dir();
    let path = dir.path().join("fragile.json");
    fs::write(&path, b"{\"entries\": 12}")?;

    let cache = file_cache(dir.path());
    let f = cache.wrap_named("fragile", FileOptions::default(), |x: u32| x);
    assert_eq!(f.call(6), 6);
    fs::write(&path, b"garbage")?;
    cache.flush()?;

    let stored = read_store(&path)?;
    assert_eq!(stored.len(), 1);
    assert_eq!(cache.metrics().merged, 0);
    Ok(())
}

#[test]
fn explicit_path_is_used_verbatim() -> Result<()> {
    let dir = temp_cache_dir();
    let path = dir.path().join("nested").join("deeper").join("custom.store");
    let cache = file_cache(dir.path());
    let f = cache.wrap_named("custom", FileOptions::at(&path), |s: String| s.len());

    assert_eq!(f.call("four".to_string()), 4);
    cache.flush()?;

    assert!(path.is_file());
    assert!(!dir.path().join("custom.json").exists());
    assert_eq!(read_store(&path)?.get(&CacheKey::Str("four".into())), Some(&json!(4)));
    Ok(())
}

#[test]
fn deactivated_cache_persists_nothing_new() -> Result<()> {
    let dir = temp_cache_dir();
    let cache = file_cache(dir.path());
    let f = cache.wrap_named("idle", FileOptions::default(), |x: i64| x);
    cache.deactivate();
    f.call(1);
    cache.flush()?;
    assert!(!dir.path().join("idle.json").exists());
    Ok(())
}

#[test]
fn flush_reports_unwritable_paths() -> Result<()> {
    let dir = temp_cache_dir();
    let parent = dir.path().join("later-a-file");
    let cache = file_cache(dir.path());
    let f = cache.wrap_named(
        "blocked",
        FileOptions::at(parent.join("store.json")),
        |x: i64| x,
    );
    f.call(1);
    fs::write(&parent, b"a file, not a directory")?;

    assert!(cache.flush().is_err());
    assert_eq!(cache.metrics().flushes, 0);
    Ok(())
}

#[test]
fn unencodable_results_stay_cached_in_memory() -> Result<()> {
    let dir = temp_cache_dir();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = file_cache(dir.path());
    let counted = Arc::clone(&calls);
    // Tuple keys have no JSON object form.
    let grid = cache.wrap_named("grid", FileOptions::default(), move |n: i32| {
        counted.fetch_add(1, Ordering::SeqCst);
        HashMap::from([((n, n), n * n)])
    });

    for _ in 0..3 {
        assert_eq!(grid.call(2), HashMap::from([((2, 2), 4)]));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.metrics().hits, 2);

    cache.flush()?;
    assert!(read_store(&dir.path().join("grid.json"))?.is_empty());
    Ok(())
}

#[test]
fn failed_load_bypasses_the_cache() -> Result<()> {
    let dir = temp_cache_dir();
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = file_cache(dir.path());
    let counted = Arc::clone(&calls);
    // Reading a directory fails with an error other than "not found".
    let f = cache.wrap_named("unreadable", FileOptions::at(dir.path()), move |x: i64| {
        counted.fetch_add(1, Ordering::SeqCst);
        x
    });

    assert_eq!(f.call(1), 1);
    assert_eq!(f.call(1), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.metrics().bypasses, 2);
    assert!(!cache.is_initialized());
    assert!(cache.initialize().is_err());
    Ok(())
}
