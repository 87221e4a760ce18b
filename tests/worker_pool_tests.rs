use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use funcache::{
    CacheError, CacheKey, FileCache, FileConfig, FileOptions, MemoryCache, MemoryOptions,
    WorkerPool,
};

#[test]
fn workers_compute_each_key_once() -> Result<()> {
    let pool = WorkerPool::new(4);
    let cache = MemoryCache::memory();
    let calls = Arc::new(AtomicUsize::new(0));
    let cube = {
        let calls = Arc::clone(&calls);
        cache.wrap_named("cube", MemoryOptions::default(), move |x: u64| {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            x.pow(3)
        })
    };

    cache.enable_multi_process(&pool, pool.size())?;
    let inputs: Vec<u64> = (0..10).cycle().take(200).collect();
    let results = pool.map(inputs.clone(), move |ctx, x| ctx.bind(&cube).call(x))?;

    assert_eq!(results, inputs.iter().map(|x| x.pow(3)).collect::<Vec<_>>());
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(cache.metrics().misses, 10);
    Ok(())
}

#[test]
fn parent_sees_worker_results() -> Result<()> {
    let pool = WorkerPool::new(2);
    let cache = MemoryCache::memory();
    let double = cache.wrap_named("double", MemoryOptions::default(), |x: i64| x * 2);
    let function = double.function_key().unwrap().clone();

    cache.enable_multi_process(&pool, 2)?;
    pool.map(vec![1i64, 2, 3], move |ctx, x| ctx.bind(&double).call(x))?;

    assert_eq!(cache.len(&function), 3);
    assert!(cache.contains(&function, &CacheKey::Int(3)));
    Ok(())
}

#[test]
fn without_sharing_workers_keep_private_stores() -> Result<()> {
    let pool = WorkerPool::new(2);
    let cache = MemoryCache::memory();
    let negate = cache.wrap_named("negate", MemoryOptions::default(), |x: i64| -x);
    let function = negate.function_key().unwrap().clone();

    pool.map(vec![1i64, 2], move |ctx, x| ctx.bind(&negate).call(x))?;
    assert_eq!(cache.len(&function), 0);
    Ok(())
}

#[test]
fn activation_is_per_worker() -> Result<()> {
    let pool = WorkerPool::new(1);
    let cache = MemoryCache::memory();
    let calls = Arc::new(AtomicUsize::new(0));
    let id = {
        let calls = Arc::clone(&calls);
        cache.wrap_named("id", MemoryOptions::default(), move |x: i64| {
            calls.fetch_add(1, Ordering::SeqCst);
            x
        })
    };

    cache.enable_multi_process(&pool, 1)?;
    let parent = cache.clone();
    let worker_active = pool.map(vec![0], move |ctx, _: i32| {
        let engine = ctx.engine(&parent);
        engine.deactivate();
        engine.is_active()
    })?;
    assert_eq!(worker_active, vec![false]);
    assert!(cache.is_active());

    let f = id.clone();
    pool.map(vec![7i64, 7], move |ctx, x| ctx.bind(&f).call(x))?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    id.call(7);
    id.call(7);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn deactivation_before_sharing_travels_to_workers() -> Result<()> {
    let pool = WorkerPool::new(2);
    let cache = MemoryCache::memory();
    cache.register("unused", MemoryOptions::default());
    cache.deactivate();
    cache.enable_multi_process(&pool, 2)?;

    let parent = cache.clone();
    let active = pool.map(vec![0, 1], move |ctx, _: i32| ctx.engine(&parent).is_active())?;
    assert!(active.iter().all(|active| !active));
    Ok(())
}

#[test]
fn file_cache_shares_and_flushes_worker_results() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let pool = WorkerPool::new(3);
    let cache = FileCache::file(FileConfig {
        root: dir.path().to_path_buf(),
        extension: None,
        flush_on_exit: false,
    });
    let square = cache.wrap_named("square", FileOptions::default(), |x: u64| x * x);

    cache.enable_multi_process(&pool, 3)?;
    pool.map(0..6u64, move |ctx, x| ctx.bind(&square).call(x))?;
    cache.flush()?;

    let stored = std::fs::read_to_string(dir.path().join("square.json"))?;
    assert!(stored.contains("{\"Int\":5},25"), "{stored}");
    Ok(())
}

#[test]
fn broadcast_to_more_workers_than_the_pool_fails() {
    let pool = WorkerPool::new(2);
    let cache = MemoryCache::memory();
    cache.register("f", MemoryOptions::default());
    let err = cache.enable_multi_process(&pool, 3).unwrap_err();
    assert!(matches!(err, CacheError::Broker(_)));
}
