use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use funcache::{CacheKey, MemoryCache, MemoryConfig, MemoryOptions};

#[test]
fn store_never_exceeds_capacity() {
    let cache = MemoryCache::memory();
    let identity = cache.wrap_named("identity", MemoryOptions::with_capacity(3), |x: i64| x);
    let function = identity.function_key().unwrap().clone();

    for x in 0..20 {
        identity.call(x);
        assert!(cache.len(&function) <= 3);
    }
    assert_eq!(cache.len(&function), 3);
    assert_eq!(cache.metrics().evictions, 17);
}

#[test]
fn least_recently_used_entry_is_evicted() {
    let cache = MemoryCache::memory();
    let calls = Arc::new(AtomicUsize::new(0));
    let tracked = {
        let calls = Arc::clone(&calls);
        cache.wrap_named("tracked", MemoryOptions::with_capacity(2), move |x: i64| {
            calls.fetch_add(1, Ordering::SeqCst);
            x * 10
        })
    };
    let function = tracked.function_key().unwrap().clone();

    tracked.call(1);
    tracked.call(2);
    // 1 becomes most recent, so 2 is the victim.
    tracked.call(1);
    tracked.call(3);

    assert!(cache.contains(&function, &CacheKey::Int(1)));
    assert!(!cache.contains(&function, &CacheKey::Int(2)));
    assert!(cache.contains(&function, &CacheKey::Int(3)));

    tracked.call(2);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(!cache.contains(&function, &CacheKey::Int(1)));
}

#[test]
fn default_capacity_comes_from_config() {
    let cache = MemoryCache::memory_with(MemoryConfig {
        default_capacity: 4,
    });
    let f = cache.wrap_named("bounded", MemoryOptions::default(), |x: u8| u32::from(x));
    let function = f.function_key().unwrap().clone();
    for x in 0..10 {
        f.call(x);
    }
    assert_eq!(cache.len(&function), 4);
}

#[test]
fn functions_are_bounded_independently() {
    let cache = MemoryCache::memory();
    let a = cache.wrap_named("a", MemoryOptions::with_capacity(1), |x: i32| x);
    let b = cache.wrap_named("b", MemoryOptions::with_capacity(5), |x: i32| -x);
    for x in 0..5 {
        a.call(x);
        b.call(x);
    }
    assert_eq!(cache.len(a.function_key().unwrap()), 1);
    assert_eq!(cache.len(b.function_key().unwrap()), 5);
}
