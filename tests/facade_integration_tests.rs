//! Integration Tests for the Cache Facade
//!
//! Drives `get_or_compute` end to end over the memory backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, sleep};
use std::time::Duration;

use thiserror::Error;
use ycache::{CacheConfig, CacheError, CacheFacade, CallArgs};

// == Helper Types ==

#[derive(Debug, Error, PartialEq)]
enum AppError {
    #[error("upstream failed with code {0}")]
    Upstream(u32),
    #[error("cache: {0}")]
    Cache(String),
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::Cache(err.to_string())
    }
}

fn facade(config: CacheConfig) -> CacheFacade {
    CacheFacade::memory(&config).unwrap()
}

/// Computes `n * n`, counting invocations.
fn square(cache: &CacheFacade, calls: &AtomicUsize, n: i64) -> i64 {
    cache
        .get_or_compute(&CallArgs::new("square").arg(&n), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(n * n)
        })
        .unwrap()
}

// == TTL ==

#[test]
fn test_ttl_expiry_recomputes() {
    let cache = facade(CacheConfig::memory().with_ttl(Some(Duration::from_secs(1))));
    let calls = AtomicUsize::new(0);

    assert_eq!(square(&cache, &calls, 1), 1);
    assert_eq!(square(&cache, &calls, 1), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(1100));

    assert_eq!(square(&cache, &calls, 1), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let stats = cache.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.expirations, 1);
}

#[test]
fn test_per_call_ttl_override() {
    let cache = facade(CacheConfig::memory().with_ttl(None));
    let call = CallArgs::new("short_lived");
    let calls = AtomicUsize::new(0);
    let compute = || {
        cache
            .get_or_compute_with_ttl(&call, Some(Duration::from_millis(300)), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>("v".to_string())
            })
            .unwrap()
    };

    compute();
    compute();
    sleep(Duration::from_millis(400));
    compute();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// == LRU ==

#[test]
fn test_lru_keeps_recently_used() {
    let cache = facade(CacheConfig::memory().with_maxsize(Some(2)).with_ttl(None));
    let calls = AtomicUsize::new(0);

    square(&cache, &calls, 1); // A
    square(&cache, &calls, 2); // B
    square(&cache, &calls, 1); // touch A
    square(&cache, &calls, 3); // C evicts B
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    square(&cache, &calls, 1);
    square(&cache, &calls, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    square(&cache, &calls, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(cache.stats().evictions, 2);
}

#[test]
fn test_zero_maxsize_passes_through() {
    let cache = facade(CacheConfig::memory().with_maxsize(Some(0)));
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        assert_eq!(square(&cache, &calls, 4), 16);
    }

    assert!(cache.is_disabled());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().hits + cache.stats().misses, 0);
}

// == Single-flight ==

#[test]
fn test_concurrent_callers_share_one_computation() {
    let cache = facade(CacheConfig::memory());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(100));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_compute(&CallArgs::new("slow").arg("report"), || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(100));
                        Ok::<_, CacheError>(vec![1u32, 2, 3])
                    })
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![1, 2, 3]);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_follower_counts_a_single_miss() {
    let cache = facade(CacheConfig::memory());
    let call = CallArgs::new("shared");

    let leader = {
        let cache = cache.clone();
        let call = call.clone();
        thread::spawn(move || {
            cache
                .get_or_compute(&call, || {
                    sleep(Duration::from_millis(300));
                    Ok::<_, CacheError>(7u8)
                })
                .unwrap()
        })
    };

    sleep(Duration::from_millis(100));
    let value: u8 = cache.get_or_compute(&call, || Ok::<_, CacheError>(0)).unwrap();

    assert_eq!(value, 7);
    assert_eq!(leader.join().unwrap(), 7);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (0, 2));
}

#[test]
fn test_bounded_wait_falls_through() {
    let config = CacheConfig::memory().with_single_flight(true, Some(Duration::from_millis(50)));
    let cache = facade(config);
    let calls = Arc::new(AtomicUsize::new(0));

    let leader = {
        let cache = cache.clone();
        let calls = Arc::clone(&calls);
        thread::spawn(move || {
            cache
                .get_or_compute(&CallArgs::new("stuck"), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(500));
                    Ok::<_, CacheError>(1u8)
                })
                .unwrap()
        })
    };

    // Let the leader start its slow producer first
    sleep(Duration::from_millis(150));
    let value = cache
        .get_or_compute(&CallArgs::new("stuck"), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(2u8)
        })
        .unwrap();

    assert_eq!(value, 2);
    assert_eq!(leader.join().unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// == Errors ==

#[test]
fn test_producer_error_propagates_and_is_not_cached() {
    let cache = facade(CacheConfig::memory());
    let call = CallArgs::new("fetch").kwarg("id", &7);

    let first: Result<String, AppError> = cache.get_or_compute(&call, || Err(AppError::Upstream(503)));
    assert_eq!(first, Err(AppError::Upstream(503)));
    assert!(cache.is_empty());

    let second: Result<String, AppError> = cache.get_or_compute(&call, || Ok("ok".to_string()));
    assert_eq!(second, Ok("ok".to_string()));
}

#[test]
fn test_unsupported_argument_reaches_caller() {
    let cache = facade(CacheConfig::memory());
    let nested = std::collections::BTreeMap::from([(vec![1u8], 1u8)]);

    let result: Result<u8, AppError> =
        cache.get_or_compute(&CallArgs::new("f").arg(&nested), || Ok(1));

    assert!(matches!(result, Err(AppError::Cache(msg)) if msg.contains("unhashable")));
}

// == Fingerprinting ==

#[test]
fn test_type_sensitivity() {
    let typed = facade(CacheConfig::memory().with_type_sensitive(true));
    let untyped = facade(CacheConfig::memory().with_type_sensitive(false));

    for cache in [&typed, &untyped] {
        let _: String = cache
            .get_or_compute(&CallArgs::new("f").arg(&1), || Ok::<_, CacheError>("int".into()))
            .unwrap();
    }

    let typed_float: String = typed
        .get_or_compute(&CallArgs::new("f").arg(&1.0), || Ok::<_, CacheError>("float".into()))
        .unwrap();
    let untyped_float: String = untyped
        .get_or_compute(&CallArgs::new("f").arg(&1.0), || Ok::<_, CacheError>("float".into()))
        .unwrap();

    assert_eq!(typed_float, "float");
    assert_eq!(untyped_float, "int");
}

#[test]
fn test_keyword_order_shares_entry() {
    let cache = facade(CacheConfig::memory());
    let calls = AtomicUsize::new(0);
    let run = |call: CallArgs| {
        cache
            .get_or_compute(&call, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(0u8)
            })
            .unwrap()
    };

    run(CallArgs::new("f").kwarg("a", &1).kwarg("b", "x"));
    run(CallArgs::new("f").kwarg("b", "x").kwarg("a", &1));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// == Async Adapter ==

#[tokio::test(flavor = "multi_thread")]
async fn test_async_adapter_caches() {
    let cache = facade(CacheConfig::memory());
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let counter = Arc::clone(&calls);
        let value: u64 = cache
            .get_or_compute_async(CallArgs::new("async").arg(&5u64), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(120)
            })
            .await
            .unwrap();
        assert_eq!(value, 120);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_async_adapter_propagates_producer_error() {
    let cache = facade(CacheConfig::memory());

    let result: Result<u8, AppError> = tokio_test::block_on(
        cache.get_or_compute_async(CallArgs::new("failing"), || Err(AppError::Upstream(500))),
    );

    assert_eq!(result, Err(AppError::Upstream(500)));
    tokio_test::assert_ok!(cache.flush());
}
