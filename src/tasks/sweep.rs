//! TTL Sweep Task
//!
//! Background task that periodically removes expired cache entries so that
//! entries nobody reads again still get reclaimed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheBackend;

/// Spawns a background task that calls `sweep_expired` on `cache` every
/// `interval`.
///
/// Sweeps run on the blocking pool since the disk backend does file I/O.
/// A failed sweep is logged and retried at the next tick.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let store: Arc<dyn CacheBackend> = Arc::new(MemoryCacheStore::new(None, SizeUnit::Entries));
/// let sweep_handle = spawn_sweep_task(store.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(cache: Arc<dyn CacheBackend>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "starting TTL sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let backend = Arc::clone(&cache);
            match tokio::task::spawn_blocking(move || backend.sweep_expired()).await {
                Ok(Ok(removed)) if removed > 0 => {
                    info!(removed, "TTL sweep: removed expired entries");
                }
                Ok(Ok(_)) => debug!("TTL sweep: no expired entries found"),
                Ok(Err(e)) => warn!(error = %e, "TTL sweep failed"),
                Err(e) => warn!(error = %e, "TTL sweep task panicked"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, MemoryCacheStore};
    use crate::config::SizeUnit;

    fn store() -> Arc<dyn CacheBackend> {
        Arc::new(MemoryCacheStore::new(None, SizeUnit::Entries))
    }

    #[tokio::test]
    async fn test_sweep_task_removes_expired_entries() {
        let cache = store();
        let key = CacheKey::for_label("expire_soon");
        cache.put(&key, b"value".to_vec(), Some(Duration::from_millis(300))).unwrap();

        let handle = spawn_sweep_task(Arc::clone(&cache), Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(1000)).await;

        // Removed by the sweep, not by a read
        assert!(cache.is_empty(), "expired entry should have been swept");
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.stats().misses, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_task_preserves_valid_entries() {
        let cache = store();
        let key = CacheKey::for_label("long_lived");
        cache.put(&key, b"value".to_vec(), Some(Duration::from_secs(3600))).unwrap();

        let handle = spawn_sweep_task(Arc::clone(&cache), Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(cache.get(&key).unwrap(), Some(b"value".to_vec()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_task_can_be_aborted() {
        let handle = spawn_sweep_task(store(), Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
