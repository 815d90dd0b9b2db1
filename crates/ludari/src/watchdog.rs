//! Deadlock watchdog.
//!
//! A crashed or stalled firing leaves its entry in `active_locks` forever.
//! The watchdog sweeps the table once a minute and force-releases anything
//! older than twice its TTL. By then the cache has long expired the lock
//! anyway, so the release is mostly about dropping the bookkeeping entry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use ludari_cache::Cache;

use crate::manager::{ActiveLock, ManagerInner};

/// Sweep cadence.
pub(crate) const WATCHDOG_INTERVAL_SECS: u64 = 60;

/// Age multiplier over the lock TTL before a lock counts as stale.
const STALE_FACTOR: u64 = 2;

/// Start the background sweeper. It holds only a `Weak` reference and exits
/// once the Manager is gone; `destroy()` also aborts it directly.
pub(crate) fn start(inner: &Arc<ManagerInner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(WATCHDOG_INTERVAL_SECS));
        // the first tick of a tokio interval fires immediately; skip it
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.is_destroyed() {
                break;
            }
            sweep_stale_locks(&inner).await;
            // the cache's compaction hook rides the same ticker
            inner.cache.cleanup().await;
        }
    })
}

/// One sweep: release every lock older than `2 × ttl`, then report what is
/// still held. Entries are dropped whether or not the release succeeded so
/// repeated failures cannot accumulate.
pub(crate) async fn sweep_stale_locks(inner: &Arc<ManagerInner>) {
    let now = Instant::now();
    let stale: Vec<(String, ActiveLock)> = {
        let locks = inner.active_locks.lock().expect("active locks poisoned");
        locks
            .iter()
            .filter(|(_, lock)| {
                now.duration_since(lock.acquired_at).as_millis() as u64
                    > STALE_FACTOR * lock.ttl_ms
            })
            .map(|(key, lock)| (key.clone(), lock.clone()))
            .collect()
    };

    for (key, lock) in stale {
        let released = inner.cache.release_lock(&key, &lock.lock_value).await;
        inner
            .active_locks
            .lock()
            .expect("active locks poisoned")
            .remove(&key);
        if released {
            inner.log_debug(&format!("released stale lock for job '{}'", lock.job_name));
        } else {
            inner.log_debug(&format!(
                "stale lock for job '{}' was already gone",
                lock.job_name
            ));
        }
    }

    let summary: Vec<String> = inner
        .active_locks
        .lock()
        .expect("active locks poisoned")
        .values()
        .map(|lock| {
            format!(
                "{}:{}s",
                lock.job_name,
                now.duration_since(lock.acquired_at).as_secs()
            )
        })
        .collect();
    if !summary.is_empty() {
        inner.log_debug(&format!("active locks: {}", summary.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ludari_cache::{Cache, LockOptions, MemoryCache};
    use ludari_core::TracingLogger;
    use ludari_storage::MemoryStorage;

    use crate::config::ManagerOptions;
    use crate::manager::Manager;

    fn manager_with_cache(cache: Arc<MemoryCache>) -> Manager {
        Manager::new(
            ManagerOptions::new(Arc::new(MemoryStorage::new()), Arc::new(TracingLogger))
                .cache(cache)
                .replica_id("watchdog-test-replica"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stale_locks_are_released_and_forgotten() {
        let cache = Arc::new(MemoryCache::new());
        let manager = manager_with_cache(Arc::clone(&cache));

        // R1 acquires and then "crashes": the entry stays in active_locks
        let got = cache
            .acquire_lock("slow-job", LockOptions::ttl_ms(1_000))
            .await;
        let value = got.lock_value.unwrap();
        manager
            .inner
            .active_locks
            .lock()
            .unwrap()
            .insert(
                "slow-job".into(),
                ActiveLock {
                    lock_value: value,
                    acquired_at: Instant::now() - Duration::from_millis(2_500),
                    ttl_ms: 1_000,
                    job_name: "slow-job".into(),
                },
            );

        sweep_stale_locks(&manager.inner).await;

        assert!(manager.inner.active_locks.lock().unwrap().is_empty());
        // another replica can take the lock now
        let retry = cache
            .acquire_lock("slow-job", LockOptions::ttl_ms(1_000))
            .await;
        assert!(retry.acquired);
    }

    #[tokio::test]
    async fn young_locks_are_left_alone() {
        let cache = Arc::new(MemoryCache::new());
        let manager = manager_with_cache(Arc::clone(&cache));

        let got = cache
            .acquire_lock("busy-job", LockOptions::ttl_ms(60_000))
            .await;
        manager.inner.active_locks.lock().unwrap().insert(
            "busy-job".into(),
            ActiveLock {
                lock_value: got.lock_value.unwrap(),
                acquired_at: Instant::now(),
                ttl_ms: 60_000,
                job_name: "busy-job".into(),
            },
        );

        sweep_stale_locks(&manager.inner).await;

        assert_eq!(manager.inner.active_locks.lock().unwrap().len(), 1);
        // the lock itself is untouched
        assert!(
            !cache
                .acquire_lock("busy-job", LockOptions::ttl_ms(1_000))
                .await
                .acquired
        );
    }

    #[tokio::test]
    async fn entry_is_dropped_even_when_the_lock_is_gone() {
        let cache = Arc::new(MemoryCache::new());
        let manager = manager_with_cache(cache);

        // no lock in the cache at all, so release will return false
        manager.inner.active_locks.lock().unwrap().insert(
            "ghost-job".into(),
            ActiveLock {
                lock_value: "vanished".into(),
                acquired_at: Instant::now() - Duration::from_secs(10),
                ttl_ms: 1_000,
                job_name: "ghost-job".into(),
            },
        );

        sweep_stale_locks(&manager.inner).await;
        assert!(manager.inner.active_locks.lock().unwrap().is_empty());
    }
}
