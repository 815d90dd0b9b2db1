//! Single-process cache back end.
//!
//! Every mutation runs inside one `tokio::sync::Mutex` critical section, so
//! acquire/release/extend are atomic by construction and operations execute
//! in enqueue order (the mutex hands the lock out fairly). Expiry is lazy:
//! entries are checked on read and swept by `cleanup`, so the cache owns no
//! timers and `destroy` has nothing to cancel beyond the state itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use ludari_core::Context;

use crate::{Cache, LockAcquisition, LockOptions, REPLICA_HEALTHY_TTL_MS};

struct LockEntry {
    value: String,
    expires_at: Instant,
}

struct ContextEntry {
    /// JSON-serialized map, decoded on read so callers get their own copy.
    payload: String,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct CacheState {
    locks: HashMap<String, LockEntry>,
    contexts: HashMap<String, ContextEntry>,
    batches: HashMap<String, i64>,
    replicas: HashMap<String, Instant>,
}

/// In-process [`Cache`] implementation, the default when a Manager is built
/// without one. Two Managers sharing one `Arc<MemoryCache>` behave like two
/// replicas sharing a cache server.
pub struct MemoryCache {
    /// Optional key prefix so one back end can be shared across tenants.
    namespace: String,
    state: Mutex<CacheState>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_namespace("")
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn key(&self, raw: &str) -> String {
        format!("{}{raw}", self.namespace)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn acquire_lock(&self, key: &str, opts: LockOptions) -> LockAcquisition {
        let key = self.key(key);
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(existing) = state.locks.get(&key) {
            if existing.expires_at > now {
                return LockAcquisition::denied();
            }
        }

        let value = opts
            .value
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        state.locks.insert(
            key,
            LockEntry {
                value: value.clone(),
                expires_at: now + Duration::from_millis(opts.ttl_ms),
            },
        );

        LockAcquisition {
            acquired: true,
            lock_value: Some(value),
            expires_at: Some(Utc::now() + chrono::Duration::milliseconds(opts.ttl_ms as i64)),
        }
    }

    async fn release_lock(&self, key: &str, lock_value: &str) -> bool {
        let key = self.key(key);
        let mut state = self.state.lock().await;
        match state.locks.get(&key) {
            Some(entry) if entry.value == lock_value => {
                state.locks.remove(&key);
                true
            }
            _ => false,
        }
    }

    async fn extend_lock(&self, key: &str, lock_value: &str, ttl_ms: u64) -> bool {
        let key = self.key(key);
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.locks.get_mut(&key) {
            Some(entry) if entry.value == lock_value && entry.expires_at > now => {
                entry.expires_at = now + Duration::from_millis(ttl_ms);
                true
            }
            _ => false,
        }
    }

    async fn set_job_context(&self, job_name: &str, context: &Context, ttl_ms: Option<u64>) {
        let payload = match serde_json::to_string(context) {
            Ok(p) => p,
            Err(e) => {
                debug!(job = %job_name, error = %e, "context not serializable, dropped");
                return;
            }
        };
        let key = self.key(job_name);
        let expires_at = ttl_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut state = self.state.lock().await;
        state.contexts.insert(
            key,
            ContextEntry {
                payload,
                expires_at,
            },
        );
    }

    async fn get_job_context(&self, job_name: &str) -> Option<Context> {
        let key = self.key(job_name);
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let (payload, expired) = match state.contexts.get(&key) {
            None => return None,
            Some(e) => (
                e.payload.clone(),
                e.expires_at.is_some_and(|at| at <= now),
            ),
        };
        if expired {
            state.contexts.remove(&key);
            return None;
        }
        drop(state);
        match serde_json::from_str(&payload) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                debug!(job = %job_name, error = %e, "stored context undecodable");
                None
            }
        }
    }

    async fn delete_job_context(&self, job_name: &str) {
        let key = self.key(job_name);
        self.state.lock().await.contexts.remove(&key);
    }

    async fn increment_batch(&self, job_name: &str) -> i64 {
        let key = self.key(job_name);
        let mut state = self.state.lock().await;
        let counter = state.batches.entry(key).or_insert(0);
        *counter += 1;
        *counter
    }

    async fn get_batch(&self, job_name: &str) -> i64 {
        let key = self.key(job_name);
        self.state
            .lock()
            .await
            .batches
            .get(&key)
            .copied()
            .unwrap_or(0)
    }

    async fn reset_batch(&self, job_name: &str) {
        let key = self.key(job_name);
        self.state.lock().await.batches.remove(&key);
    }

    async fn is_healthy(&self) -> bool {
        let probe = format!("__health__:{}", Uuid::new_v4());
        let acquired = self.acquire_lock(&probe, LockOptions::ttl_ms(1_000)).await;
        match acquired.lock_value {
            Some(value) if acquired.acquired => self.release_lock(&probe, &value).await,
            _ => false,
        }
    }

    async fn cleanup(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.locks.retain(|_, e| e.expires_at > now);
        state
            .contexts
            .retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        state.replicas.retain(|_, at| *at > now);
    }

    async fn destroy(&self) {
        let mut state = self.state.lock().await;
        *state = CacheState::default();
    }

    fn supports_replica_probes(&self) -> bool {
        true
    }

    async fn ping_replica(&self, replica_id: &str) -> bool {
        let key = self.key(replica_id);
        let state = self.state.lock().await;
        match state.replicas.get(&key) {
            Some(expires_at) => {
                *expires_at > Instant::now() + Duration::from_millis(REPLICA_HEALTHY_TTL_MS)
            }
            None => false,
        }
    }

    async fn mark_replica(&self, replica_id: &str, ttl_ms: u64) {
        let key = self.key(replica_id);
        let expires_at = Instant::now() + Duration::from_millis(ttl_ms);
        self.state.lock().await.replicas.insert(key, expires_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_acquirers_see_one_winner() {
        let cache = Arc::new(MemoryCache::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.acquire_lock("job/x", LockOptions::ttl_ms(5_000)).await
            }));
        }
        let mut winners = Vec::new();
        for h in handles {
            let result = h.await.unwrap();
            if result.acquired {
                winners.push(result.lock_value.unwrap());
            }
        }
        assert_eq!(winners.len(), 1);

        // matching release succeeds exactly once
        assert!(cache.release_lock("job/x", &winners[0]).await);
        assert!(!cache.release_lock("job/x", &winners[0]).await);
    }

    #[tokio::test]
    async fn release_requires_matching_value() {
        let cache = MemoryCache::new();
        let got = cache.acquire_lock("k", LockOptions::ttl_ms(5_000)).await;
        assert!(got.acquired);
        assert!(!cache.release_lock("k", "not-the-value").await);
        // lock still held
        assert!(!cache.acquire_lock("k", LockOptions::ttl_ms(5_000)).await.acquired);
        assert!(cache.release_lock("k", got.lock_value.as_deref().unwrap()).await);
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired() {
        let cache = MemoryCache::new();
        let first = cache.acquire_lock("k", LockOptions::ttl_ms(20)).await;
        assert!(first.acquired);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = cache.acquire_lock("k", LockOptions::ttl_ms(5_000)).await;
        assert!(second.acquired);
        assert_ne!(first.lock_value, second.lock_value);
        // the stale holder's release must not evict the new owner
        assert!(!cache.release_lock("k", first.lock_value.as_deref().unwrap()).await);
    }

    #[tokio::test]
    async fn extend_restarts_the_ttl() {
        let cache = MemoryCache::new();
        let got = cache.acquire_lock("k", LockOptions::ttl_ms(50)).await;
        let value = got.lock_value.unwrap();
        assert!(cache.extend_lock("k", &value, 5_000).await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        // would have expired under the original TTL
        assert!(!cache.acquire_lock("k", LockOptions::ttl_ms(100)).await.acquired);
        assert!(!cache.extend_lock("k", "wrong", 5_000).await);
    }

    #[tokio::test]
    async fn caller_supplied_lock_value_is_stored() {
        let cache = MemoryCache::new();
        let got = cache
            .acquire_lock(
                "k",
                LockOptions {
                    ttl_ms: 5_000,
                    value: Some("fence-7".into()),
                },
            )
            .await;
        assert_eq!(got.lock_value.as_deref(), Some("fence-7"));
        assert!(cache.release_lock("k", "fence-7").await);
    }

    #[tokio::test]
    async fn context_ttl_expires_and_replaces() {
        let cache = MemoryCache::new();
        let ctx: Context = serde_json::from_str(r#"{"cursor": 5}"#).unwrap();
        cache.set_job_context("sync", &ctx, Some(30)).await;
        assert_eq!(cache.get_job_context("sync").await.unwrap()["cursor"], 5);

        // repeat set replaces value and expiry
        let ctx2: Context = serde_json::from_str(r#"{"cursor": 9}"#).unwrap();
        cache.set_job_context("sync", &ctx2, None).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get_job_context("sync").await.unwrap()["cursor"], 9);

        cache.delete_job_context("sync").await;
        assert!(cache.get_job_context("sync").await.is_none());
        // deleting again is fine
        cache.delete_job_context("sync").await;
    }

    #[tokio::test]
    async fn returned_context_is_a_copy() {
        let cache = MemoryCache::new();
        let ctx: Context = serde_json::from_str(r#"{"n": 1}"#).unwrap();
        cache.set_job_context("j", &ctx, None).await;
        let mut copy = cache.get_job_context("j").await.unwrap();
        copy.insert("n".into(), serde_json::json!(99));
        assert_eq!(cache.get_job_context("j").await.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn batch_counter_is_monotonic_under_concurrency() {
        let cache = Arc::new(MemoryCache::new());
        let n = 32;
        let mut handles = Vec::new();
        for _ in 0..n {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(
                async move { cache.increment_batch("batch-job").await },
            ));
        }
        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort_unstable();
        let expected: Vec<i64> = (1..=n as i64).collect();
        assert_eq!(seen, expected);
        assert_eq!(cache.get_batch("batch-job").await, n as i64);

        cache.reset_batch("batch-job").await;
        assert_eq!(cache.get_batch("batch-job").await, 0);
        assert_eq!(cache.increment_batch("batch-job").await, 1);
    }

    #[tokio::test]
    async fn health_probe_round_trips() {
        let cache = MemoryCache::new();
        assert!(cache.is_healthy().await);
    }

    #[tokio::test]
    async fn replica_ping_requires_generous_ttl() {
        let cache = MemoryCache::new();
        assert!(cache.supports_replica_probes());
        assert!(!cache.ping_replica("r1").await);

        // a marker about to lapse does not count as healthy
        cache.mark_replica("r1", 1_000).await;
        assert!(!cache.ping_replica("r1").await);

        cache.mark_replica("r1", 60_000).await;
        assert!(cache.ping_replica("r1").await);
    }

    #[tokio::test]
    async fn cleanup_sweeps_expired_entries() {
        let cache = MemoryCache::new();
        cache.acquire_lock("gone", LockOptions::ttl_ms(10)).await;
        let ctx: Context = serde_json::from_str("{}").unwrap();
        cache.set_job_context("gone", &ctx, Some(10)).await;
        cache.mark_replica("gone", 10).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.cleanup().await;

        let state = cache.state.lock().await;
        assert!(state.locks.is_empty());
        assert!(state.contexts.is_empty());
        assert!(state.replicas.is_empty());
    }

    #[tokio::test]
    async fn namespace_prefixes_every_key() {
        let cache = MemoryCache::with_namespace("tenant-a:");
        cache.increment_batch("j").await;
        let state = cache.state.lock().await;
        assert!(state.batches.contains_key("tenant-a:j"));
        assert!(!state.batches.contains_key("j"));
    }
}
