//! `ludari-cache` — the shared-cache contract and the single-process back end.
//!
//! The cache is the coordination fabric between replicas: distributed locks
//! fenced by an opaque lock value, per-job dynamic context with TTL,
//! monotonic batch counters, and replica liveness markers.
//!
//! Every operation is **non-throwing**: implementations swallow back-end
//! failures, log them internally, and return the documented fallback
//! (`acquired: false`, `false`, `None`, `0`, `1`). Callers never handle
//! cache errors.

mod memory;

pub use memory::MemoryCache;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ludari_core::Context;

/// Options for [`Cache::acquire_lock`].
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    /// Lock time-to-live in milliseconds.
    pub ttl_ms: u64,
    /// Caller-supplied lock value; a fresh opaque identifier is generated
    /// when absent.
    pub value: Option<String>,
}

impl LockOptions {
    pub fn ttl_ms(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            value: None,
        }
    }
}

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, Default)]
pub struct LockAcquisition {
    pub acquired: bool,
    /// The stored fencing value; required for release and extend.
    pub lock_value: Option<String>,
    /// Absolute expiry of the acquired lock.
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockAcquisition {
    /// The `{acquired: false}` fallback.
    pub fn denied() -> Self {
        Self::default()
    }
}

/// Shared-cache contract.
///
/// Atomicity: `acquire_lock` is test-and-set, `release_lock` is
/// compare-and-delete, `extend_lock` is compare-and-expire. Concurrent
/// acquirers of the same key must see exactly one winner. A Redis-style
/// back end maps these onto `SET NX PX` and small compare scripts; the
/// in-process back end linearizes every mutation through one async mutex.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Atomic test-and-set. Succeeds when no live lock exists at `key`.
    async fn acquire_lock(&self, key: &str, opts: LockOptions) -> LockAcquisition;

    /// Atomic compare-and-delete: true only when the stored value equals
    /// `lock_value`. A mismatch leaves the lock untouched.
    async fn release_lock(&self, key: &str, lock_value: &str) -> bool;

    /// Atomic compare-and-expire: true only on value match. The TTL
    /// restarts from now; it is not additive.
    async fn extend_lock(&self, key: &str, lock_value: &str, ttl_ms: u64) -> bool;

    /// Store a job's dynamic context; a repeat set replaces the prior value
    /// and its expiry.
    async fn set_job_context(&self, job_name: &str, context: &Context, ttl_ms: Option<u64>);

    /// Defensive copy of the stored context, or `None` when absent, expired,
    /// or undecodable.
    async fn get_job_context(&self, job_name: &str) -> Option<Context>;

    /// Idempotent delete.
    async fn delete_job_context(&self, job_name: &str);

    /// Atomic zero-initialized increment. The fallback on back-end failure
    /// is `1`, the value a fresh counter would have produced.
    async fn increment_batch(&self, job_name: &str) -> i64;

    /// Current counter value; `0` when absent.
    async fn get_batch(&self, job_name: &str) -> i64;

    /// Idempotent delete.
    async fn reset_batch(&self, job_name: &str);

    /// Round-trip probe, typically acquire-and-release of a disposable lock.
    async fn is_healthy(&self) -> bool;

    /// Optional compaction hook, called periodically by the Manager.
    async fn cleanup(&self) {}

    /// Optional teardown; must cancel any timers the cache owns. Back ends
    /// without a real teardown inherit this delegation to [`cleanup`].
    ///
    /// [`cleanup`]: Cache::cleanup
    async fn destroy(&self) {
        self.cleanup().await;
    }

    /// Whether this back end tracks replica liveness at all. When false the
    /// Manager treats every probe as "cannot prove inactivity".
    fn supports_replica_probes(&self) -> bool {
        false
    }

    /// True only when the replica's presence marker exists with non-trivial
    /// remaining TTL (strictly more than five seconds).
    async fn ping_replica(&self, _replica_id: &str) -> bool {
        false
    }

    /// Refresh a replica's presence marker. A no-op for back ends that do
    /// not track replicas.
    async fn mark_replica(&self, _replica_id: &str, _ttl_ms: u64) {}
}

/// Remaining TTL below which a replica marker does not count as healthy.
pub const REPLICA_HEALTHY_TTL_MS: u64 = 5_000;
