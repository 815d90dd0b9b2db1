//! Cross-replica synchronization through the Control record.
//!
//! Any mutation that must propagate marks every replica stale; each replica
//! notices its own flag on the next watch tick and rebuilds its scheduler.
//! Contention on the single Control row is resolved by retrying with
//! exponential backoff, and by rotating the version token when a writer
//! wants every concurrent writer to lose.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use ludari_cache::Cache;
use ludari_core::{Control, ControlPatch, JobType, LogLevel, NewControl, NewJob, WATCH_JOB_NAME};
use ludari_storage::{Storage, StorageError};

use crate::error::{ManagerError, Result};
use crate::manager::ManagerInner;
use crate::scheduler;

/// Attempts before the Control retry helper gives up.
pub(crate) const CONTROL_RETRY_MAX: u32 = 5;
/// Base backoff between retry attempts, in milliseconds.
const BACKOFF_BASE_MS: u64 = 100;
/// Per-probe deadline when checking peer replica liveness.
const REPLICA_PROBE_TIMEOUT_SECS: u64 = 5;
/// TTL of this replica's own liveness marker; refreshed every watch tick.
pub(crate) const REPLICA_MARKER_TTL_MS: u64 = 60_000;

/// A Control write request for the retry helper.
#[derive(Debug, Clone, Default)]
pub(crate) struct ControlWrite {
    pub enabled: Option<bool>,
    pub log_level: Option<LogLevel>,
    pub replicas: Option<BTreeSet<String>>,
    pub stale: Option<BTreeSet<String>>,
    pub version: Option<String>,
    /// Assign `replicas` exactly instead of unioning with the stored set.
    pub exact_replicas: bool,
}

/// Register this replica, prune dead peers, ensure the watch job, and
/// schedule everything. Runs once per `initialize()`.
pub(crate) async fn prepare(inner: &Arc<ManagerInner>) -> Result<()> {
    let control = load_or_create_control(inner).await?;
    *inner.log_level.lock().expect("log level poisoned") = control.log_level;

    // Keep only peers that prove themselves alive; always keep self. A cache
    // without replica probes cannot prove inactivity, so the roster stays.
    let mut desired: BTreeSet<String> = BTreeSet::new();
    if inner.cache.supports_replica_probes() {
        for replica in &control.replicas {
            if *replica == inner.replica_id {
                continue;
            }
            let healthy = tokio::time::timeout(
                Duration::from_secs(REPLICA_PROBE_TIMEOUT_SECS),
                inner.cache.ping_replica(replica),
            )
            .await
            .unwrap_or(false);
            if healthy {
                desired.insert(replica.clone());
            } else {
                inner.log_debug(&format!("dropping unresponsive replica {replica}"));
            }
        }
    } else {
        desired = control.replicas.clone();
    }
    desired.insert(inner.replica_id.clone());

    if desired != control.replicas {
        let stale: BTreeSet<String> = control.stale.intersection(&desired).cloned().collect();
        update_control_with_retry(
            inner,
            &control.id,
            ControlWrite {
                replicas: Some(desired),
                stale: Some(stale),
                exact_replicas: true,
                ..ControlWrite::default()
            },
            CONTROL_RETRY_MAX,
        )
        .await?;
    }

    // Starting up stale would trigger an immediate pointless self-reset.
    let control = current_control(inner).await?;
    if control.stale.contains(&inner.replica_id) {
        let stale: BTreeSet<String> = control
            .stale
            .iter()
            .filter(|r| **r != inner.replica_id)
            .cloned()
            .collect();
        update_control_with_retry(
            inner,
            &control.id,
            ControlWrite {
                stale: Some(stale),
                ..ControlWrite::default()
            },
            CONTROL_RETRY_MAX,
        )
        .await?;
    }

    ensure_watch_job(inner).await?;
    scheduler::initialize_jobs(inner).await?;
    inner
        .cache
        .mark_replica(&inner.replica_id, REPLICA_MARKER_TTL_MS)
        .await;
    Ok(())
}

async fn load_or_create_control(inner: &Arc<ManagerInner>) -> Result<Control> {
    if let Some(control) = inner.storage.get_control().await? {
        return Ok(control);
    }
    let mut replicas = BTreeSet::new();
    replicas.insert(inner.replica_id.clone());
    match inner
        .storage
        .create_control(NewControl {
            enabled: true,
            log_level: LogLevel::default(),
            replicas,
            stale: BTreeSet::new(),
            version: Uuid::new_v4().to_string(),
        })
        .await
    {
        Ok(control) => Ok(control),
        // another replica won the creation race
        Err(StorageError::Conflict(_)) => current_control(inner).await,
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn current_control(inner: &Arc<ManagerInner>) -> Result<Control> {
    inner
        .storage
        .get_control()
        .await?
        .ok_or_else(|| ManagerError::Validation("control record is missing".into()))
}

/// Retry a Control write under optimistic concurrency.
///
/// Each attempt refetches the row, carries the refreshed token as the
/// guard, and merges `replicas` by union unless exact replacement was
/// requested, so concurrent registrations by other replicas survive.
/// `stale` always replaces exactly. Conflicts back off exponentially with
/// up to 10% jitter; any other error fails immediately.
pub(crate) async fn update_control_with_retry(
    inner: &Arc<ManagerInner>,
    id: &str,
    write: ControlWrite,
    max_retries: u32,
) -> Result<Control> {
    let mut last_error = String::new();
    for attempt in 0..max_retries {
        let control = current_control(inner).await?;
        if control.id != id {
            return Err(ManagerError::Validation(format!(
                "control id changed underneath us (expected {id}, found {})",
                control.id
            )));
        }

        let replicas = write.replicas.clone().map(|requested| {
            if write.exact_replicas || requested.is_empty() {
                requested
            } else {
                requested.union(&control.replicas).cloned().collect()
            }
        });
        let patch = ControlPatch {
            enabled: write.enabled,
            log_level: write.log_level,
            replicas,
            stale: write.stale.clone(),
            expected_version: Some(control.version.clone()),
            version: write.version.clone(),
        };

        match inner.storage.update_control(id, patch).await {
            Ok(control) => return Ok(control),
            Err(StorageError::Conflict(message)) => {
                last_error = message;
                let delay = backoff_delay(attempt);
                inner.log_debug(&format!(
                    "control update conflict on attempt {}, retrying in {delay:?}",
                    attempt + 1
                ));
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ManagerError::RetryExhausted {
        attempts: max_retries,
        last_error,
    })
}

/// `2^attempt · 100 ms` plus up to 10% jitter. The jitter comes from the
/// clock's sub-second nanos, which is plenty to de-synchronise replicas.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = BACKOFF_BASE_MS.saturating_mul(1 << attempt.min(16));
    let max_jitter = base_ms / 10;
    let jitter = if max_jitter == 0 {
        0
    } else {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        (nanos as u64) % max_jitter
    };
    Duration::from_millis(base_ms + jitter)
}

/// Mark every replica (self included) stale and rotate the version token so
/// concurrent writers conflict and refetch. Losing the race is fine:
/// someone else already triggered the reset.
pub(crate) async fn trigger_reset(inner: &Arc<ManagerInner>) {
    let control = match inner.storage.get_control().await {
        Ok(Some(control)) => control,
        Ok(None) => return,
        Err(e) => {
            inner.log_debug(&format!("fleet reset skipped, control unavailable: {e}"));
            return;
        }
    };

    let patch = ControlPatch {
        stale: Some(control.replicas.clone()),
        expected_version: Some(control.version.clone()),
        version: Some(Uuid::new_v4().to_string()),
        ..ControlPatch::default()
    };
    match inner.storage.update_control(&control.id, patch).await {
        Ok(_) => inner.log_debug("fleet reset triggered"),
        Err(StorageError::Conflict(_)) => {
            inner.log_debug("another replica already triggered a reset")
        }
        Err(e) => inner.log_warn(&format!("could not trigger fleet reset: {e}")),
    }
}

/// Rebuild this replica's scheduler and clear its own stale flag. Guarded
/// against reentry; a concurrent firing that also sees the flag no-ops.
pub(crate) async fn reset_jobs(inner: &Arc<ManagerInner>) {
    if inner.is_resetting.swap(true, Ordering::SeqCst) {
        return;
    }
    inner.log_debug("rebuilding scheduler after fleet reset");

    scheduler::stop_all(inner);
    if let Err(e) = scheduler::initialize_jobs(inner).await {
        inner.log_warn(&format!("scheduler rebuild failed: {e}"));
    }

    match inner.storage.get_control().await {
        Ok(Some(control)) if control.stale.contains(&inner.replica_id) => {
            let stale: BTreeSet<String> = control
                .stale
                .iter()
                .filter(|r| **r != inner.replica_id)
                .cloned()
                .collect();
            if let Err(e) = update_control_with_retry(
                inner,
                &control.id,
                ControlWrite {
                    stale: Some(stale),
                    ..ControlWrite::default()
                },
                CONTROL_RETRY_MAX,
            )
            .await
            {
                // another replica rewrote the flags first; next tick settles it
                inner.log_debug(&format!("stale flag cleanup raced another writer: {e}"));
            }
        }
        Ok(_) => {}
        Err(e) => inner.log_debug(&format!("stale flag cleanup skipped: {e}")),
    }

    inner.is_resetting.store(false, Ordering::SeqCst);
}

/// Create the system watch job when absent: the periodic tick every replica
/// uses to notice its own stale flag.
async fn ensure_watch_job(inner: &Arc<ManagerInner>) -> Result<()> {
    if inner
        .storage
        .find_job_by_name(WATCH_JOB_NAME)
        .await?
        .is_some()
    {
        return Ok(());
    }
    let cron = format!("*/{} * * * * *", inner.watch_interval_secs);
    match inner
        .storage
        .create_job(NewJob {
            name: WATCH_JOB_NAME.into(),
            job_type: JobType::Query,
            enabled: true,
            cron: Some(cron),
            query: None,
            context: None,
            persist: false,
            silent: true,
        })
        .await
    {
        Ok(_) => Ok(()),
        // another replica created it between our lookup and insert
        Err(StorageError::Conflict(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
