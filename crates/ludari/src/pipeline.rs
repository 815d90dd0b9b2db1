//! Per-firing execution pipeline.
//!
//! Each firing: reload the job, merge static and dynamic context, take the
//! distributed lock when the job asks for one, run the bound execution,
//! persist the run record, and always release the lock at the end. Errors
//! inside an execution are captured into the lens and the run record; they
//! never reach the cron timer.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;

use ludari_cache::{Cache, LockOptions};
use ludari_core::context::{CTX_DISTRIBUTED, CTX_RUN_ONCE};
use ludari_core::{
    ctx_flag, ctx_ttl_secs, is_truthy, merge_context, Context, Job, JobPatch, JobRunPatch,
    JobType, NewJobRun, WATCH_JOB_NAME,
};
use ludari_crypto::{decrypt, sanitize_query};
use ludari_lens::Lens;
use ludari_storage::Storage;

use crate::control;
use crate::error::{ManagerError, Result};
use crate::handler::{ExecutionResult, JobOutcome};
use crate::manager::{ActiveLock, ManagerInner};

/// A one-shot bound execution: the job's type resolved into a closure over
/// the merged context and a fresh lens.
pub(crate) type Execution =
    Box<dyn FnOnce(Context, Arc<Lens>) -> BoxFuture<'static, ExecutionResult> + Send>;

/// Entry point for every cron firing.
pub(crate) async fn execute_job(inner: Arc<ManagerInner>, job: Job) {
    let control = match inner.storage.get_control().await {
        Ok(Some(control)) => control,
        Ok(None) => return,
        Err(e) => {
            inner.log_debug(&format!("firing skipped, control unavailable: {e}"));
            return;
        }
    };
    *inner.log_level.lock().expect("log level poisoned") = control.log_level;

    if control.stale.contains(&inner.replica_id) {
        control::reset_jobs(&inner).await;
    }

    if job.name == WATCH_JOB_NAME {
        // the watch job exists only to provide this periodic tick; refresh
        // our liveness marker while we are here
        inner
            .cache
            .mark_replica(&inner.replica_id, control::REPLICA_MARKER_TTL_MS)
            .await;
        return;
    }

    let execution = build_execution(&inner, &job);
    if let Err(e) = handle_job(&inner, &job.name, execution).await {
        inner.log_warn(&format!("job '{}' firing failed: {e}", job.name));
    }
}

/// Resolve a job's type into its bound execution closure.
pub(crate) fn build_execution(inner: &Arc<ManagerInner>, job: &Job) -> Execution {
    match job.job_type {
        JobType::Query => {
            let storage = Arc::clone(&inner.storage);
            let secret = inner.query_secret.clone();
            let stored = job.query.clone();
            Box::new(move |_ctx, _lens| {
                Box::pin(async move {
                    let Some(stored) = stored else {
                        return Ok(JobOutcome::None);
                    };
                    let plaintext = match &secret {
                        Some(secret) => decrypt(&stored, secret)?,
                        None => stored,
                    };
                    let sanitized = sanitize_query(&plaintext)?;
                    let value = storage.execute_query(&sanitized).await?;
                    Ok(JobOutcome::Value(value))
                })
            })
        }
        JobType::Method => {
            let handler = inner.handler.clone();
            let name = job.name.clone();
            Box::new(move |ctx, lens| {
                Box::pin(async move {
                    match handler {
                        Some(handler) => handler.execute_method(&name, ctx, lens).await,
                        None => Err(format!("no method handler configured for job '{name}'").into()),
                    }
                })
            })
        }
        JobType::Inline => {
            let inner = Arc::clone(inner);
            let name = job.name.clone();
            Box::new(move |ctx, lens| {
                Box::pin(async move {
                    let callable = inner
                        .inline
                        .lock()
                        .expect("inline registry poisoned")
                        .get(&name)
                        .cloned();
                    match callable {
                        Some(f) => f(ctx, lens).await,
                        None => {
                            inner.log_warn(&format!(
                                "no inline handler registered for job '{name}'"
                            ));
                            Ok(JobOutcome::None)
                        }
                    }
                })
            })
        }
    }
}

/// The pipeline proper. Shared by cron firings and manual triggers.
pub(crate) async fn handle_job(
    inner: &Arc<ManagerInner>,
    name: &str,
    execution: Execution,
) -> Result<()> {
    if inner.is_destroyed() {
        return Ok(());
    }
    if name.is_empty() {
        return Err(ManagerError::Validation("job name must not be empty".into()));
    }

    let Some(job) = inner.storage.find_job_by_name(name).await? else {
        return Ok(());
    };
    if !job.enabled || job.deleted.is_some() {
        return Ok(());
    }

    let lens = Arc::new(Lens::new());

    let run = if job.persist {
        Some(
            inner
                .storage
                .create_job_run(NewJobRun {
                    job_id: job.id.clone(),
                    started: Utc::now(),
                    result: None,
                })
                .await?,
        )
    } else {
        None
    };

    // static context first, then the cached dynamic context wins on overlap
    let static_ctx = job.context.clone().unwrap_or_default();
    let mut context = static_ctx.clone();
    if ctx_flag(&context, CTX_DISTRIBUTED) {
        if let Some(dynamic) = inner.cache.get_job_context(name).await {
            context = merge_context(&static_ctx, &dynamic);
        }
    }

    let mut held_lock: Option<String> = None;
    if ctx_flag(&context, CTX_DISTRIBUTED) {
        let ttl_ms = ctx_ttl_secs(&context) * 1_000;
        let acquired = inner
            .cache
            .acquire_lock(name, LockOptions::ttl_ms(ttl_ms))
            .await;
        if !acquired.acquired {
            inner.log_debug(&format!(
                "job '{name}' is locked by another replica, skipping this firing"
            ));
            return Ok(());
        }
        let value = acquired.lock_value.unwrap_or_default();
        inner
            .active_locks
            .lock()
            .expect("active locks poisoned")
            .insert(
                name.to_string(),
                ActiveLock {
                    lock_value: value.clone(),
                    acquired_at: Instant::now(),
                    ttl_ms,
                    job_name: name.to_string(),
                },
            );
        held_lock = Some(value);
    }

    if !job.silent {
        inner.log_info(&format!("Job started: {name}"));
    }

    match execution(context.clone(), Arc::clone(&lens)).await {
        Ok(outcome) => {
            if ctx_flag(&context, CTX_RUN_ONCE) {
                let disable = JobPatch {
                    enabled: Some(false),
                    ..JobPatch::default()
                };
                if let Err(e) = inner.storage.update_job(&job.id, disable).await {
                    inner.log_warn(&format!("could not disable runOnce job '{name}': {e}"));
                }
            }
            if let Some(run) = &run {
                let result = serialize_result(outcome, &lens);
                let patch = JobRunPatch {
                    completed: Some(Utc::now()),
                    result: Some(result),
                    ..JobRunPatch::default()
                };
                if let Err(e) = inner.storage.update_job_run(&run.id, patch).await {
                    inner.log_warn(&format!("could not record completion of '{name}': {e}"));
                }
            }
            if !job.silent {
                inner.log_info(&format!("Job completed: {name}"));
            }
        }
        Err(error) => {
            let _ = lens.capture_error(error.to_string(), "Job execution failed");
            if let Some(run) = &run {
                let patch = JobRunPatch {
                    failed: Some(Utc::now()),
                    result: Some(Value::String(lens.frames_json())),
                    ..JobRunPatch::default()
                };
                if let Err(e) = inner.storage.update_job_run(&run.id, patch).await {
                    inner.log_warn(&format!("could not record failure of '{name}': {e}"));
                }
            }
            inner.log_warn(&format!("Job failed: {name}: {error}"));
        }
    }

    if let Some(value) = held_lock {
        if !inner.cache.release_lock(name, &value).await {
            inner.log_warn(&format!(
                "could not release lock for job '{name}'; the watchdog will reclaim it"
            ));
        }
        // drop the entry either way so it cannot accumulate
        inner
            .active_locks
            .lock()
            .expect("active locks poisoned")
            .remove(name);
    }

    Ok(())
}

/// Fold an execution's outcome and its lens into the persisted result.
///
/// The lens frames win when the execution returned itself-as-lens or
/// nothing useful; a truthy value passes through verbatim.
pub(crate) fn serialize_result(outcome: JobOutcome, lens: &Lens) -> Value {
    match outcome {
        JobOutcome::Frames => Value::String(lens.frames_json()),
        JobOutcome::Value(value) if is_truthy(&value) => value,
        JobOutcome::Value(value) => {
            if lens.is_empty() {
                value
            } else {
                Value::String(lens.frames_json())
            }
        }
        JobOutcome::None => {
            if lens.is_empty() {
                Value::Null
            } else {
                Value::String(lens.frames_json())
            }
        }
    }
}
