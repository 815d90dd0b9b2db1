//! Cron timers: one task per scheduled job.
//!
//! A timer task computes the next fire time from its `cron::Schedule`,
//! sleeps until then, and spawns the firing, so a slow execution never
//! delays the timer, and firings of one job are not serialized. Tasks hold
//! only a `Weak` reference to the Manager: when the Manager goes away the
//! task exits on its next wake-up, and `destroy()` aborts it outright.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;

use ludari_core::{DeletedFilter, Job, JobFilter, JobType, WATCH_JOB_NAME};
use ludari_storage::Storage;

use crate::error::Result;
use crate::manager::ManagerInner;
use crate::pipeline;

/// Parse a 5- or 6-field cron expression. A 5-field expression gets a zero
/// seconds field prepended, matching the common crontab dialect.
pub(crate) fn parse_cron(expr: &str) -> std::result::Result<Schedule, String> {
    let trimmed = expr.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {trimmed}"),
        6 => trimmed.to_string(),
        n => return Err(format!("cron expression must have 5 or 6 fields (got {n})")),
    };
    Schedule::from_str(&normalized).map_err(|e| format!("invalid cron expression '{expr}': {e}"))
}

/// Schedule every live job plus the watch job. Fast-returns when either the
/// fleet kill-switch or this replica's own flag is off.
pub(crate) async fn initialize_jobs(inner: &Arc<ManagerInner>) -> Result<()> {
    let Some(control) = inner.storage.get_control().await? else {
        return Ok(());
    };
    if !control.enabled || !inner.enabled {
        inner.log_debug("scheduling disabled (fleet or replica switch off)");
        return Ok(());
    }

    let jobs = inner
        .storage
        .find_jobs(&JobFilter {
            deleted: DeletedFilter::Live,
            page_size: Some(u32::MAX),
            ..JobFilter::default()
        })
        .await?;

    let mut scheduled = 0usize;
    for job in jobs.data {
        if schedule_job(inner, &job) {
            scheduled += 1;
        }
    }

    // the watch job is excluded from listings; fetch it directly
    if let Some(watch) = inner.storage.find_job_by_name(WATCH_JOB_NAME).await? {
        schedule_job(inner, &watch);
    }

    inner.log_info(&format!("Scheduled {scheduled} jobs"));
    Ok(())
}

/// (Re)schedule one job. Any existing timer under the same name is stopped
/// first. Returns whether a timer now exists for the job.
pub(crate) fn schedule_job(inner: &Arc<ManagerInner>, job: &Job) -> bool {
    stop_job(inner, &job.name);

    if job.deleted.is_some() || !job.enabled {
        return false;
    }
    let Some(expr) = job.cron.as_deref() else {
        return false;
    };
    if job.job_type == JobType::Query && job.query.is_none() && job.name != WATCH_JOB_NAME {
        inner.log_debug(&format!("job '{}' has no query, not scheduling", job.name));
        return false;
    }
    if job.job_type == JobType::Method && inner.handler.is_none() {
        inner.log_warn(&format!(
            "job '{}' needs a method handler but none is configured, not scheduling",
            job.name
        ));
        return false;
    }

    let schedule = match parse_cron(expr) {
        Ok(s) => s,
        Err(e) => {
            inner.log_warn(&format!("job '{}' not scheduled: {e}", job.name));
            return false;
        }
    };

    let weak = Arc::downgrade(inner);
    let job = job.clone();
    let is_watch = job.name == WATCH_JOB_NAME;
    let name = job.name.clone();

    let handle = tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                break;
            };
            let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.is_destroyed() {
                break;
            }
            let firing = job.clone();
            tokio::spawn(pipeline::execute_job(inner, firing));
        }
    });

    inner
        .timers
        .lock()
        .expect("timers poisoned")
        .insert(name.clone(), handle);

    if !is_watch {
        inner.log_info(&format!("Job scheduled: {name}"));
    }
    true
}

/// Stop a job's timer. Returns whether one was running.
pub(crate) fn stop_job(inner: &Arc<ManagerInner>, name: &str) -> bool {
    match inner.timers.lock().expect("timers poisoned").remove(name) {
        Some(handle) => {
            handle.abort();
            true
        }
        None => false,
    }
}

/// Stop every timer.
pub(crate) fn stop_all(inner: &Arc<ManagerInner>) {
    let timers: Vec<_> = inner
        .timers
        .lock()
        .expect("timers poisoned")
        .drain()
        .collect();
    for (_, handle) in timers {
        handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn five_field_expressions_get_a_seconds_field() {
        let schedule = parse_cron("0 0 * * *").unwrap();
        // fires at midnight, second zero
        let next = schedule.upcoming(Utc).next().unwrap();
        assert_eq!(next.time().second(), 0);
        assert_eq!(next.time().hour(), 0);
    }

    #[test]
    fn six_field_expressions_pass_through() {
        assert!(parse_cron("*/5 * * * * *").is_ok());
        assert!(parse_cron("  */5 * * * * *  ").is_ok());
    }

    #[test]
    fn wrong_field_counts_are_rejected() {
        assert!(parse_cron("* * *").is_err());
        assert!(parse_cron("0 0 * * * * 2030").is_err());
        assert!(parse_cron("").is_err());
    }

    #[test]
    fn garbage_expressions_are_rejected() {
        assert!(parse_cron("not a cron at all").is_err());
        assert!(parse_cron("99 99 99 99 99").is_err());
    }
}
