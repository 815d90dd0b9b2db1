//! Public job-definition and operations API.
//!
//! Every method here passes the ensure-initialized gate first, validates
//! its inputs synchronously, and protects system-owned names from callers.

use std::sync::Arc;

use futures::future::BoxFuture;

use ludari_core::{
    is_reserved_name, validate_job_name, Context, Control, ControlPatch, Job, JobFilter,
    JobPatch, JobRun, JobRunFilter, JobType, NewJob, PaginatedResponse, WATCH_JOB_NAME,
};
use ludari_cache::Cache;
use ludari_crypto::encrypt;
use ludari_lens::Lens;
use ludari_storage::{Storage, StorageError};

use crate::control::{self, ControlWrite, CONTROL_RETRY_MAX};
use crate::error::{ManagerError, Result};
use crate::handler::ExecutionResult;
use crate::manager::Manager;
use crate::{pipeline, scheduler};

/// Snapshot of the engine's own health.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub initialized: bool,
    pub storage_ok: bool,
    pub cache_ok: bool,
    pub replica_id: String,
}

impl Manager {
    /// Create a job. Query values are envelope-encrypted when a query
    /// secret is configured; creating a schedulable `query` or `method` job
    /// marks the whole fleet for reschedule.
    pub async fn create_job(&self, mut data: NewJob) -> Result<Job> {
        self.ensure_initialized()?;
        validate_job_name(&data.name).map_err(ManagerError::Validation)?;
        if is_reserved_name(&data.name) {
            return Err(ManagerError::Validation(format!(
                "job name '{}' is reserved for the system",
                data.name
            )));
        }
        self.validate_job_definition(
            data.job_type,
            data.enabled,
            data.cron.as_deref(),
            data.query.as_deref(),
        )?;

        if let (Some(query), Some(secret)) = (&data.query, &self.inner.query_secret) {
            data.query = Some(encrypt(query, secret));
        }

        let job = self.inner.storage.create_job(data).await?;
        if matches!(job.job_type, JobType::Query | JobType::Method) && job.cron.is_some() {
            control::trigger_reset(&self.inner).await;
        }
        Ok(job)
    }

    /// Update a job. System jobs cannot be modified or shadowed by rename;
    /// a provided context is also pushed to the cache so running replicas
    /// pick it up on their next distributed firing.
    pub async fn update_job(&self, id: &str, mut patch: JobPatch) -> Result<Job> {
        self.ensure_initialized()?;
        if id.is_empty() {
            return Err(ManagerError::Validation("job id is required".into()));
        }
        let current = self
            .inner
            .storage
            .find_job(id)
            .await?
            .ok_or_else(|| StorageError::not_found("job", id))?;
        if is_reserved_name(&current.name) {
            return Err(ManagerError::Validation(format!(
                "job '{}' is system-owned and cannot be modified",
                current.name
            )));
        }
        if let Some(new_name) = &patch.name {
            validate_job_name(new_name).map_err(ManagerError::Validation)?;
            if is_reserved_name(new_name) {
                return Err(ManagerError::Validation(format!(
                    "job name '{new_name}' is reserved for the system"
                )));
            }
        }

        // validate the job as it will exist after the patch
        let job_type = patch.job_type.unwrap_or(current.job_type);
        let enabled = patch.enabled.unwrap_or(current.enabled);
        let cron = match &patch.cron {
            Some(cron) => cron.clone(),
            None => current.cron.clone(),
        };
        let query = match &patch.query {
            Some(query) => query.clone(),
            None => current.query.clone(),
        };
        self.validate_job_definition(job_type, enabled, cron.as_deref(), query.as_deref())?;

        if let Some(Some(plaintext)) = &patch.query {
            if let Some(secret) = &self.inner.query_secret {
                patch.query = Some(Some(encrypt(plaintext, secret)));
            }
        }

        if let Some(Some(context)) = &patch.context {
            self.inner
                .cache
                .set_job_context(&current.name, context, None)
                .await;
        }

        let updated = self.inner.storage.update_job(id, patch).await?;
        if matches!(updated.job_type, JobType::Query | JobType::Method) {
            control::trigger_reset(&self.inner).await;
        }
        Ok(updated)
    }

    /// Flip a job's enabled flag.
    pub async fn toggle_job(&self, id: &str) -> Result<Job> {
        self.set_enabled(id, None).await
    }

    /// Enable a job; a no-op returning the job unchanged when already
    /// enabled.
    pub async fn enable_job(&self, id: &str) -> Result<Job> {
        self.set_enabled(id, Some(true)).await
    }

    /// Disable a job; a no-op returning the job unchanged when already
    /// disabled.
    pub async fn disable_job(&self, id: &str) -> Result<Job> {
        self.set_enabled(id, Some(false)).await
    }

    async fn set_enabled(&self, id: &str, enabled: Option<bool>) -> Result<Job> {
        self.ensure_initialized()?;
        if id.is_empty() {
            return Err(ManagerError::Validation("job id is required".into()));
        }
        let job = self
            .inner
            .storage
            .find_job(id)
            .await?
            .ok_or_else(|| StorageError::not_found("job", id))?;
        if is_reserved_name(&job.name) {
            return Err(ManagerError::Validation(format!(
                "job '{}' is system-owned and cannot be modified",
                job.name
            )));
        }
        let target = enabled.unwrap_or(!job.enabled);
        if job.enabled == target {
            return Ok(job);
        }
        self.update_job(
            id,
            JobPatch {
                enabled: Some(target),
                ..JobPatch::default()
            },
        )
        .await
    }

    /// Lookup by id. The watch job is hidden: its id resolves to `None`.
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.ensure_initialized()?;
        let job = self.inner.storage.find_job(id).await?;
        Ok(job.filter(|j| j.name != WATCH_JOB_NAME))
    }

    /// Soft-delete a job, stopping its timer on this replica first.
    pub async fn delete_job(&self, id: &str) -> Result<()> {
        self.ensure_initialized()?;
        if id.is_empty() {
            return Err(ManagerError::Validation("job id is required".into()));
        }
        let job = self
            .inner
            .storage
            .find_job(id)
            .await?
            .ok_or_else(|| StorageError::not_found("job", id))?;
        if is_reserved_name(&job.name) {
            return Err(ManagerError::Validation(format!(
                "job '{}' is system-owned and cannot be deleted",
                job.name
            )));
        }
        scheduler::stop_job(&self.inner, &job.name);
        self.inner.storage.delete_job(id).await?;
        Ok(())
    }

    /// Filtered, paginated job listing. Never returns the watch job.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<PaginatedResponse<Job>> {
        self.ensure_initialized()?;
        let mut page = self.inner.storage.find_jobs(filter).await?;
        page.data.retain(|j| j.name != WATCH_JOB_NAME);
        Ok(page)
    }

    /// Filtered, paginated run listing.
    pub async fn list_job_runs(&self, filter: &JobRunFilter) -> Result<PaginatedResponse<JobRun>> {
        self.ensure_initialized()?;
        Ok(self.inner.storage.find_job_runs(filter).await?)
    }

    /// The Control record.
    pub async fn get_control(&self) -> Result<Option<Control>> {
        self.ensure_initialized()?;
        Ok(self.inner.storage.get_control().await?)
    }

    /// Flip the fleet kill-switch. Writes without an optimistic guard, so
    /// it overwrites whatever is there.
    pub async fn toggle_control(&self) -> Result<Control> {
        self.ensure_initialized()?;
        let control = control::current_control(&self.inner).await?;
        let patch = ControlPatch {
            enabled: Some(!control.enabled),
            ..ControlPatch::default()
        };
        Ok(self.inner.storage.update_control(&control.id, patch).await?)
    }

    /// Operations hammer: clear the replica roster and stale flags, then
    /// re-register this replica cleanly.
    pub async fn purge_control(&self) -> Result<()> {
        self.ensure_initialized()?;
        let control = control::current_control(&self.inner).await?;
        control::update_control_with_retry(
            &self.inner,
            &control.id,
            ControlWrite {
                replicas: Some(Default::default()),
                stale: Some(Default::default()),
                exact_replicas: true,
                ..ControlWrite::default()
            },
            CONTROL_RETRY_MAX,
        )
        .await?;
        control::prepare(&self.inner).await
    }

    /// Register the execution for an `inline`-type job. Allowed before
    /// `initialize()` so handlers are in place when the first firing lands;
    /// re-registration replaces the previous execution.
    pub fn register_inline_handler<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(Context, Arc<Lens>) -> BoxFuture<'static, ExecutionResult>
            + Send
            + Sync
            + 'static,
    {
        if self.inner.is_destroyed() {
            return Err(ManagerError::Destroyed);
        }
        validate_job_name(name).map_err(ManagerError::Validation)?;
        if is_reserved_name(name) {
            return Err(ManagerError::Validation(format!(
                "job name '{name}' is reserved for the system"
            )));
        }
        self.inner
            .inline
            .lock()
            .expect("inline registry poisoned")
            .insert(name.to_string(), Arc::new(f));
        Ok(())
    }

    /// Remove an inline handler. Idempotent.
    pub fn unregister_inline_handler(&self, name: &str) {
        self.inner
            .inline
            .lock()
            .expect("inline registry poisoned")
            .remove(name);
    }

    /// Run one firing of a job immediately through the normal pipeline,
    /// with the same lock, persist, and silent semantics as a cron firing.
    pub async fn trigger_job(&self, name: &str) -> Result<()> {
        self.ensure_initialized()?;
        if name.is_empty() {
            return Err(ManagerError::Validation("job name is required".into()));
        }
        if is_reserved_name(name) {
            return Err(ManagerError::Validation(format!(
                "job '{name}' is system-owned and cannot be triggered"
            )));
        }
        let job = self
            .inner
            .storage
            .find_job_by_name(name)
            .await?
            .ok_or_else(|| StorageError::not_found("job", name))?;
        let execution = pipeline::build_execution(&self.inner, &job);
        pipeline::handle_job(&self.inner, name, execution).await
    }

    /// Store dynamic context for a job's distributed firings.
    pub async fn set_job_context(
        &self,
        name: &str,
        context: &Context,
        ttl_ms: Option<u64>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.inner.cache.set_job_context(name, context, ttl_ms).await;
        Ok(())
    }

    /// The cached dynamic context, if any.
    pub async fn get_job_context(&self, name: &str) -> Result<Option<Context>> {
        self.ensure_initialized()?;
        Ok(self.inner.cache.get_job_context(name).await)
    }

    /// Drop a job's dynamic context. Idempotent.
    pub async fn delete_job_context(&self, name: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.inner.cache.delete_job_context(name).await;
        Ok(())
    }

    /// Bump a job's batch counter, returning the new value.
    pub async fn increment_batch(&self, name: &str) -> Result<i64> {
        self.ensure_initialized()?;
        Ok(self.inner.cache.increment_batch(name).await)
    }

    /// Current batch counter, zero when absent.
    pub async fn get_batch(&self, name: &str) -> Result<i64> {
        self.ensure_initialized()?;
        Ok(self.inner.cache.get_batch(name).await)
    }

    /// Reset a job's batch counter. Idempotent.
    pub async fn reset_batch(&self, name: &str) -> Result<()> {
        self.ensure_initialized()?;
        self.inner.cache.reset_batch(name).await;
        Ok(())
    }

    /// Probe storage and cache. Usable in any lifecycle state.
    pub async fn health(&self) -> HealthReport {
        let storage_ok = self.inner.storage.get_control().await.is_ok();
        let cache_ok = self.inner.cache.is_healthy().await;
        HealthReport {
            initialized: self.is_initialized(),
            storage_ok,
            cache_ok,
            replica_id: self.inner.replica_id.clone(),
        }
    }

    /// Shared create/update validation over the job as it will exist.
    fn validate_job_definition(
        &self,
        job_type: JobType,
        enabled: bool,
        cron: Option<&str>,
        query: Option<&str>,
    ) -> Result<()> {
        if let Some(expr) = cron {
            scheduler::parse_cron(expr).map_err(ManagerError::Validation)?;
        }
        match job_type {
            JobType::Query => {
                if !self.inner.storage.supports_queries() {
                    return Err(ManagerError::Validation(
                        "the storage back end does not support query jobs".into(),
                    ));
                }
                if enabled && cron.is_some() && query.map_or(true, |q| q.trim().is_empty()) {
                    return Err(ManagerError::Validation(
                        "scheduled query jobs require a non-empty query".into(),
                    ));
                }
            }
            JobType::Method => {
                if enabled && cron.is_some() && self.inner.handler.is_none() {
                    return Err(ManagerError::Validation(
                        "scheduled method jobs require a configured handler".into(),
                    ));
                }
            }
            JobType::Inline => {}
        }
        Ok(())
    }
}
