//! In-memory storage back end.
//!
//! The reference implementation of the contract, and the back end shared by
//! multiple Managers in multi-replica tests. State lives behind one
//! `RwLock`; reads clone whole rows, so copy-on-read comes for free.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use ludari_core::{
    Control, ControlPatch, DeletedFilter, Job, JobFilter, JobPatch, JobRun, JobRunFilter,
    JobRunPatch, NewControl, NewJob, NewJobRun, PaginatedResponse, RunStatus, WATCH_JOB_NAME,
};

use crate::{Result, Storage, StorageError};

#[derive(Default)]
struct MemState {
    control: Option<Control>,
    jobs: HashMap<String, Job>,
    /// live (non-tombstoned) job name → id
    name_index: HashMap<String, String>,
    runs: HashMap<String, JobRun>,
}

/// In-memory [`Storage`] implementation.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_control(&self) -> Result<Option<Control>> {
        Ok(self.state.read().expect("storage poisoned").control.clone())
    }

    async fn create_control(&self, data: NewControl) -> Result<Control> {
        let mut state = self.state.write().expect("storage poisoned");
        if state.control.is_some() {
            return Err(StorageError::Conflict("control already exists".into()));
        }
        let now = Utc::now();
        let mut stale = data.stale;
        stale.retain(|r| data.replicas.contains(r));
        let control = Control {
            id: fresh_id(),
            enabled: data.enabled,
            log_level: data.log_level,
            replicas: data.replicas,
            stale,
            version: if data.version.is_empty() {
                fresh_id()
            } else {
                data.version
            },
            created_at: now,
            updated_at: now,
        };
        state.control = Some(control.clone());
        Ok(control)
    }

    async fn update_control(&self, id: &str, patch: ControlPatch) -> Result<Control> {
        let mut state = self.state.write().expect("storage poisoned");
        let control = state
            .control
            .as_mut()
            .filter(|c| c.id == id)
            .ok_or_else(|| StorageError::not_found("control", id))?;

        if let Some(expected) = &patch.expected_version {
            if *expected != control.version {
                return Err(StorageError::Conflict("control version mismatch".into()));
            }
        }

        control.apply_patch(patch);
        Ok(control.clone())
    }

    async fn find_jobs(&self, filter: &JobFilter) -> Result<PaginatedResponse<Job>> {
        let state = self.state.read().expect("storage poisoned");
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.name != WATCH_JOB_NAME)
            .filter(|j| filter.name.as_ref().is_none_or(|n| j.name == *n))
            .filter(|j| filter.job_type.is_none_or(|t| j.job_type == t))
            .filter(|j| filter.enabled.is_none_or(|e| j.enabled == e))
            .filter(|j| match filter.deleted {
                DeletedFilter::All => true,
                DeletedFilter::Live => j.deleted.is_none(),
                DeletedFilter::DeletedOnly => j.deleted.is_some(),
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(PaginatedResponse::paginate(
            jobs,
            filter.page,
            filter.page_size,
        ))
    }

    async fn find_job(&self, id: &str) -> Result<Option<Job>> {
        let state = self.state.read().expect("storage poisoned");
        Ok(state
            .jobs
            .get(id)
            .filter(|j| j.deleted.is_none())
            .cloned())
    }

    async fn find_job_by_name(&self, name: &str) -> Result<Option<Job>> {
        let state = self.state.read().expect("storage poisoned");
        Ok(state
            .name_index
            .get(name)
            .and_then(|id| state.jobs.get(id))
            .filter(|j| j.deleted.is_none())
            .cloned())
    }

    async fn create_job(&self, data: NewJob) -> Result<Job> {
        let mut state = self.state.write().expect("storage poisoned");
        if state.name_index.contains_key(&data.name) {
            return Err(StorageError::Conflict(format!(
                "job name '{}' already exists",
                data.name
            )));
        }
        let now = Utc::now();
        let job = Job {
            id: fresh_id(),
            name: data.name.clone(),
            job_type: data.job_type,
            enabled: data.enabled,
            cron: data.cron,
            query: data.query,
            context: data.context,
            persist: data.persist,
            silent: data.silent,
            deleted: None,
            created_at: now,
            updated_at: now,
        };
        state.name_index.insert(data.name, job.id.clone());
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let mut state = self.state.write().expect("storage poisoned");

        if let Some(new_name) = &patch.name {
            let current = state
                .jobs
                .get(id)
                .ok_or_else(|| StorageError::not_found("job", id))?;
            if *new_name != current.name {
                if let Some(holder) = state.name_index.get(new_name) {
                    if holder != id {
                        return Err(StorageError::Conflict(format!(
                            "job name '{new_name}' already exists"
                        )));
                    }
                }
            }
        }

        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("job", id))?;

        let old_name = job.name.clone();
        job.apply_patch(patch);
        let updated = job.clone();

        // keep the name → id secondary index current
        if updated.deleted.is_none() && old_name != updated.name {
            state.name_index.remove(&old_name);
            state
                .name_index
                .insert(updated.name.clone(), updated.id.clone());
        }
        Ok(updated)
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().expect("storage poisoned");
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("job", id))?;
        job.deleted = Some(Utc::now());
        job.updated_at = Utc::now();
        let name = job.name.clone();
        state.name_index.remove(&name);
        Ok(())
    }

    async fn create_job_run(&self, data: NewJobRun) -> Result<JobRun> {
        let mut state = self.state.write().expect("storage poisoned");
        if !state.jobs.contains_key(&data.job_id) {
            return Err(StorageError::InvalidReference(format!(
                "job {} does not exist",
                data.job_id
            )));
        }
        let now = Utc::now();
        let run = JobRun {
            id: fresh_id(),
            job_id: data.job_id,
            started: data.started,
            completed: None,
            failed: None,
            result: data.result,
            created_at: now,
            updated_at: now,
        };
        state.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn update_job_run(&self, id: &str, patch: JobRunPatch) -> Result<JobRun> {
        let mut state = self.state.write().expect("storage poisoned");
        let run = state
            .runs
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("job_run", id))?;
        run.apply_patch(patch);
        Ok(run.clone())
    }

    async fn find_job_runs(&self, filter: &JobRunFilter) -> Result<PaginatedResponse<JobRun>> {
        let state = self.state.read().expect("storage poisoned");
        let mut runs: Vec<JobRun> = state
            .runs
            .values()
            .filter(|r| filter.job_id.as_ref().is_none_or(|id| r.job_id == *id))
            .filter(|r| filter.started_after.is_none_or(|t| r.started > t))
            .filter(|r| filter.started_before.is_none_or(|t| r.started < t))
            .filter(|r| match filter.status {
                None => true,
                Some(RunStatus::Completed) => r.completed.is_some(),
                Some(RunStatus::Failed) => r.failed.is_some(),
                Some(RunStatus::Running) => r.completed.is_none() && r.failed.is_none(),
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.started.cmp(&b.started).then(a.id.cmp(&b.id)));
        Ok(PaginatedResponse::paginate(
            runs,
            filter.page,
            filter.page_size,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ludari_core::{JobType, LogLevel};

    fn new_job(name: &str) -> NewJob {
        NewJob {
            name: name.into(),
            job_type: JobType::Inline,
            enabled: true,
            ..NewJob::default()
        }
    }

    #[tokio::test]
    async fn control_is_a_singleton() {
        let storage = MemoryStorage::new();
        assert!(storage.get_control().await.unwrap().is_none());
        storage.create_control(NewControl::default()).await.unwrap();
        let err = storage
            .create_control(NewControl::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn control_guard_rejects_stale_writers() {
        let storage = MemoryStorage::new();
        let control = storage.create_control(NewControl::default()).await.unwrap();

        // a writer that read the current token wins and rotates it
        let rotated = storage
            .update_control(
                &control.id,
                ControlPatch {
                    enabled: Some(true),
                    expected_version: Some(control.version.clone()),
                    version: Some("v2".into()),
                    ..ControlPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(rotated.version, "v2");
        assert!(rotated.enabled);

        // a writer still holding the old token conflicts
        let err = storage
            .update_control(
                &control.id,
                ControlPatch {
                    enabled: Some(false),
                    expected_version: Some(control.version),
                    ..ControlPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        // no guard: overwrite accepted
        let overwritten = storage
            .update_control(
                &control.id,
                ControlPatch {
                    log_level: Some(LogLevel::Debug),
                    ..ControlPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(overwritten.log_level, LogLevel::Debug);
    }

    #[tokio::test]
    async fn stale_stays_subset_of_replicas() {
        let storage = MemoryStorage::new();
        let control = storage
            .create_control(NewControl {
                replicas: ["r1".to_string(), "r2".to_string()].into(),
                stale: ["r1".to_string(), "ghost".to_string()].into(),
                ..NewControl::default()
            })
            .await
            .unwrap();
        assert!(control.stale.contains("r1"));
        assert!(!control.stale.contains("ghost"));

        let updated = storage
            .update_control(
                &control.id,
                ControlPatch {
                    replicas: Some(["r2".to_string()].into()),
                    ..ControlPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.stale.is_empty());
    }

    #[tokio::test]
    async fn duplicate_names_conflict_until_deleted() {
        let storage = MemoryStorage::new();
        let job = storage.create_job(new_job("sync")).await.unwrap();
        assert_eq!(
            storage.create_job(new_job("sync")).await.unwrap_err().code(),
            "CONFLICT"
        );

        storage.delete_job(&job.id).await.unwrap();
        // tombstoned rows free the name
        storage.create_job(new_job("sync")).await.unwrap();
    }

    #[tokio::test]
    async fn tombstoned_jobs_are_invisible_to_lookups() {
        let storage = MemoryStorage::new();
        let job = storage.create_job(new_job("sync")).await.unwrap();
        storage.delete_job(&job.id).await.unwrap();

        assert!(storage.find_job(&job.id).await.unwrap().is_none());
        assert!(storage.find_job_by_name("sync").await.unwrap().is_none());

        let live = storage
            .find_jobs(&JobFilter {
                deleted: DeletedFilter::Live,
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert!(live.data.is_empty());

        let deleted = storage
            .find_jobs(&JobFilter {
                deleted: DeletedFilter::DeletedOnly,
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(deleted.data.len(), 1);
        assert_eq!(deleted.data[0].id, job.id);
    }

    #[tokio::test]
    async fn rename_updates_the_name_index() {
        let storage = MemoryStorage::new();
        let a = storage.create_job(new_job("alpha")).await.unwrap();
        storage.create_job(new_job("beta")).await.unwrap();

        // collision with another live job
        let err = storage
            .update_job(
                &a.id,
                JobPatch {
                    name: Some("beta".into()),
                    ..JobPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        storage
            .update_job(
                &a.id,
                JobPatch {
                    name: Some("gamma".into()),
                    ..JobPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(storage.find_job_by_name("alpha").await.unwrap().is_none());
        assert_eq!(
            storage.find_job_by_name("gamma").await.unwrap().unwrap().id,
            a.id
        );
    }

    #[tokio::test]
    async fn watch_job_never_appears_in_listings() {
        let storage = MemoryStorage::new();
        storage.create_job(new_job(WATCH_JOB_NAME)).await.unwrap();
        storage.create_job(new_job("visible")).await.unwrap();

        let listed = storage.find_jobs(&JobFilter::default()).await.unwrap();
        assert_eq!(listed.data.len(), 1);
        assert_eq!(listed.data[0].name, "visible");

        // but the manager can still reach it by name
        assert!(storage
            .find_job_by_name(WATCH_JOB_NAME)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn run_creation_requires_a_known_job() {
        let storage = MemoryStorage::new();
        let err = storage
            .create_job_run(NewJobRun {
                job_id: "ghost".into(),
                started: Utc::now(),
                result: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REFERENCE");
    }

    #[tokio::test]
    async fn run_filters_apply_strict_bounds_and_status() {
        let storage = MemoryStorage::new();
        let job = storage.create_job(new_job("sync")).await.unwrap();

        let t0 = Utc::now();
        let run = storage
            .create_job_run(NewJobRun {
                job_id: job.id.clone(),
                started: t0,
                result: None,
            })
            .await
            .unwrap();

        // strict inequality: a bound equal to `started` excludes the run
        let after = storage
            .find_job_runs(&JobRunFilter {
                started_after: Some(t0),
                ..JobRunFilter::default()
            })
            .await
            .unwrap();
        assert!(after.data.is_empty());

        let running = storage
            .find_job_runs(&JobRunFilter {
                status: Some(RunStatus::Running),
                ..JobRunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(running.data.len(), 1);

        storage
            .update_job_run(
                &run.id,
                JobRunPatch {
                    completed: Some(Utc::now()),
                    result: Some(serde_json::json!({"rows": 3})),
                    ..JobRunPatch::default()
                },
            )
            .await
            .unwrap();

        let completed = storage
            .find_job_runs(&JobRunFilter {
                status: Some(RunStatus::Completed),
                job_id: Some(job.id),
                ..JobRunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.data.len(), 1);
        assert_eq!(completed.data[0].result, Some(serde_json::json!({"rows": 3})));
    }

    #[tokio::test]
    async fn unknown_ids_surface_not_found() {
        let storage = MemoryStorage::new();
        assert_eq!(
            storage
                .update_job("ghost", JobPatch::default())
                .await
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            storage.delete_job("ghost").await.unwrap_err().code(),
            "NOT_FOUND"
        );
        assert_eq!(
            storage
                .update_job_run("ghost", JobRunPatch::default())
                .await
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn queries_are_not_supported_in_memory() {
        let storage = MemoryStorage::new();
        assert!(!storage.supports_queries());
        assert_eq!(
            storage.execute_query("SELECT 1").await.unwrap_err().code(),
            "NOT_SUPPORTED"
        );
    }
}
