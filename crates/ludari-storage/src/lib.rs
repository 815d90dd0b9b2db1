//! `ludari-storage` — typed persistence for Control, Job, and JobRun.
//!
//! The [`Storage`] trait is the contract every back end implements; two
//! conforming back ends ship in-tree: [`MemoryStorage`] (reference
//! implementation, also the multi-replica test double) and
//! [`SqliteStorage`].
//!
//! Contract-wide guarantees:
//!
//! - every read returns a deep copy: no caller can mutate persisted state
//!   through a reference obtained via a read,
//! - `Control` is a singleton with an optimistic guard (`expected_version`),
//!   and `stale` is kept a subset of `replicas` on every write,
//! - jobs are soft-deleted; tombstoned rows are invisible to `find_job`,
//!   `find_job_by_name`, and (by default) `find_jobs`,
//! - the reserved watch job never appears in `find_jobs` results.

mod error;
mod memory;
mod sqlite;

pub use error::{Result, StorageError};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use serde_json::Value;

use ludari_core::{
    Control, ControlPatch, Job, JobFilter, JobPatch, JobRun, JobRunFilter, JobRunPatch,
    NewControl, NewJob, NewJobRun, PaginatedResponse,
};

/// Persistence contract consumed by the Manager.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The Control singleton, or `None` before first initialization.
    async fn get_control(&self) -> Result<Option<Control>>;

    /// Create the singleton. Fails with `Conflict` when one already exists.
    async fn create_control(&self, data: NewControl) -> Result<Control>;

    /// Patch the singleton. When `patch.expected_version` is present and
    /// differs from the stored token the update fails with `Conflict`;
    /// `patch.version` assigns a new token.
    async fn update_control(&self, id: &str, patch: ControlPatch) -> Result<Control>;

    /// Filtered, paginated job listing. Never returns the watch job.
    async fn find_jobs(&self, filter: &JobFilter) -> Result<PaginatedResponse<Job>>;

    /// Lookup by id; `None` for unknown or tombstoned rows.
    async fn find_job(&self, id: &str) -> Result<Option<Job>>;

    /// Lookup by name; `None` for unknown or tombstoned rows.
    async fn find_job_by_name(&self, name: &str) -> Result<Option<Job>>;

    /// Create a job. Fails with `Conflict` when the name collides with a
    /// live job.
    async fn create_job(&self, data: NewJob) -> Result<Job>;

    /// Patch a job. Fails with `NotFound` when absent and `Conflict` when a
    /// rename collides with another live job.
    async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job>;

    /// Soft delete: sets the tombstone timestamp. Fails with `NotFound`
    /// when absent.
    async fn delete_job(&self, id: &str) -> Result<()>;

    /// Record the start of an execution. Fails with `INVALID_REFERENCE`
    /// when `job_id` is unknown.
    async fn create_job_run(&self, data: NewJobRun) -> Result<JobRun>;

    /// Terminal update of a run. Fails with `NotFound` when absent.
    async fn update_job_run(&self, id: &str, patch: JobRunPatch) -> Result<JobRun>;

    /// Filtered, paginated run listing.
    async fn find_job_runs(&self, filter: &JobRunFilter) -> Result<PaginatedResponse<JobRun>>;

    /// Whether [`execute_query`](Storage::execute_query) is implemented.
    /// When false, query-type jobs are not supported on this back end.
    fn supports_queries(&self) -> bool {
        false
    }

    /// Raw-query pass-through for query-type jobs.
    async fn execute_query(&self, _sql: &str) -> Result<Value> {
        Err(StorageError::NotSupported(
            "raw queries are not supported by this storage back end".into(),
        ))
    }
}
