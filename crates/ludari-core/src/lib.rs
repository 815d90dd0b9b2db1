//! `ludari-core` — shared data model for the ludari orchestration engine.
//!
//! Holds the three persisted entities (`Control`, `Job`, `JobRun`), the
//! filter and pagination types consumed by the storage contract, the
//! execution-context helpers, job-name rules, and the host-facing `Logger`
//! contract. Everything here is plain data; behaviour lives in the storage,
//! cache, and manager crates.

pub mod context;
pub mod filter;
pub mod logger;
pub mod names;
pub mod types;

pub use context::{ctx_flag, ctx_ttl_secs, is_truthy, merge_context, Context};
pub use filter::{DeletedFilter, JobFilter, JobRunFilter, PaginatedResponse, RunStatus};
pub use logger::{Logger, TracingLogger};
pub use names::{
    is_reserved_name, validate_job_name, validate_replica_id, WATCH_JOB_NAME,
};
pub use types::{
    Control, ControlPatch, Job, JobPatch, JobRun, JobRunPatch, JobType, LogLevel, NewControl,
    NewJob, NewJobRun,
};
