//! `ludari` — multi-replica cron job orchestration.
//!
//! # Overview
//!
//! Operators define named jobs with cron schedules and one of three
//! execution bindings; any number of engine replicas coordinate through a
//! shared [`Storage`] back end (definitions, run history, the Control
//! record) and a shared [`Cache`] (distributed locks, dynamic context,
//! batch counters), so a job that opts into distributed locking fires on at
//! most one replica at a time.
//!
//! # Execution bindings
//!
//! | Type     | Bound to                                                  |
//! |----------|-----------------------------------------------------------|
//! | `inline` | A closure registered on this replica under the job's name |
//! | `method` | Named dispatch on the host's [`Handler`]                  |
//! | `query`  | A stored SQL string run through [`Storage::execute_query`] |
//!
//! # Cross-replica reconciliation
//!
//! Every schedulable mutation marks the whole fleet stale on the Control
//! record. Each replica notices its own flag on the next tick of the
//! system watch job and rebuilds its scheduler, so definitions written on
//! one replica start firing everywhere within one watch interval.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ludari::{Manager, ManagerOptions, MemoryStorage, TracingLogger};
//!
//! # async fn demo() -> ludari::Result<()> {
//! let manager = Manager::new(
//!     ManagerOptions::new(Arc::new(MemoryStorage::new()), Arc::new(TracingLogger))
//!         .enabled(true),
//! )?;
//! manager.initialize().await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod config;
mod control;
mod error;
mod handler;
mod manager;
mod pipeline;
mod scheduler;
mod watchdog;

pub use api::HealthReport;
pub use config::{ManagerOptions, DEFAULT_WATCH_INTERVAL_SECS, ENV_REPLICA_ID};
pub use error::{ManagerError, Result};
pub use handler::{
    ExecutionError, ExecutionResult, Handler, HandlerRegistry, InlineHandler, JobOutcome,
};
pub use manager::Manager;

// Re-export the collaborator contracts and the data model so a host can
// depend on this crate alone.
pub use futures::future::BoxFuture;
pub use ludari_cache::{Cache, LockAcquisition, LockOptions, MemoryCache};
pub use ludari_core::{
    is_reserved_name, Context, Control, ControlPatch, DeletedFilter, Job, JobFilter, JobPatch,
    JobRun, JobRunFilter, JobType, LogLevel, Logger, NewJob, PaginatedResponse, RunStatus,
    TracingLogger, WATCH_JOB_NAME,
};
pub use ludari_crypto::CryptoError;
pub use ludari_lens::{Frame, FrameLevel, Lens, LensError};
pub use ludari_storage::{MemoryStorage, SqliteStorage, Storage, StorageError};
