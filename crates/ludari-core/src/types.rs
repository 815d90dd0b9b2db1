use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;

/// Execution binding of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Looked up in the replica-local inline handler registry by job name.
    #[default]
    Inline,
    /// Dispatched by name on the host-provided method handler.
    Method,
    /// A persisted SQL string executed through the storage back end.
    Query,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Inline => "inline",
            JobType::Method => "method",
            JobType::Query => "query",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inline" => Ok(JobType::Inline),
            "method" => Ok(JobType::Method),
            "query" => Ok(JobType::Query),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// Fleet-wide log verbosity, gated by the Manager on every emission.
///
/// Ordering is `error < warn < info < debug`: a message is emitted when its
/// level is at or below the configured one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// True when a message at `level` should be emitted under `self`.
    pub fn allows(self, level: LogLevel) -> bool {
        level <= self
    }

    /// Permissive parse: any unknown value reads as `info`.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        write!(f, "{s}")
    }
}

/// The singleton coordination record shared by every replica.
///
/// Invariants: `stale ⊆ replicas`; at most one row exists; every read from
/// storage returns a deep copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
    pub id: String,
    /// Global kill-switch; when false no replica schedules anything.
    pub enabled: bool,
    pub log_level: LogLevel,
    /// Replica identifiers known to be alive.
    pub replicas: BTreeSet<String>,
    /// Replicas that must rebuild their scheduler on the next watch tick.
    pub stale: BTreeSet<String>,
    /// Opaque optimistic-concurrency token; rotated by writers that intend
    /// to force conflicts on concurrent updates.
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for creating the Control singleton.
#[derive(Debug, Clone, Default)]
pub struct NewControl {
    pub enabled: bool,
    pub log_level: LogLevel,
    pub replicas: BTreeSet<String>,
    pub stale: BTreeSet<String>,
    pub version: String,
}

/// Partial update of the Control record.
///
/// `expected_version` is the optimistic guard: when present it must equal
/// the stored token or the update fails with a conflict. `version` assigns a
/// new token, which makes every concurrent writer still holding the old one
/// conflict on its next attempt.
#[derive(Debug, Clone, Default)]
pub struct ControlPatch {
    pub enabled: Option<bool>,
    pub log_level: Option<LogLevel>,
    pub replicas: Option<BTreeSet<String>>,
    pub stale: Option<BTreeSet<String>>,
    pub expected_version: Option<String>,
    pub version: Option<String>,
}

impl Control {
    /// Apply a patch in place, refreshing `updated_at` and re-establishing
    /// the `stale ⊆ replicas` invariant. The optimistic guard is the storage
    /// back end's job; this only merges fields.
    pub fn apply_patch(&mut self, patch: ControlPatch) {
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(level) = patch.log_level {
            self.log_level = level;
        }
        if let Some(replicas) = patch.replicas {
            self.replicas = replicas;
        }
        if let Some(stale) = patch.stale {
            self.stale = stale;
        }
        if let Some(version) = patch.version {
            self.version = version;
        }
        let replicas = self.replicas.clone();
        self.stale.retain(|r| replicas.contains(r));
        self.updated_at = Utc::now();
    }
}

/// A scheduled or ad-hoc job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Unique among non-deleted jobs; `[A-Za-z0-9_-]{1,100}`.
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub enabled: bool,
    /// 5- or 6-field cron expression; absent for ad-hoc jobs.
    pub cron: Option<String>,
    /// For query jobs: the SQL string, stored as a crypto envelope when a
    /// query secret is configured, plaintext otherwise.
    pub query: Option<String>,
    /// Static execution context merged with the cached dynamic context.
    pub context: Option<Context>,
    /// Record a JobRun per firing.
    pub persist: bool,
    /// Suppress the started/completed lifecycle log lines.
    pub silent: bool,
    /// Soft-delete tombstone.
    pub deleted: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for creating a job.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub name: String,
    pub job_type: JobType,
    pub enabled: bool,
    pub cron: Option<String>,
    pub query: Option<String>,
    pub context: Option<Context>,
    pub persist: bool,
    pub silent: bool,
}

/// Partial update of a job.
///
/// Nullable columns use a nested Option: the outer level is "touch this
/// field at all", the inner one is the new value (`Some(None)` clears it).
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub name: Option<String>,
    pub job_type: Option<JobType>,
    pub enabled: Option<bool>,
    pub cron: Option<Option<String>>,
    pub query: Option<Option<String>>,
    pub context: Option<Option<Context>>,
    pub persist: Option<bool>,
    pub silent: Option<bool>,
}

impl Job {
    /// Apply a patch in place, refreshing `updated_at`. Uniqueness and
    /// name-index maintenance stay with the storage back end.
    pub fn apply_patch(&mut self, patch: JobPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(job_type) = patch.job_type {
            self.job_type = job_type;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(cron) = patch.cron {
            self.cron = cron;
        }
        if let Some(query) = patch.query {
            self.query = query;
        }
        if let Some(context) = patch.context {
            self.context = context;
        }
        if let Some(persist) = patch.persist {
            self.persist = persist;
        }
        if let Some(silent) = patch.silent {
            self.silent = silent;
        }
        self.updated_at = Utc::now();
    }
}

/// One execution record for a job with `persist` set.
///
/// `completed` and `failed` are mutually exclusive; a run with neither is
/// still running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: String,
    pub job_id: String,
    pub started: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,
    /// The execution's return value, or the Lens frames string.
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data for creating a job run.
#[derive(Debug, Clone)]
pub struct NewJobRun {
    pub job_id: String,
    pub started: DateTime<Utc>,
    pub result: Option<Value>,
}

/// Terminal update of a job run.
#[derive(Debug, Clone, Default)]
pub struct JobRunPatch {
    pub completed: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,
    pub result: Option<Value>,
}

impl JobRun {
    /// Apply a terminal patch in place, refreshing `updated_at`.
    pub fn apply_patch(&mut self, patch: JobRunPatch) {
        if let Some(completed) = patch.completed {
            self.completed = Some(completed);
        }
        if let Some(failed) = patch.failed {
            self.failed = Some(failed);
        }
        if let Some(result) = patch.result {
            self.result = Some(result);
        }
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_ordering_gates_emission() {
        assert!(LogLevel::Info.allows(LogLevel::Error));
        assert!(LogLevel::Info.allows(LogLevel::Warn));
        assert!(LogLevel::Info.allows(LogLevel::Info));
        assert!(!LogLevel::Info.allows(LogLevel::Debug));
        assert!(LogLevel::Debug.allows(LogLevel::Debug));
        assert!(!LogLevel::Error.allows(LogLevel::Warn));
    }

    #[test]
    fn unknown_log_level_reads_as_info() {
        assert_eq!(LogLevel::parse_lenient("verbose"), LogLevel::Info);
        assert_eq!(LogLevel::parse_lenient(""), LogLevel::Info);
        assert_eq!(LogLevel::parse_lenient("debug"), LogLevel::Debug);
    }

    #[test]
    fn job_type_serializes_lowercase() {
        let json = serde_json::to_string(&JobType::Method).unwrap();
        assert_eq!(json, r#""method""#);
        let back: JobType = serde_json::from_str(r#""query""#).unwrap();
        assert_eq!(back, JobType::Query);
    }

    #[test]
    fn job_serializes_type_field_name() {
        let job = Job {
            id: "j-1".into(),
            name: "nightly".into(),
            job_type: JobType::Inline,
            enabled: true,
            cron: Some("0 0 * * *".into()),
            query: None,
            context: None,
            persist: false,
            silent: false,
            deleted: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains(r#""type":"inline""#));
    }
}
