//! SQLite storage back end.
//!
//! A single connection behind a `Mutex`, initialised by an idempotent
//! `init_db`. Rows are materialised into owned structs on every read, which
//! is also what gives callers their deep copies. Timestamps are stored as
//! fixed-precision RFC 3339 strings so string comparison orders them.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use ludari_core::{
    Control, ControlPatch, DeletedFilter, Job, JobFilter, JobPatch, JobRun, JobRunFilter,
    JobRunPatch, JobType, LogLevel, NewControl, NewJob, NewJobRun, PaginatedResponse,
    RunStatus, WATCH_JOB_NAME,
};

use ludari_core::filter::{clamp_page, effective_page_size};

use crate::{Result, Storage, StorageError};

/// SQLite-backed [`Storage`] implementation.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) a database file and initialise the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an already-open connection, initialising the schema.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Initialise tables. Safe to call on every startup (idempotent).
fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS controls (
            id          TEXT PRIMARY KEY,
            enabled     INTEGER NOT NULL,
            log_level   TEXT NOT NULL,
            replicas    TEXT NOT NULL,
            stale       TEXT NOT NULL,
            version     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            type        TEXT NOT NULL,
            enabled     INTEGER NOT NULL,
            cron        TEXT,
            query       TEXT,
            context     TEXT,
            persist     INTEGER NOT NULL,
            silent      INTEGER NOT NULL,
            deleted     TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_name ON jobs(name);
        CREATE TABLE IF NOT EXISTS job_runs (
            id          TEXT PRIMARY KEY,
            job_id      TEXT NOT NULL,
            started     TEXT NOT NULL,
            completed   TEXT,
            failed      TEXT,
            result      TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_job_runs_job ON job_runs(job_id, started);",
    )
}

// --- row mapping -----------------------------------------------------------

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_ts(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_set(s: &str) -> BTreeSet<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn set_json(set: &BTreeSet<String>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

fn row_to_control(row: &rusqlite::Row<'_>) -> rusqlite::Result<Control> {
    Ok(Control {
        id: row.get(0)?,
        enabled: row.get::<_, i64>(1)? != 0,
        log_level: LogLevel::parse_lenient(&row.get::<_, String>(2)?),
        replicas: parse_set(&row.get::<_, String>(3)?),
        stale: parse_set(&row.get::<_, String>(4)?),
        version: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
        updated_at: parse_ts(&row.get::<_, String>(7)?)?,
    })
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let context: Option<String> = row.get(6)?;
    Ok(Job {
        id: row.get(0)?,
        name: row.get(1)?,
        job_type: JobType::from_str(&row.get::<_, String>(2)?).unwrap_or_default(),
        enabled: row.get::<_, i64>(3)? != 0,
        cron: row.get(4)?,
        query: row.get(5)?,
        context: context.and_then(|c| serde_json::from_str(&c).ok()),
        persist: row.get::<_, i64>(7)? != 0,
        silent: row.get::<_, i64>(8)? != 0,
        deleted: parse_opt_ts(row.get(9)?)?,
        created_at: parse_ts(&row.get::<_, String>(10)?)?,
        updated_at: parse_ts(&row.get::<_, String>(11)?)?,
    })
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRun> {
    let result: Option<String> = row.get(5)?;
    Ok(JobRun {
        id: row.get(0)?,
        job_id: row.get(1)?,
        started: parse_ts(&row.get::<_, String>(2)?)?,
        completed: parse_opt_ts(row.get(3)?)?,
        failed: parse_opt_ts(row.get(4)?)?,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        created_at: parse_ts(&row.get::<_, String>(6)?)?,
        updated_at: parse_ts(&row.get::<_, String>(7)?)?,
    })
}

const JOB_COLUMNS: &str =
    "id, name, type, enabled, cron, query, context, persist, silent, deleted, created_at, updated_at";
const RUN_COLUMNS: &str = "id, job_id, started, completed, failed, result, created_at, updated_at";
const CONTROL_COLUMNS: &str =
    "id, enabled, log_level, replicas, stale, version, created_at, updated_at";

fn write_job(conn: &Connection, job: &Job) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE jobs SET name=?2, type=?3, enabled=?4, cron=?5, query=?6, context=?7,
                persist=?8, silent=?9, deleted=?10, updated_at=?11
         WHERE id=?1",
        rusqlite::params![
            job.id,
            job.name,
            job.job_type.to_string(),
            job.enabled as i64,
            job.cron,
            job.query,
            job.context
                .as_ref()
                .map(|c| serde_json::to_string(c).unwrap_or_default()),
            job.persist as i64,
            job.silent as i64,
            job.deleted.map(ts),
            ts(job.updated_at),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get_control(&self) -> Result<Option<Control>> {
        let conn = self.conn.lock().expect("storage poisoned");
        let control = conn
            .query_row(
                &format!("SELECT {CONTROL_COLUMNS} FROM controls LIMIT 1"),
                [],
                row_to_control,
            )
            .optional()?;
        Ok(control)
    }

    async fn create_control(&self, data: NewControl) -> Result<Control> {
        let conn = self.conn.lock().expect("storage poisoned");
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM controls", [], |r| r.get(0))?;
        if existing > 0 {
            return Err(StorageError::Conflict("control already exists".into()));
        }

        let now = Utc::now();
        let mut stale = data.stale;
        stale.retain(|r| data.replicas.contains(r));
        let control = Control {
            id: Uuid::new_v4().to_string(),
            enabled: data.enabled,
            log_level: data.log_level,
            replicas: data.replicas,
            stale,
            version: if data.version.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                data.version
            },
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            "INSERT INTO controls (id, enabled, log_level, replicas, stale, version, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?7)",
            rusqlite::params![
                control.id,
                control.enabled as i64,
                control.log_level.to_string(),
                set_json(&control.replicas),
                set_json(&control.stale),
                control.version,
                ts(now),
            ],
        )?;
        Ok(control)
    }

    async fn update_control(&self, id: &str, patch: ControlPatch) -> Result<Control> {
        let conn = self.conn.lock().expect("storage poisoned");
        let mut control = conn
            .query_row(
                &format!("SELECT {CONTROL_COLUMNS} FROM controls WHERE id = ?1"),
                [id],
                row_to_control,
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found("control", id))?;

        if let Some(expected) = &patch.expected_version {
            if *expected != control.version {
                return Err(StorageError::Conflict("control version mismatch".into()));
            }
        }

        control.apply_patch(patch);
        conn.execute(
            "UPDATE controls SET enabled=?2, log_level=?3, replicas=?4, stale=?5, version=?6, updated_at=?7
             WHERE id=?1",
            rusqlite::params![
                control.id,
                control.enabled as i64,
                control.log_level.to_string(),
                set_json(&control.replicas),
                set_json(&control.stale),
                control.version,
                ts(control.updated_at),
            ],
        )?;
        Ok(control)
    }

    async fn find_jobs(&self, filter: &JobFilter) -> Result<PaginatedResponse<Job>> {
        let conn = self.conn.lock().expect("storage poisoned");

        let mut clauses: Vec<String> = vec!["name <> ?".into()];
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(WATCH_JOB_NAME.to_string())];
        if let Some(name) = &filter.name {
            clauses.push("name = ?".into());
            params.push(Box::new(name.clone()));
        }
        if let Some(job_type) = filter.job_type {
            clauses.push("type = ?".into());
            params.push(Box::new(job_type.to_string()));
        }
        if let Some(enabled) = filter.enabled {
            clauses.push("enabled = ?".into());
            params.push(Box::new(enabled as i64));
        }
        match filter.deleted {
            DeletedFilter::All => {}
            DeletedFilter::Live => clauses.push("deleted IS NULL".into()),
            DeletedFilter::DeletedOnly => clauses.push("deleted IS NOT NULL".into()),
        }
        let where_sql = clauses.join(" AND ");

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs WHERE {where_sql}"),
            params_from_iter(params.iter().map(|p| p.as_ref())),
            |r| r.get(0),
        )?;

        let page_size = effective_page_size(filter.page_size);
        let (page, last_page) = clamp_page(filter.page, total as u64, page_size);
        let offset = (page as u64 - 1) * page_size as u64;

        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE {where_sql}
             ORDER BY created_at, id LIMIT {page_size} OFFSET {offset}"
        ))?;
        let data = stmt
            .query_map(params_from_iter(params.iter().map(|p| p.as_ref())), row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(PaginatedResponse {
            data,
            page,
            page_size,
            total: total as u64,
            last_page,
        })
    }

    async fn find_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().expect("storage poisoned");
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND deleted IS NULL"),
                [id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    async fn find_job_by_name(&self, name: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().expect("storage poisoned");
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE name = ?1 AND deleted IS NULL"),
                [name],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    async fn create_job(&self, data: NewJob) -> Result<Job> {
        let conn = self.conn.lock().expect("storage poisoned");
        let taken: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE name = ?1 AND deleted IS NULL",
            [&data.name],
            |r| r.get(0),
        )?;
        if taken > 0 {
            return Err(StorageError::Conflict(format!(
                "job name '{}' already exists",
                data.name
            )));
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: data.name,
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
        conn.execute(
            "INSERT INTO jobs (id, name, type, enabled, cron, query, context, persist, silent, deleted, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,NULL,?10,?10)",
            rusqlite::params![
                job.id,
                job.name,
                job.job_type.to_string(),
                job.enabled as i64,
                job.cron,
                job.query,
                job.context
                    .as_ref()
                    .map(|c| serde_json::to_string(c).unwrap_or_default()),
                job.persist as i64,
                job.silent as i64,
                ts(now),
            ],
        )?;
        Ok(job)
    }

    async fn update_job(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let conn = self.conn.lock().expect("storage poisoned");
        let mut job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id],
                row_to_job,
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found("job", id))?;

        if let Some(new_name) = &patch.name {
            if *new_name != job.name {
                let taken: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM jobs WHERE name = ?1 AND deleted IS NULL AND id <> ?2",
                    rusqlite::params![new_name, id],
                    |r| r.get(0),
                )?;
                if taken > 0 {
                    return Err(StorageError::Conflict(format!(
                        "job name '{new_name}' already exists"
                    )));
                }
            }
        }

        job.apply_patch(patch);
        write_job(&conn, &job)?;
        Ok(job)
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("storage poisoned");
        let now = ts(Utc::now());
        let changed = conn.execute(
            "UPDATE jobs SET deleted = ?2, updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, now],
        )?;
        if changed == 0 {
            return Err(StorageError::not_found("job", id));
        }
        Ok(())
    }

    async fn create_job_run(&self, data: NewJobRun) -> Result<JobRun> {
        let conn = self.conn.lock().expect("storage poisoned");
        let known: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE id = ?1",
            [&data.job_id],
            |r| r.get(0),
        )?;
        if known == 0 {
            return Err(StorageError::InvalidReference(format!(
                "job {} does not exist",
                data.job_id
            )));
        }

        let now = Utc::now();
        let run = JobRun {
            id: Uuid::new_v4().to_string(),
            job_id: data.job_id,
            started: data.started,
            completed: None,
            failed: None,
            result: data.result,
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            "INSERT INTO job_runs (id, job_id, started, completed, failed, result, created_at, updated_at)
             VALUES (?1,?2,?3,NULL,NULL,?4,?5,?5)",
            rusqlite::params![
                run.id,
                run.job_id,
                ts(run.started),
                run.result
                    .as_ref()
                    .map(|r| serde_json::to_string(r).unwrap_or_default()),
                ts(now),
            ],
        )?;
        Ok(run)
    }

    async fn update_job_run(&self, id: &str, patch: JobRunPatch) -> Result<JobRun> {
        let conn = self.conn.lock().expect("storage poisoned");
        let mut run = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE id = ?1"),
                [id],
                row_to_run,
            )
            .optional()?
            .ok_or_else(|| StorageError::not_found("job_run", id))?;

        run.apply_patch(patch);
        conn.execute(
            "UPDATE job_runs SET completed=?2, failed=?3, result=?4, updated_at=?5 WHERE id=?1",
            rusqlite::params![
                run.id,
                run.completed.map(ts),
                run.failed.map(ts),
                run.result
                    .as_ref()
                    .map(|r| serde_json::to_string(r).unwrap_or_default()),
                ts(run.updated_at),
            ],
        )?;
        Ok(run)
    }

    async fn find_job_runs(&self, filter: &JobRunFilter) -> Result<PaginatedResponse<JobRun>> {
        let conn = self.conn.lock().expect("storage poisoned");

        let mut clauses: Vec<String> = vec!["1 = 1".into()];
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(job_id) = &filter.job_id {
            clauses.push("job_id = ?".into());
            params.push(Box::new(job_id.clone()));
        }
        if let Some(after) = filter.started_after {
            clauses.push("started > ?".into());
            params.push(Box::new(ts(after)));
        }
        if let Some(before) = filter.started_before {
            clauses.push("started < ?".into());
            params.push(Box::new(ts(before)));
        }
        match filter.status {
            None => {}
            Some(RunStatus::Completed) => clauses.push("completed IS NOT NULL".into()),
            Some(RunStatus::Failed) => clauses.push("failed IS NOT NULL".into()),
            Some(RunStatus::Running) => {
                clauses.push("completed IS NULL AND failed IS NULL".into())
            }
        }
        let where_sql = clauses.join(" AND ");

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM job_runs WHERE {where_sql}"),
            params_from_iter(params.iter().map(|p| p.as_ref())),
            |r| r.get(0),
        )?;

        let page_size = effective_page_size(filter.page_size);
        let (page, last_page) = clamp_page(filter.page, total as u64, page_size);
        let offset = (page as u64 - 1) * page_size as u64;

        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM job_runs WHERE {where_sql}
             ORDER BY started, id LIMIT {page_size} OFFSET {offset}"
        ))?;
        let data = stmt
            .query_map(params_from_iter(params.iter().map(|p| p.as_ref())), row_to_run)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(PaginatedResponse {
            data,
            page,
            page_size,
            total: total as u64,
            last_page,
        })
    }

    fn supports_queries(&self) -> bool {
        true
    }

    async fn execute_query(&self, sql: &str) -> Result<Value> {
        let conn = self.conn.lock().expect("storage poisoned");
        let mut stmt = conn.prepare(sql)?;

        if stmt.column_count() == 0 {
            // no result columns: a write statement
            let affected = stmt.execute([])?;
            return Ok(serde_json::json!({ "rows_affected": affected }));
        }

        let names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut obj = serde_json::Map::new();
            for (i, name) in names.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => Value::from(n),
                    ValueRef::Real(f) => Value::from(f),
                    ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
                };
                obj.insert(name.clone(), value);
            }
            out.push(Value::Object(obj));
        }
        Ok(Value::Array(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SqliteStorage {
        SqliteStorage::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn control_round_trips_through_sql() {
        let s = storage();
        let created = s
            .create_control(NewControl {
                enabled: true,
                replicas: ["r1".to_string()].into(),
                ..NewControl::default()
            })
            .await
            .unwrap();

        let loaded = s.get_control().await.unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
        assert!(loaded.enabled);
        assert!(loaded.replicas.contains("r1"));

        assert_eq!(
            s.create_control(NewControl::default())
                .await
                .unwrap_err()
                .code(),
            "CONFLICT"
        );
    }

    #[tokio::test]
    async fn control_guard_is_enforced() {
        let s = storage();
        let control = s.create_control(NewControl::default()).await.unwrap();
        let err = s
            .update_control(
                &control.id,
                ControlPatch {
                    enabled: Some(true),
                    expected_version: Some("stale-token".into()),
                    ..ControlPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn job_crud_round_trips() {
        let s = storage();
        let mut context = ludari_core::Context::new();
        context.insert("distributed".into(), serde_json::json!(true));

        let job = s
            .create_job(NewJob {
                name: "sync".into(),
                job_type: JobType::Query,
                enabled: true,
                cron: Some("0 * * * *".into()),
                query: Some("SELECT 1".into()),
                context: Some(context),
                persist: true,
                silent: false,
            })
            .await
            .unwrap();

        let loaded = s.find_job(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.job_type, JobType::Query);
        assert_eq!(loaded.cron.as_deref(), Some("0 * * * *"));
        assert_eq!(
            loaded.context.unwrap()["distributed"],
            serde_json::json!(true)
        );

        let renamed = s
            .update_job(
                &job.id,
                JobPatch {
                    name: Some("sync-v2".into()),
                    cron: Some(None),
                    ..JobPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "sync-v2");
        assert!(renamed.cron.is_none());

        s.delete_job(&job.id).await.unwrap();
        assert!(s.find_job(&job.id).await.unwrap().is_none());
        assert!(s.find_job_by_name("sync-v2").await.unwrap().is_none());
        let tombstoned = s
            .find_jobs(&JobFilter {
                deleted: DeletedFilter::DeletedOnly,
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(tombstoned.data.len(), 1);
    }

    #[tokio::test]
    async fn pagination_clamps_and_slices() {
        let s = storage();
        for i in 0..7 {
            s.create_job(NewJob {
                name: format!("job-{i}"),
                enabled: true,
                ..NewJob::default()
            })
            .await
            .unwrap();
        }
        let page = s
            .find_jobs(&JobFilter {
                page: Some(99),
                page_size: Some(3),
                ..JobFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.last_page, 3);
        assert_eq!(page.page, 3);
        assert_eq!(page.data.len(), 1);
    }

    #[tokio::test]
    async fn runs_filter_by_status_and_bounds() {
        let s = storage();
        let job = s
            .create_job(NewJob {
                name: "j".into(),
                ..NewJob::default()
            })
            .await
            .unwrap();

        let run = s
            .create_job_run(NewJobRun {
                job_id: job.id.clone(),
                started: Utc::now(),
                result: None,
            })
            .await
            .unwrap();
        s.update_job_run(
            &run.id,
            JobRunPatch {
                failed: Some(Utc::now()),
                result: Some(serde_json::json!("boom")),
                ..JobRunPatch::default()
            },
        )
        .await
        .unwrap();

        let failed = s
            .find_job_runs(&JobRunFilter {
                status: Some(RunStatus::Failed),
                job_id: Some(job.id),
                ..JobRunFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.data.len(), 1);
        assert_eq!(failed.data[0].result, Some(serde_json::json!("boom")));

        assert_eq!(
            s.create_job_run(NewJobRun {
                job_id: "ghost".into(),
                started: Utc::now(),
                result: None,
            })
            .await
            .unwrap_err()
            .code(),
            "INVALID_REFERENCE"
        );
    }

    #[tokio::test]
    async fn execute_query_returns_rows_and_counts() {
        let s = storage();
        assert!(s.supports_queries());

        let rows = s.execute_query("SELECT 1 AS one, 'x' AS label").await.unwrap();
        assert_eq!(rows, serde_json::json!([{"one": 1, "label": "x"}]));

        s.create_job(NewJob {
            name: "j".into(),
            ..NewJob::default()
        })
        .await
        .unwrap();
        let affected = s
            .execute_query("UPDATE jobs SET silent = 1")
            .await
            .unwrap();
        assert_eq!(affected, serde_json::json!({"rows_affected": 1}));
    }
}
