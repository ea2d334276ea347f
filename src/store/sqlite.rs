//! SQLite-based job store.

use super::JobStore;
use crate::error::{Result, TubeflowError};
use crate::executor::{ExecutorError, StageOutput};
use crate::pipeline::{Job, JobId, JobStatus, Stage, StageResult, StageStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        created_at TEXT NOT NULL,
        cancelled_at TEXT,
        status TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

    CREATE TABLE IF NOT EXISTS stage_results (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        job_id TEXT NOT NULL REFERENCES jobs(id),
        stage TEXT NOT NULL,
        attempt INTEGER NOT NULL,
        status TEXT NOT NULL,
        output_json TEXT,
        error_code TEXT,
        error_message TEXT,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_stage_results_job_id ON stage_results(job_id);
"#;

/// SQLite-based job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

/// Columns of a `stage_results` row before parsing.
struct ResultRow {
    id: String,
    job_id: String,
    stage: String,
    attempt: u32,
    status: String,
    output_json: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    started_at: String,
    finished_at: String,
}

impl SqliteJobStore {
    /// Open (or create) a job database at `path`.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite job store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory job store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TubeflowError::Store(format!("Failed to acquire lock: {}", e)))
    }

    fn load_results(conn: &Connection, job_id: &str) -> Result<Vec<StageResult>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, job_id, stage, attempt, status, output_json,
                   error_code, error_message, started_at, finished_at
            FROM stage_results
            WHERE job_id = ?1
            ORDER BY seq
            "#,
        )?;

        let rows = stmt.query_map(params![job_id], |row| {
            Ok(ResultRow {
                id: row.get(0)?,
                job_id: row.get(1)?,
                stage: row.get(2)?,
                attempt: row.get(3)?,
                status: row.get(4)?,
                output_json: row.get(5)?,
                error_code: row.get(6)?,
                error_message: row.get(7)?,
                started_at: row.get(8)?,
                finished_at: row.get(9)?,
            })
        })?;

        let results = rows
            .map(|row| parse_result(row?))
            .collect::<Result<Vec<_>>>()?;
        Ok(results)
    }

    fn job_from_row(
        conn: &Connection,
        id: String,
        source: String,
        created_at: String,
        cancelled_at: Option<String>,
    ) -> Result<Job> {
        let results = Self::load_results(conn, &id)?;
        Ok(Job {
            id: parse_uuid(&id)?,
            source,
            created_at: parse_time(&created_at)?,
            cancelled_at: cancelled_at.as_deref().map(parse_time).transpose()?,
            results,
            in_flight: Default::default(),
            not_started: Default::default(),
        })
    }
}

impl JobStore for SqliteJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    fn save_job(&self, job: &Job, status: JobStatus) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO jobs (id, source, created_at, cancelled_at, status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                cancelled_at = excluded.cancelled_at,
                status = excluded.status
            "#,
            params![
                job.id.to_string(),
                job.source,
                job.created_at.to_rfc3339(),
                job.cancelled_at.map(|dt| dt.to_rfc3339()),
                status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn update_status(&self, job_id: JobId, status: JobStatus) -> Result<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE jobs SET status = ?1 WHERE id = ?2",
            params![status.as_str(), job_id.to_string()],
        )?;
        if updated == 0 {
            return Err(TubeflowError::NotFound(job_id.to_string()));
        }
        Ok(())
    }

    #[instrument(skip(self, result), fields(job_id = %result.job_id, stage = %result.stage, attempt = result.attempt))]
    fn append_result(&self, result: &StageResult) -> Result<()> {
        let output_json = result
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO stage_results
                (id, job_id, stage, attempt, status, output_json,
                 error_code, error_message, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                result.id.to_string(),
                result.job_id.to_string(),
                result.stage.as_str(),
                result.attempt,
                result.status.as_str(),
                output_json,
                result.error.as_ref().map(|e| e.code.clone()),
                result.error.as_ref().map(|e| e.message.clone()),
                result.started_at.to_rfc3339(),
                result.finished_at.to_rfc3339(),
            ],
        )?;
        debug!("Stored stage result");
        Ok(())
    }

    fn load_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, source, created_at, cancelled_at FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, source, created_at, cancelled_at)) => Ok(Some(Self::job_from_row(
                &conn,
                id,
                source,
                created_at,
                cancelled_at,
            )?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    fn load_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.lock()?;
        let rows: Vec<(String, String, String, Option<String>)> = {
            let mut stmt = conn.prepare(
                "SELECT id, source, created_at, cancelled_at FROM jobs ORDER BY created_at, rowid",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            let rows = mapped.collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let jobs = rows
            .into_iter()
            .map(|(id, source, created_at, cancelled_at)| {
                Self::job_from_row(&conn, id, source, created_at, cancelled_at)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Loaded {} jobs", jobs.len());
        Ok(jobs)
    }
}

fn parse_result(row: ResultRow) -> Result<StageResult> {
    let stage: Stage = row.stage.parse().map_err(TubeflowError::Store)?;
    let status: StageStatus = row.status.parse().map_err(TubeflowError::Store)?;
    let output: Option<StageOutput> = row
        .output_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    let error = row
        .error_code
        .map(|code| ExecutorError::new(code, row.error_message.unwrap_or_default()));

    Ok(StageResult {
        id: parse_uuid(&row.id)?,
        job_id: parse_uuid(&row.job_id)?,
        stage,
        attempt: row.attempt,
        status,
        output,
        error,
        started_at: parse_time(&row.started_at)?,
        finished_at: parse_time(&row.finished_at)?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| TubeflowError::Store(format!("Invalid id '{}': {}", s, e)))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TubeflowError::Store(format!("Invalid timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(job: &Job, stage: Stage, attempt: u32, status: StageStatus) -> StageResult {
        let now = Utc::now();
        StageResult {
            id: Uuid::new_v4(),
            job_id: job.id,
            stage,
            attempt,
            status,
            output: (status == StageStatus::Success)
                .then(|| StageOutput::file("/tmp/a.mp3").with_meta("title", "A")),
            error: (status != StageStatus::Success)
                .then(|| ExecutorError::new("download", "HTTP 403")),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_job_round_trip_keeps_result_order() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = Job::new("https://youtu.be/dQw4w9WgXcQ");
        store.save_job(&job, JobStatus::Pending).unwrap();

        let first = result(&job, Stage::Download, 1, StageStatus::Retrying);
        let second = result(&job, Stage::Download, 2, StageStatus::Success);
        store.append_result(&first).unwrap();
        store.append_result(&second).unwrap();

        let loaded = store.load_job(job.id).unwrap().unwrap();
        assert_eq!(loaded.source, job.source);
        assert_eq!(loaded.results, vec![first, second]);
        assert!(loaded.cancelled_at.is_none());
        assert_eq!(loaded.in_flight().count(), 0);
    }

    #[test]
    fn test_missing_job() {
        let store = SqliteJobStore::in_memory().unwrap();
        assert!(store.load_job(Uuid::new_v4()).unwrap().is_none());
        let err = store
            .update_status(Uuid::new_v4(), JobStatus::Running)
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn test_cancel_persists() {
        let store = SqliteJobStore::in_memory().unwrap();
        let mut job = Job::new("dQw4w9WgXcQ");
        store.save_job(&job, JobStatus::Running).unwrap();

        job.cancelled_at = Some(Utc::now());
        store.save_job(&job, JobStatus::Cancelled).unwrap();

        let loaded = store.load_job(job.id).unwrap().unwrap();
        assert!(loaded.is_cancelled());
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("jobs.db");

        let a = Job::new("aaaaaaaaaaa");
        let b = Job::new("bbbbbbbbbbb");
        {
            let store = SqliteJobStore::new(&path).unwrap();
            store.save_job(&a, JobStatus::Pending).unwrap();
            store.save_job(&b, JobStatus::Pending).unwrap();
            store
                .append_result(&result(&b, Stage::Download, 1, StageStatus::Failed))
                .unwrap();
        }

        let store = SqliteJobStore::new(&path).unwrap();
        let jobs = store.load_jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        let loaded_b = jobs.iter().find(|j| j.id == b.id).unwrap();
        assert_eq!(loaded_b.results.len(), 1);
        assert_eq!(
            loaded_b.results[0].error.as_ref().map(|e| e.code.as_str()),
            Some("download")
        );
    }
}
