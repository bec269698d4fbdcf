use super::schema::JOBS_VERSIONED_SCHEMAS;
use super::{
    DeleteOutcome, Job, JobId, JobState, JobStore, LastResult, NewJob, ReleaseOutcome,
    StoreError, StoreResult,
};
use crate::check_client::Device;
use crate::clock::{Clock, SystemClock};
use crate::sqlite_persistence::{
    conversion_error, format_timestamp, open_versioned, parse_timestamp,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const JOB_COLUMNS: &str = "id, query, location, device, interval_minutes, next_run_at, state, \
     last_result, created_at, notify_chat_id";

/// How long a writer waits on a database locked by another process (the CLI
/// may edit jobs while the scheduler runs).
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_clock(db_path, Arc::new(SystemClock))
    }

    pub fn with_clock<P: AsRef<Path>>(db_path: P, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), JOBS_VERSIONED_SCHEMAS, "jobs")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let device_str: String = row.get("device")?;
        let state_str: String = row.get("state")?;
        let interval_minutes: i64 = row.get("interval_minutes")?;
        let next_run_at_str: String = row.get("next_run_at")?;
        let created_at_str: String = row.get("created_at")?;
        let last_result_str: Option<String> = row.get("last_result")?;

        Ok(Job {
            id: row.get("id")?,
            query: row.get("query")?,
            location: row.get("location")?,
            device: Device::parse(&device_str)
                .ok_or_else(|| conversion_error(row, "device", "unknown device"))?,
            interval_minutes: u32::try_from(interval_minutes)
                .map_err(|e| conversion_error(row, "interval_minutes", e))?,
            next_run_at: parse_timestamp(&next_run_at_str)
                .map_err(|e| conversion_error(row, "next_run_at", e))?,
            state: JobState::parse(&state_str)
                .ok_or_else(|| conversion_error(row, "state", "unknown state"))?,
            last_result: last_result_str
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| conversion_error(row, "last_result", e))?,
            created_at: parse_timestamp(&created_at_str)
                .map_err(|e| conversion_error(row, "created_at", e))?,
            notify_chat_id: row.get("notify_chat_id")?,
        })
    }

    /// Loads a live (not tombstoned) job.
    fn fetch(conn: &Connection, id: JobId) -> StoreResult<Job> {
        conn.query_row(
            &format!(
                "SELECT {} FROM jobs WHERE id = ?1 AND pending_delete = 0",
                JOB_COLUMNS
            ),
            params![id],
            Self::row_to_job,
        )
        .optional()?
        .ok_or(StoreError::NotFound(id))
    }

    /// Current state and tombstone flag of a row, tombstoned rows included.
    fn fetch_state(conn: &Connection, id: JobId) -> StoreResult<Option<(JobState, bool)>> {
        let row = conn
            .query_row(
                "SELECT state, pending_delete FROM jobs WHERE id = ?1",
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .optional()?;
        row.map(|(state, pending_delete)| {
            JobState::parse(&state)
                .map(|state| (state, pending_delete))
                .ok_or_else(|| {
                    StoreError::Other(anyhow::anyhow!("job {} has unknown state '{}'", id, state))
                })
        })
        .transpose()
    }

    /// Hands a running job back, removing it if it was deleted meanwhile.
    fn finish_run(
        &self,
        id: JobId,
        update: impl FnOnce(&Connection) -> rusqlite::Result<usize>,
    ) -> StoreResult<ReleaseOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match Self::fetch_state(&tx, id)? {
            None => return Err(StoreError::NotFound(id)),
            Some((state, _)) if state != JobState::Running => {
                return Err(StoreError::InvalidState { id, state })
            }
            Some((_, true)) => {
                tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
                info!("Removed job {} after its in-flight run (deleted while running)", id);
                ReleaseOutcome::Removed
            }
            Some((_, false)) => {
                update(&tx)?;
                ReleaseOutcome::Released
            }
        };

        tx.commit()?;
        Ok(outcome)
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, new_job: NewJob) -> StoreResult<Job> {
        let new_job = new_job.normalized().map_err(StoreError::Validation)?;
        let now = format_timestamp(&self.clock.now());

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (query, location, device, interval_minutes, next_run_at, state, created_at, notify_chat_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new_job.query,
                new_job.location,
                new_job.device.as_str(),
                new_job.interval_minutes,
                now,
                JobState::Idle.as_str(),
                now,
                new_job.notify_chat_id
            ],
        )?;
        let job = Self::fetch(&conn, conn.last_insert_rowid())?;

        info!(
            "Created job {} for '{}' every {} min",
            job.id, job.query, job.interval_minutes
        );
        Ok(job)
    }

    fn get(&self, id: JobId) -> StoreResult<Job> {
        let conn = self.conn.lock().unwrap();
        Self::fetch(&conn, id)
    }

    fn list(&self) -> StoreResult<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE pending_delete = 0 ORDER BY id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map([], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn delete(&self, id: JobId) -> StoreResult<DeleteOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = match Self::fetch_state(&tx, id)? {
            None | Some((_, true)) => return Err(StoreError::NotFound(id)),
            Some((JobState::Running, false)) => {
                tx.execute(
                    "UPDATE jobs SET pending_delete = 1 WHERE id = ?1",
                    params![id],
                )?;
                info!("Job {} is running, deletion deferred until it completes", id);
                DeleteOutcome::Deferred
            }
            Some(_) => {
                tx.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
                info!("Deleted job {}", id);
                DeleteOutcome::Removed
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn due_jobs(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs
             WHERE state = ?1 AND pending_delete = 0 AND next_run_at <= ?2
             ORDER BY next_run_at, id",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(
                params![JobState::Idle.as_str(), format_timestamp(&now)],
                Self::row_to_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn try_claim(&self, id: JobId) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET state = ?1 WHERE id = ?2 AND state = ?3 AND pending_delete = 0",
            params![JobState::Running.as_str(), id, JobState::Idle.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn release(
        &self,
        id: JobId,
        result: LastResult,
        next_run_at: DateTime<Utc>,
    ) -> StoreResult<ReleaseOutcome> {
        let result_json = serde_json::to_string(&result)?;
        let next_run_at = format_timestamp(&next_run_at);
        self.finish_run(id, |conn| {
            conn.execute(
                "UPDATE jobs SET state = ?1, last_result = ?2, next_run_at = ?3 WHERE id = ?4",
                params![JobState::Idle.as_str(), result_json, next_run_at, id],
            )
        })
    }

    fn unclaim(&self, id: JobId) -> StoreResult<ReleaseOutcome> {
        let outcome = self.finish_run(id, |conn| {
            conn.execute(
                "UPDATE jobs SET state = ?1 WHERE id = ?2",
                params![JobState::Idle.as_str(), id],
            )
        })?;
        debug!("Unclaimed job {}", id);
        Ok(outcome)
    }

    fn set_enabled(&self, id: JobId, enabled: bool) -> StoreResult<Job> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let job = Self::fetch(&tx, id)?;
        if job.state == JobState::Running {
            return Err(StoreError::InvalidState {
                id,
                state: job.state,
            });
        }
        let target = if enabled {
            JobState::Idle
        } else {
            JobState::Disabled
        };
        if job.state != target {
            tx.execute(
                "UPDATE jobs SET state = ?1 WHERE id = ?2",
                params![target.as_str(), id],
            )?;
            info!("Job {} is now {}", id, target);
        }
        let job = Self::fetch(&tx, id)?;

        tx.commit()?;
        Ok(job)
    }

    fn recover_interrupted(&self) -> StoreResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let removed = tx.execute("DELETE FROM jobs WHERE pending_delete = 1", [])?;
        let reset = tx.execute(
            "UPDATE jobs SET state = ?1 WHERE state = ?2",
            params![JobState::Idle.as_str(), JobState::Running.as_str()],
        )?;
        tx.commit()?;

        if removed > 0 {
            info!("Removed {} jobs deleted during an interrupted run", removed);
        }
        Ok(reset)
    }
}
