//! Durable job definitions and their run-state.
//!
//! [`JobStore`] is the only way to read or change a job. Every operation is
//! atomic, and [`JobStore::try_claim`] / [`JobStore::release`] together
//! guarantee that a job is never executed by two workers at once.

mod models;
mod schema;
mod sqlite_job_store;

pub use models::*;
pub use schema::JOBS_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use crate::check_client::Device;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid job: {0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id} is {state}")]
    InvalidState { id: JobId, state: JobState },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What `delete` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The job is gone.
    Removed,
    /// The job is running; it is hidden now and removed once the run is released.
    Deferred,
}

/// What happened to a claimed job when it was handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Back to idle with its new schedule.
    Released,
    /// It had been deleted while running and is now removed.
    Removed,
}

pub trait JobStore: Send + Sync {
    /// Creates an idle job that is due immediately.
    fn insert(&self, new_job: NewJob) -> StoreResult<Job>;

    /// Shorthand for [`JobStore::insert`] without an alert target.
    fn create(
        &self,
        query: &str,
        location: Option<&str>,
        device: Device,
        interval_minutes: u32,
    ) -> StoreResult<Job> {
        self.insert(NewJob::new(query, location, device, interval_minutes))
    }
    fn get(&self, id: JobId) -> StoreResult<Job>;
    /// All jobs in creation order.
    fn list(&self) -> StoreResult<Vec<Job>>;
    fn delete(&self, id: JobId) -> StoreResult<DeleteOutcome>;

    /// Idle jobs with `next_run_at <= now`, earliest first.
    fn due_jobs(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>>;
    /// Atomically moves an idle job to running. Returns false if it is
    /// running, disabled or deleted.
    fn try_claim(&self, id: JobId) -> StoreResult<bool>;
    /// Stores the result of a run and makes the job idle again, or removes
    /// it if it was deleted meanwhile.
    fn release(
        &self,
        id: JobId,
        result: LastResult,
        next_run_at: DateTime<Utc>,
    ) -> StoreResult<ReleaseOutcome>;
    /// Hands back a claim that never ran, leaving result and schedule alone.
    fn unclaim(&self, id: JobId) -> StoreResult<ReleaseOutcome>;
    fn set_enabled(&self, id: JobId, enabled: bool) -> StoreResult<Job>;
    /// Resets jobs left running by a previous process and drops the ones
    /// deleted while they ran. Returns the number of jobs reset.
    fn recover_interrupted(&self) -> StoreResult<usize>;
}
