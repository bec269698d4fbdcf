//! The public surface: on-demand checks and job management.
//!
//! Transports (the CLI binary today) talk to [`AdWatch`] only. It validates
//! input, routes on-demand checks through the worker pool and maps store
//! errors onto [`ServiceError`].

use crate::check_client::{CheckRequest, CheckResult, Device};
use crate::check_log::{CheckLog, CheckLogEntry};
use crate::clock::Clock;
use crate::executor::{CheckFailure, PoolClosed, WorkQueue};
use crate::job_store::{DeleteOutcome, Job, JobId, JobStore, NewJob, StoreError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error(transparent)]
    Check(#[from] CheckFailure),

    #[error("check workers are not running")]
    Unavailable,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => ServiceError::Validation(message),
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

impl From<PoolClosed> for ServiceError {
    fn from(_: PoolClosed) -> Self {
        ServiceError::Unavailable
    }
}

pub struct AdWatch {
    store: Arc<dyn JobStore>,
    queue: WorkQueue,
    clock: Arc<dyn Clock>,
    check_log: Option<Arc<dyn CheckLog>>,
}

impl AdWatch {
    pub fn new(store: Arc<dyn JobStore>, queue: WorkQueue, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            queue,
            clock,
            check_log: None,
        }
    }

    pub fn with_check_log(mut self, check_log: Arc<dyn CheckLog>) -> Self {
        self.check_log = Some(check_log);
        self
    }

    /// Runs a one-off check through the worker pool. Never touches the job
    /// store; failures come back once retries are exhausted.
    pub async fn check_now(
        &self,
        query: &str,
        location: Option<&str>,
        device: Device,
    ) -> Result<CheckResult, ServiceError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::Validation("query must not be empty".to_string()));
        }
        let location = location
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);
        let request = CheckRequest::new(query, location, device);

        let started = Instant::now();
        let success = match self.queue.check(request.clone()).await? {
            Ok(success) => success,
            Err(failure) => {
                warn!("On-demand check for '{}' failed: {}", request.query, failure);
                return Err(failure.into());
            }
        };
        let latency = started.elapsed();

        info!(
            "On-demand check for '{}' found {} ads in {:?} ({} attempt(s))",
            request.query, success.result.ads_count, latency, success.attempts
        );

        if let Some(check_log) = &self.check_log {
            if let Err(e) = check_log.record(&request, &success.result, latency, self.clock.now())
            {
                warn!("Failed to record check for '{}': {:#}", request.query, e);
            }
        }

        Ok(success.result)
    }

    pub fn create_job(
        &self,
        query: &str,
        location: Option<&str>,
        device: Device,
        interval_minutes: u32,
    ) -> Result<Job, ServiceError> {
        self.add_job(NewJob::new(query, location, device, interval_minutes))
    }

    /// Creates a job with every optional setting, such as its own alert chat.
    pub fn add_job(&self, new_job: NewJob) -> Result<Job, ServiceError> {
        Ok(self.store.insert(new_job)?)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>, ServiceError> {
        Ok(self.store.list()?)
    }

    pub fn get_job(&self, id: JobId) -> Result<Job, ServiceError> {
        Ok(self.store.get(id)?)
    }

    /// Removes a job, or defers the removal until its current run finishes.
    pub fn delete_job(&self, id: JobId) -> Result<DeleteOutcome, ServiceError> {
        Ok(self.store.delete(id)?)
    }

    pub fn set_job_enabled(&self, id: JobId, enabled: bool) -> Result<Job, ServiceError> {
        Ok(self.store.set_enabled(id, enabled)?)
    }

    /// Recent on-demand checks, newest first. Empty without a check log.
    pub fn recent_checks(&self, limit: usize) -> Result<Vec<CheckLogEntry>, ServiceError> {
        match &self.check_log {
            Some(check_log) => check_log
                .recent(limit)
                .map_err(|e| ServiceError::Store(StoreError::Other(e))),
            None => Ok(Vec::new()),
        }
    }
}
