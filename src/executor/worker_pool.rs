use super::check_executor::{CheckExecutor, CheckFailure, CheckSuccess};
use crate::check_client::CheckRequest;
use crate::clock::Clock;
use crate::job_store::{Job, JobStore, LastResult, ReleaseOutcome, StoreError};
use crate::notifications::AdNotifier;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub type CheckResponse = Result<CheckSuccess, CheckFailure>;

/// Tries at storing a finished run before the job is handed back without it.
const RELEASE_ATTEMPTS: u32 = 3;
const RELEASE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// One unit of work for the pool.
pub enum WorkItem {
    /// A job already claimed in the store. The worker must release it.
    Scheduled(Job),
    /// A one-off check whose outcome goes back to the caller.
    OnDemand {
        request: CheckRequest,
        respond_to: oneshot::Sender<CheckResponse>,
    },
}

#[derive(Debug, Error)]
#[error("worker pool is not running")]
pub struct PoolClosed;

/// Why a claimed job could not be queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("work queue is full")]
    Full,
    #[error("work queue is closed")]
    Closed,
}

/// Sending side of the bounded work queue.
#[derive(Clone)]
pub struct WorkQueue {
    sender: mpsc::Sender<WorkItem>,
}

impl WorkQueue {
    pub fn new(sender: mpsc::Sender<WorkItem>) -> Self {
        Self { sender }
    }

    /// Enqueues a claimed job without waiting.
    pub fn try_dispatch(&self, job: Job) -> Result<(), DispatchError> {
        self.sender
            .try_send(WorkItem::Scheduled(job))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::Full,
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })
    }

    /// Runs a one-off check on the pool, waiting for queue space if needed.
    pub async fn check(&self, request: CheckRequest) -> Result<CheckResponse, PoolClosed> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(WorkItem::OnDemand {
                request,
                respond_to,
            })
            .await
            .map_err(|_| PoolClosed)?;
        response.await.map_err(|_| PoolClosed)
    }
}

/// What a worker needs to run and record checks.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn JobStore>,
    pub executor: Arc<CheckExecutor>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Option<Arc<dyn AdNotifier>>,
}

/// Fixed set of workers draining one bounded queue.
pub struct WorkerPool {
    queue: WorkQueue,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(worker_count: usize, queue_capacity: usize, context: WorkerContext) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let context = context.clone();
                tokio::spawn(
                    run_worker(receiver, context).instrument(info_span!("worker", worker_id)),
                )
            })
            .collect();

        info!(
            "Started {} check workers (queue capacity {})",
            worker_count.max(1),
            queue_capacity.max(1)
        );

        Self {
            queue: WorkQueue::new(sender),
            workers,
        }
    }

    pub fn queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    /// Closes the pool's own sender and waits for the workers to drain the
    /// queue. Workers exit once every other `WorkQueue` clone is dropped too.
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("Worker task failed: {}", e);
            }
        }
        info!("All check workers stopped");
    }
}

async fn run_worker(receiver: Arc<Mutex<mpsc::Receiver<WorkItem>>>, context: WorkerContext) {
    debug!("Worker started");
    loop {
        let item = receiver.lock().await.recv().await;
        match item {
            Some(WorkItem::Scheduled(job)) => run_scheduled(&context, job).await,
            Some(WorkItem::OnDemand {
                request,
                respond_to,
            }) => {
                let response = context.executor.execute(&request).await;
                if respond_to.send(response).is_err() {
                    debug!("Caller of on-demand check for '{}' went away", request.query);
                }
            }
            None => break,
        }
    }
    debug!("Worker stopped: queue closed");
}

async fn run_scheduled(context: &WorkerContext, job: Job) {
    let outcome = context.executor.execute(&job.check_request()).await;

    // Cadence is measured from completion, not from the previous due time
    let completed_at = context.clock.now();
    let next_run_at = completed_at + job.interval();

    let last_result = match &outcome {
        Ok(success) => LastResult::success(&success.result, success.attempts, completed_at),
        Err(failure) => {
            error!(
                "Job {} ('{}') failed after {} attempt(s): {}",
                job.id, job.query, failure.attempts, failure.error
            );
            LastResult::failure(&failure.error, failure.attempts, completed_at)
        }
    };

    match release(context, &job, last_result, next_run_at).await {
        Some(ReleaseOutcome::Released) => {
            if let Ok(success) = outcome {
                info!(
                    "Job {} ('{}') completed with {} ads, next run at {}",
                    job.id, job.query, success.result.ads_count, next_run_at
                );
                if success.result.has_ads {
                    notify(context, &job, &success).await;
                }
            }
        }
        Some(ReleaseOutcome::Removed) => {
            debug!("Job {} was deleted while running, result discarded", job.id);
        }
        None => {}
    }
}

/// Stores the run's result, retrying store errors a few times. When that
/// keeps failing the claim is dropped so the job doesn't stay running.
/// Returns `None` when the result could not be stored.
async fn release(
    context: &WorkerContext,
    job: &Job,
    last_result: LastResult,
    next_run_at: DateTime<Utc>,
) -> Option<ReleaseOutcome> {
    let mut attempt = 1;
    loop {
        match context
            .store
            .release(job.id, last_result.clone(), next_run_at)
        {
            Ok(outcome) => return Some(outcome),
            // The claim is gone; neither a retry nor an unclaim can help
            Err(e @ (StoreError::NotFound(_) | StoreError::InvalidState { .. })) => {
                error!("Failed to release job {}: {}", job.id, e);
                return None;
            }
            Err(e) if attempt < RELEASE_ATTEMPTS => {
                warn!(
                    "Failed to release job {} (attempt {}/{}): {}",
                    job.id, attempt, RELEASE_ATTEMPTS, e
                );
                tokio::time::sleep(RELEASE_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => {
                error!(
                    "Failed to release job {} after {} attempts, dropping its result: {}",
                    job.id, attempt, e
                );
                break;
            }
        }
    }

    match context.store.unclaim(job.id) {
        Ok(_) => warn!("Job {} handed back without its result", job.id),
        Err(e) => error!(
            "Failed to unclaim job {}, it stays running until restart: {}",
            job.id, e
        ),
    }
    None
}

async fn notify(context: &WorkerContext, job: &Job, success: &CheckSuccess) {
    let Some(notifier) = &context.notifier else {
        return;
    };
    if let Err(e) = notifier.notify_ads_found(job, &success.result).await {
        warn!("Failed to send ads alert for job {}: {:#}", job.id, e);
    }
}
