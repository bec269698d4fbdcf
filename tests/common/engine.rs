// Not every test binary uses every helper
#![allow(dead_code)]

use super::fake_client::{RecordingNotifier, ScriptedClient};
use adwatch_server::check_log::SqliteCheckLog;
use adwatch_server::clock::{Clock, ManualClock};
use adwatch_server::executor::{CheckExecutor, RetryPolicy, WorkerContext, WorkerPool};
use adwatch_server::job_store::{Job, JobId, JobState, JobStore, SqliteJobStore};
use adwatch_server::notifications::AdNotifier;
use adwatch_server::scheduler::{create_scheduler, JobScheduler, SchedulerHandle, TickReport};
use adwatch_server::service::AdWatch;
use chrono::{DateTime, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

/// Fast retries so terminal failures don't slow the suite down.
fn test_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        backoff_multiplier: 2.0,
    }
}

pub struct TestEngine {
    pub store: Arc<SqliteJobStore>,
    pub clock: ManualClock,
    pub client: Arc<ScriptedClient>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: AdWatch,
    pub handle: SchedulerHandle,
    pub shutdown_token: CancellationToken,
    scheduler: Option<JobScheduler>,
    pool: WorkerPool,
    temp_dir: TempDir,
}

impl TestEngine {
    /// Must be called from within a tokio runtime.
    pub fn spawn() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let clock = ManualClock::new(start_time());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let store = Arc::new(
            SqliteJobStore::with_clock(temp_dir.path().join("jobs.db"), shared_clock.clone())
                .unwrap(),
        );
        let check_log =
            Arc::new(SqliteCheckLog::new(temp_dir.path().join("check_log.db")).unwrap());
        let client = Arc::new(ScriptedClient::new(clock.clone()));
        let notifier = Arc::new(RecordingNotifier::default());

        let executor = Arc::new(CheckExecutor::new(
            client.clone(),
            test_retry_policy(),
            Duration::from_secs(5),
        ));
        let pool = WorkerPool::start(
            4,
            16,
            WorkerContext {
                store: store.clone(),
                executor,
                clock: shared_clock.clone(),
                notifier: Some(notifier.clone() as Arc<dyn AdNotifier>),
            },
        );

        let service = AdWatch::new(store.clone(), pool.queue(), shared_clock.clone())
            .with_check_log(check_log);

        let shutdown_token = CancellationToken::new();
        let (scheduler, handle) = create_scheduler(
            store.clone(),
            shared_clock,
            pool.queue(),
            Duration::from_secs(3600),
            shutdown_token.clone(),
        );

        Self {
            store,
            clock,
            client,
            notifier,
            service,
            handle,
            scheduler: Some(scheduler),
            shutdown_token,
            pool,
            temp_dir,
        }
    }

    /// Runs one scheduler pass inline.
    pub fn tick(&self) -> TickReport {
        self.scheduler
            .as_ref()
            .expect("scheduler already started")
            .tick()
    }

    /// Moves the scheduler onto its own task, as the `run` command does.
    pub fn start_scheduler(&mut self) -> JoinHandle<()> {
        let scheduler = self.scheduler.take().expect("scheduler already started");
        tokio::spawn(scheduler.run())
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.temp_dir.path().join("jobs.db")
    }

    /// Polls until the job is no longer running.
    pub async fn wait_until_finished(&self, id: JobId) -> Job {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let job = self.store.get(id).unwrap();
                if job.state != JobState::Running {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job did not finish in time")
    }

    /// Polls until the client has been called `count` times for `query`.
    pub async fn wait_for_calls(&self, query: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.client.calls(query) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("check was not started in time")
    }

    /// Polls until `count` alerts were sent. Alerts follow the release.
    pub async fn wait_for_alerts(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while self.notifier.sent().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("alert was not sent in time")
    }

    /// Stops the scheduler side and drains the workers. Returns the data
    /// directory so tests can inspect the database afterwards.
    pub async fn shutdown(self) -> TempDir {
        self.shutdown_token.cancel();
        drop(self.service);
        drop(self.scheduler);
        self.pool.shutdown().await;
        self.temp_dir
    }
}
