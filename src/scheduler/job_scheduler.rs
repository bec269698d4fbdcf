use super::handle::{SchedulerCommand, SchedulerHandle};
use crate::clock::Clock;
use crate::executor::{DispatchError, WorkQueue};
use crate::job_store::{JobState, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Jobs that were due.
    pub due: usize,
    /// Claimed and handed to the worker pool.
    pub dispatched: usize,
    /// Could not be claimed (already running or changed since the query).
    pub skipped: usize,
    /// Left for the next tick because the work queue was full or closed.
    pub requeued: usize,
}

/// Polls the store for due jobs and feeds them to the worker pool.
pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    queue: WorkQueue,
    tick_interval: Duration,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        queue: WorkQueue,
        tick_interval: Duration,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            clock,
            queue,
            tick_interval,
            command_receiver,
            shutdown_token,
        }
    }

    /// Main scheduler loop. Returns when the shutdown token is cancelled,
    /// dropping this scheduler's side of the work queue.
    pub async fn run(mut self) {
        debug!("Job scheduler loop started");

        // On startup: runs lost with the previous process go back to idle
        match self.store.recover_interrupted() {
            Ok(count) if count > 0 => {
                info!("Recovered {} jobs interrupted by a previous run", count);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to recover interrupted jobs: {}", e);
            }
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                Some(cmd) = self.command_receiver.recv() => {
                    self.handle_command(cmd);
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::RunDueNow { response } => {
                info!("Running due jobs on request");
                let report = self.tick();
                let _ = response.send(report);
            }
        }
    }

    /// Claims every due job and queues it. Never waits on a check.
    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let due_jobs = match self.store.due_jobs(now) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Failed to query due jobs: {}", e);
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            due: due_jobs.len(),
            ..Default::default()
        };
        debug!("{} jobs due at {}", report.due, now);

        let mut queue_unavailable = false;
        for mut job in due_jobs {
            if queue_unavailable {
                report.requeued += 1;
                continue;
            }

            match self.store.try_claim(job.id) {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Job {} is already running or no longer idle, skipping", job.id);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("Failed to claim job {}: {}", job.id, e);
                    report.skipped += 1;
                    continue;
                }
            }

            let id = job.id;
            job.state = JobState::Running;
            match self.queue.try_dispatch(job) {
                Ok(()) => {
                    info!("Dispatched job {}", id);
                    report.dispatched += 1;
                }
                Err(e) => {
                    if e == DispatchError::Closed {
                        error!("Cannot dispatch job {}: {}", id, e);
                    } else {
                        warn!("Cannot dispatch job {}: {}, retrying next tick", id, e);
                    }
                    if let Err(e) = self.store.unclaim(id) {
                        error!("Failed to unclaim job {}: {}", id, e);
                    }
                    queue_unavailable = true;
                    report.requeued += 1;
                }
            }
        }

        report
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    queue: WorkQueue,
    tick_interval: Duration,
    shutdown_token: CancellationToken,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(16);

    let scheduler = JobScheduler::new(
        store,
        clock,
        queue,
        tick_interval,
        command_rx,
        shutdown_token,
    );

    (scheduler, SchedulerHandle::new(command_tx))
}
