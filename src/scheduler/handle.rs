use super::job_scheduler::TickReport;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    Unavailable,
}

/// Command sent to the scheduler.
pub enum SchedulerCommand {
    /// Run one tick now instead of waiting for the timer.
    RunDueNow {
        response: oneshot::Sender<TickReport>,
    },
}

/// Handle to interact with a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn new(command_tx: mpsc::Sender<SchedulerCommand>) -> Self {
        Self { command_tx }
    }

    /// Dispatches every due job immediately and reports what happened.
    pub async fn run_due_now(&self) -> Result<TickReport, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(SchedulerCommand::RunDueNow {
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::Unavailable)?;

        response_rx.await.map_err(|_| SchedulerError::Unavailable)
    }
}
