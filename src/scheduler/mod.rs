//! The polling control loop that finds due jobs, claims them and hands them
//! to the worker pool.

mod handle;
mod job_scheduler;

pub use handle::{SchedulerCommand, SchedulerError, SchedulerHandle};
pub use job_scheduler::{create_scheduler, JobScheduler, TickReport};
