//! Check execution: bounded retries around a single check, and the worker
//! pool that runs scheduled jobs and on-demand checks.

mod check_executor;
mod retry_policy;
mod worker_pool;

pub use check_executor::{CheckExecutor, CheckFailure, CheckSuccess};
pub use retry_policy::RetryPolicy;
pub use worker_pool::{
    CheckResponse, DispatchError, PoolClosed, WorkItem, WorkQueue, WorkerContext, WorkerPool,
};
