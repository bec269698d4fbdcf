//! Ad presence check scheduling engine.
//!
//! Recurring jobs live in a SQLite [`job_store`]; the [`scheduler`] polls for
//! due jobs and hands them to the [`executor`] worker pool, which runs the
//! [`check_client`] with retries and writes results back. [`service::AdWatch`]
//! is the public surface used by the binary.

pub mod check_client;
pub mod check_log;
pub mod clock;
pub mod config;
pub mod executor;
pub mod job_store;
pub mod notifications;
pub mod scheduler;
pub mod service;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use check_client::{AdCheckClient, CheckError, CheckRequest, CheckResult, Device};
pub use job_store::{Job, JobId, JobState, JobStore, SqliteJobStore, StoreError};
pub use service::{AdWatch, ServiceError};
