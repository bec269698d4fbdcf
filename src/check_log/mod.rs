//! History of on-demand checks, kept apart from the job database.

mod schema;
mod sqlite_check_log;

pub use schema::CHECK_LOG_VERSIONED_SCHEMAS;
pub use sqlite_check_log::SqliteCheckLog;

use crate::check_client::{AdType, CheckRequest, CheckResult, Device};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// One recorded on-demand check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckLogEntry {
    pub id: i64,
    pub query: String,
    pub location: Option<String>,
    pub device: Device,
    pub has_ads: bool,
    pub ads_count: u32,
    pub ad_types: Vec<AdType>,
    pub gl: Option<String>,
    pub hl: Option<String>,
    pub latency_ms: i64,
    pub checked_at: DateTime<Utc>,
}

pub trait CheckLog: Send + Sync {
    /// Records a successful check. Returns the entry id.
    fn record(
        &self,
        request: &CheckRequest,
        result: &CheckResult,
        latency: Duration,
        checked_at: DateTime<Utc>,
    ) -> Result<i64>;

    /// Most recent entries first.
    fn recent(&self, limit: usize) -> Result<Vec<CheckLogEntry>>;
}
