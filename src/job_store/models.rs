use crate::check_client::{AdEntry, AdType, CheckError, CheckRequest, CheckResult, Device};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = i64;

/// Longest accepted interval, one hundred years. Keeps every computed
/// `next_run_at` inside the four-digit years the stored timestamps support.
pub const MAX_INTERVAL_MINUTES: u32 = 525_600 * 100;

/// Run-state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its next run.
    Idle,
    /// Claimed by a worker.
    Running,
    /// Never due and never claimable until re-enabled.
    Disabled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(JobState::Idle),
            "running" => Some(JobState::Running),
            "disabled" => Some(JobState::Disabled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// Rejected by the check provider, not retried.
    FailedPermanent,
    /// Transient failures until the attempt bound was reached.
    FailedTerminal,
}

/// Snapshot written by the last completed execution of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastResult {
    pub outcome: RunOutcome,
    pub has_ads: bool,
    pub ads_count: u32,
    pub ads: Vec<AdEntry>,
    #[serde(default)]
    pub ad_types: Vec<AdType>,
    pub checked_at: DateTime<Utc>,
    /// Number of check attempts the execution used.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LastResult {
    pub fn success(result: &CheckResult, attempts: u32, checked_at: DateTime<Utc>) -> Self {
        Self {
            outcome: RunOutcome::Succeeded,
            has_ads: result.has_ads,
            ads_count: result.ads_count,
            ads: result.ads.clone(),
            ad_types: result.ad_types.clone(),
            checked_at,
            attempts,
            error: None,
        }
    }

    pub fn failure(error: &CheckError, attempts: u32, checked_at: DateTime<Utc>) -> Self {
        let outcome = if error.is_retryable() {
            RunOutcome::FailedTerminal
        } else {
            RunOutcome::FailedPermanent
        };
        Self {
            outcome,
            has_ads: false,
            ads_count: 0,
            ads: Vec::new(),
            ad_types: Vec::new(),
            checked_at,
            attempts,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

/// A recurring ad presence check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub query: String,
    pub location: Option<String>,
    pub device: Device,
    pub interval_minutes: u32,
    pub next_run_at: DateTime<Utc>,
    pub state: JobState,
    pub last_result: Option<LastResult>,
    pub created_at: DateTime<Utc>,
    /// Chat that receives this job's ads alerts instead of the configured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_chat_id: Option<String>,
}

impl Job {
    pub fn interval(&self) -> Duration {
        Duration::minutes(self.interval_minutes as i64)
    }

    pub fn check_request(&self) -> CheckRequest {
        CheckRequest::new(self.query.clone(), self.location.clone(), self.device)
    }
}

/// Parameters of a job to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub query: String,
    pub location: Option<String>,
    pub device: Device,
    pub interval_minutes: u32,
    pub notify_chat_id: Option<String>,
}

impl NewJob {
    pub fn new(query: &str, location: Option<&str>, device: Device, interval_minutes: u32) -> Self {
        Self {
            query: query.to_string(),
            location: location.map(str::to_string),
            device,
            interval_minutes,
            notify_chat_id: None,
        }
    }

    pub fn with_notify_chat_id(mut self, chat_id: Option<&str>) -> Self {
        self.notify_chat_id = chat_id.map(str::to_string);
        self
    }

    /// Trims text fields and collapses blank optional ones to `None`.
    ///
    /// Returns an error message when the parameters can't make a job.
    pub(crate) fn normalized(self) -> Result<Self, String> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err("query must not be empty".to_string());
        }
        if self.interval_minutes < 1 {
            return Err("interval_minutes must be at least 1".to_string());
        }
        if self.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(format!(
                "interval_minutes must be at most {}",
                MAX_INTERVAL_MINUTES
            ));
        }
        Ok(Self {
            query: query.to_string(),
            location: non_blank(self.location),
            device: self.device,
            interval_minutes: self.interval_minutes,
            notify_chat_id: non_blank(self.notify_chat_id),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
