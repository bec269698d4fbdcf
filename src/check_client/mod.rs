//! The ad presence check consumed by the scheduler and by on-demand checks.
//!
//! [`AdCheckClient`] is the whole contract: given a query, an optional
//! location and a device it either returns a [`CheckResult`] or a typed
//! [`CheckError`] saying whether trying again could help.

mod serpapi;

pub use serpapi::{SerpApiClient, SerpApiSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device profile the search is performed as.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Desktop,
    Mobile,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Desktop => "desktop",
            Device::Mobile => "mobile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "desktop" => Some(Device::Desktop),
            "mobile" => Some(Device::Mobile),
            _ => None,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub query: String,
    pub location: Option<String>,
    pub device: Device,
}

impl CheckRequest {
    pub fn new(query: impl Into<String>, location: Option<String>, device: Device) -> Self {
        Self {
            query: query.into(),
            location,
            device,
        }
    }
}

/// One sponsored result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdEntry {
    pub title: String,
    pub url: String,
}

/// Kind of sponsored placement seen on the results page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdType {
    /// Text ads above or below the organic results.
    Search,
    /// Product listing ads.
    Shopping,
}

impl AdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdType::Search => "search",
            AdType::Shopping => "shopping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "search" => Some(AdType::Search),
            "shopping" => Some(AdType::Shopping),
            _ => None,
        }
    }
}

impl std::fmt::Display for AdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of one check. `ads_count == ads.len()` for every result the
/// bundled client produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub query: String,
    pub has_ads: bool,
    pub ads_count: u32,
    pub ads: Vec<AdEntry>,
    #[serde(default)]
    pub ad_types: Vec<AdType>,
    /// Location the upstream actually searched from, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_used: Option<String>,
    /// Country and language the search ran with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hl: Option<String>,
}

impl CheckResult {
    /// A result with only search ads, if any.
    pub fn from_ads(query: impl Into<String>, ads: Vec<AdEntry>) -> Self {
        let ad_types = if ads.is_empty() {
            Vec::new()
        } else {
            vec![AdType::Search]
        };
        Self {
            query: query.into(),
            has_ads: !ads.is_empty(),
            ads_count: ads.len() as u32,
            ads,
            ad_types,
            location_used: None,
            gl: None,
            hl: None,
        }
    }
}

/// Why a transient failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    Timeout,
    RateLimited,
    Network,
    Upstream,
}

impl TransientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransientKind::Timeout => "timeout",
            TransientKind::RateLimited => "rate_limited",
            TransientKind::Network => "network",
            TransientKind::Upstream => "upstream",
        }
    }
}

impl std::fmt::Display for TransientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("transient check failure ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    #[error("permanent check failure: {0}")]
    Permanent(String),
}

impl CheckError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        CheckError::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        CheckError::Permanent(message.into())
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self::transient(
            TransientKind::Timeout,
            format!("check did not complete within {:?}", after),
        )
    }

    /// Returns true if running the same check again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckError::Transient { .. })
    }
}

/// Executes one ad presence check.
///
/// Implementations must be safe to call concurrently from several workers and
/// keep no mutable state between calls.
#[async_trait]
pub trait AdCheckClient: Send + Sync {
    async fn check(&self, request: &CheckRequest) -> Result<CheckResult, CheckError>;
}
