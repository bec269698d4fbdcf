use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub tick_interval_secs: Option<u64>,
    pub worker_count: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub check_timeout_secs: Option<u64>,

    // Feature configs
    pub retry: Option<RetryConfig>,
    pub serpapi: Option<SerpApiConfig>,
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SerpApiConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub google_domain: Option<String>,
    pub gl: Option<String>,
    pub hl: Option<String>,
    /// Per HTTP request; defaults to the check timeout.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
