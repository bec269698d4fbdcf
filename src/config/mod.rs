mod file_config;

pub use file_config::{FileConfig, RetryConfig, SerpApiConfig, TelegramConfig};

use crate::check_client::SerpApiSettings;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub tick_interval_secs: u64,
    pub worker_count: usize,
    pub check_timeout_secs: u64,
    pub serpapi_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            tick_interval_secs: 15,
            worker_count: 4,
            check_timeout_secs: 30,
            serpapi_key: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub tick_interval_secs: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub check_timeout_secs: u64,

    // Feature configs (with defaults)
    pub retry: RetrySettings,
    pub serpapi: SerpApiSettings,
    /// None when no bot token or chat id is configured.
    pub telegram: Option<TelegramSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Total attempts per execution, the first one included.
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_secs: 2,
            max_backoff_secs: 30,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
}

const DEFAULT_QUEUE_CAPACITY: usize = 64;

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let tick_interval_secs = file.tick_interval_secs.unwrap_or(cli.tick_interval_secs);
        let worker_count = file.worker_count.unwrap_or(cli.worker_count);
        let queue_capacity = file.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let check_timeout_secs = file.check_timeout_secs.unwrap_or(cli.check_timeout_secs);

        let retry_file = file.retry.unwrap_or_default();
        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_attempts: retry_file
                .max_attempts
                .unwrap_or(retry_defaults.max_attempts),
            initial_backoff_secs: retry_file
                .initial_backoff_secs
                .unwrap_or(retry_defaults.initial_backoff_secs),
            max_backoff_secs: retry_file
                .max_backoff_secs
                .unwrap_or(retry_defaults.max_backoff_secs),
            backoff_multiplier: retry_file
                .backoff_multiplier
                .unwrap_or(retry_defaults.backoff_multiplier),
        };

        for (name, value) in [
            ("tick_interval_secs", tick_interval_secs),
            ("worker_count", worker_count as u64),
            ("queue_capacity", queue_capacity as u64),
            ("check_timeout_secs", check_timeout_secs),
            ("retry.max_attempts", retry.max_attempts as u64),
        ] {
            if value < 1 {
                bail!("{} must be at least 1", name);
            }
        }
        if retry.backoff_multiplier < 1.0 {
            bail!(
                "retry.backoff_multiplier must be at least 1.0, got {}",
                retry.backoff_multiplier
            );
        }

        let serpapi_file = file.serpapi.unwrap_or_default();
        let serpapi_defaults = SerpApiSettings::default();
        let serpapi = SerpApiSettings {
            api_key: serpapi_file.api_key.or_else(|| cli.serpapi_key.clone()),
            base_url: serpapi_file.base_url.unwrap_or(serpapi_defaults.base_url),
            google_domain: serpapi_file
                .google_domain
                .unwrap_or(serpapi_defaults.google_domain),
            gl: serpapi_file.gl.unwrap_or(serpapi_defaults.gl),
            hl: serpapi_file.hl.unwrap_or(serpapi_defaults.hl),
            timeout_secs: serpapi_file.timeout_secs.unwrap_or(check_timeout_secs),
        };

        // Telegram needs both values; a partial setup disables notifications
        let telegram_file = file.telegram.unwrap_or_default();
        let bot_token = telegram_file
            .bot_token
            .or_else(|| cli.telegram_bot_token.clone());
        let chat_id = telegram_file
            .chat_id
            .or_else(|| cli.telegram_chat_id.clone());
        let telegram = match (bot_token, chat_id) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramSettings { bot_token, chat_id }),
            _ => None,
        };

        Ok(Self {
            db_dir,
            tick_interval_secs,
            worker_count,
            queue_capacity,
            check_timeout_secs,
            retry,
            serpapi,
            telegram,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }

    pub fn check_log_db_path(&self) -> PathBuf {
        self.db_dir.join("check_log.db")
    }
}
