use super::{format_ads_found_message, AdNotifier};
use crate::check_client::CheckResult;
use crate::config::TelegramSettings;
use crate::job_store::Job;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts alerts to a Telegram chat through the bot API.
pub struct TelegramNotifier {
    client: reqwest::Client,
    send_message_url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(settings: &TelegramSettings) -> Result<Self> {
        Self::with_api_url(settings, TELEGRAM_API_URL)
    }

    pub fn with_api_url(settings: &TelegramSettings, api_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            send_message_url: format!(
                "{}/bot{}/sendMessage",
                api_url.trim_end_matches('/'),
                settings.bot_token
            ),
            chat_id: settings.chat_id.clone(),
        })
    }

    /// The job's own chat when it has one, the configured chat otherwise.
    fn target_chat<'a>(&'a self, job: &'a Job) -> &'a str {
        job.notify_chat_id.as_deref().unwrap_or(&self.chat_id)
    }

    fn message_payload(&self, job: &Job, result: &CheckResult) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.target_chat(job),
            "text": format_ads_found_message(job, result),
        })
    }
}

#[async_trait]
impl AdNotifier for TelegramNotifier {
    async fn notify_ads_found(&self, job: &Job, result: &CheckResult) -> Result<()> {
        self.client
            .post(&self.send_message_url)
            .json(&self.message_payload(job, result))
            .send()
            .await
            .context("Failed to reach Telegram")?
            .error_for_status()
            .context("Telegram rejected the message")?;

        debug!(
            "Sent ads alert for job {} to chat {}",
            job.id,
            self.target_chat(job)
        );
        Ok(())
    }
}
