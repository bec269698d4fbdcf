//! Alerts sent when a scheduled check finds ads.

mod telegram;

pub use telegram::TelegramNotifier;

use crate::check_client::CheckResult;
use crate::job_store::Job;
use anyhow::Result;
use async_trait::async_trait;

/// Receives the result of every successful scheduled run that found ads.
#[async_trait]
pub trait AdNotifier: Send + Sync {
    async fn notify_ads_found(&self, job: &Job, result: &CheckResult) -> Result<()>;
}

/// Plain text alert listing every ad found.
pub fn format_ads_found_message(job: &Job, result: &CheckResult) -> String {
    let location = result
        .location_used
        .as_deref()
        .or(job.location.as_deref())
        .map(|l| format!(" ({})", l))
        .unwrap_or_default();

    let mut message = format!(
        "Scheduled alert: ads found!\n\nQuery: {}{}\nAds: {}",
        job.query, location, result.ads_count
    );
    if !result.ad_types.is_empty() {
        let types: Vec<&str> = result.ad_types.iter().map(|t| t.as_str()).collect();
        message.push_str(&format!("\nTypes: {}", types.join(", ")));
    }

    if !result.ads.is_empty() {
        message.push_str("\n\n--- Ads ---");
        for (i, ad) in result.ads.iter().enumerate() {
            let title = if ad.title.is_empty() { "(no title)" } else { ad.title.as_str() };
            let url = if ad.url.is_empty() { "(no url)" } else { ad.url.as_str() };
            message.push_str(&format!("\n{}) {}\n   {}", i + 1, title, url));
        }
    }
    message
}
