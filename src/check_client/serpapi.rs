//! HTTP client for the SerpApi Google search endpoint.

use super::{
    AdCheckClient, AdEntry, AdType, CheckError, CheckRequest, CheckResult, TransientKind,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// SerpApi's answer for a query with no organic results; not a failure for us.
const NO_RESULTS_ERROR: &str = "hasn't returned any results";

#[derive(Debug, Clone)]
pub struct SerpApiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub google_domain: String,
    pub gl: String,
    pub hl: String,
    pub timeout_secs: u64,
}

impl Default for SerpApiSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://serpapi.com".to_string(),
            google_domain: "google.com.tr".to_string(),
            gl: "tr".to_string(),
            hl: "tr".to_string(),
            timeout_secs: 20,
        }
    }
}

pub struct SerpApiClient {
    client: reqwest::Client,
    settings: SerpApiSettings,
}

impl SerpApiClient {
    pub fn new(mut settings: SerpApiSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        settings.base_url = settings.base_url.trim_end_matches('/').to_string();

        Ok(Self { client, settings })
    }

    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    /// Runs one search and returns the raw SerpApi JSON.
    async fn search(
        &self,
        request: &CheckRequest,
        location: Option<&str>,
    ) -> Result<Value, CheckError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| CheckError::permanent("SerpApi key is not configured"))?;

        let mut params: Vec<(&str, &str)> = vec![
            ("engine", "google"),
            ("q", request.query.as_str()),
            ("gl", self.settings.gl.as_str()),
            ("hl", self.settings.hl.as_str()),
            ("google_domain", self.settings.google_domain.as_str()),
            ("device", request.device.as_str()),
            ("num", "10"),
            ("api_key", api_key),
        ];
        if let Some(location) = location {
            params.push(("location", location));
        }

        let url = format!("{}/search", self.settings.base_url);
        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let data: Value = response.json().await.map_err(|e| {
            CheckError::transient(
                TransientKind::Upstream,
                format!("invalid response body: {}", e),
            )
        })?;

        if let Some(message) = data.get("error").and_then(Value::as_str) {
            if !message.contains(NO_RESULTS_ERROR) {
                return Err(CheckError::permanent(message.to_string()));
            }
        }

        Ok(data)
    }
}

#[async_trait]
impl AdCheckClient for SerpApiClient {
    async fn check(&self, request: &CheckRequest) -> Result<CheckResult, CheckError> {
        let mut best: Option<(Vec<AdEntry>, Value)> = None;

        for location in location_attempts(request.location.as_deref()) {
            let data = self.search(request, location.as_deref()).await?;
            let ads = parse_ads(&data);
            debug!(
                "Search for '{}' (location: {:?}) returned {} ads",
                request.query,
                location,
                ads.len()
            );
            let is_better = best
                .as_ref()
                .map(|(best_ads, _)| ads.len() > best_ads.len())
                .unwrap_or(true);
            if is_better {
                best = Some((ads, data));
            }
        }

        let (ads, data) = best.unwrap_or_default();
        let mut result = CheckResult::from_ads(request.query.clone(), ads);
        result.ad_types = parse_ad_types(&data, result.has_ads);
        result.gl = Some(self.settings.gl.clone());
        result.hl = Some(self.settings.hl.clone());
        result.location_used = data
            .pointer("/search_parameters/location_used")
            .or_else(|| data.pointer("/search_parameters/location"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(result)
    }
}

/// Locations to try, broadest first: no location, the normalized city, and
/// the raw input when it differs from the normalized form.
fn location_attempts(location: Option<&str>) -> Vec<Option<String>> {
    let mut attempts = vec![None];
    let Some(raw) = location.map(str::trim).filter(|l| !l.is_empty()) else {
        return attempts;
    };

    let normalized = if raw.to_lowercase().contains("istanbul") {
        "Istanbul, Turkey".to_string()
    } else {
        let city = raw.split('/').next().unwrap_or(raw).trim();
        format!("{}, Turkey", city)
    };

    attempts.push(Some(normalized.clone()));
    if normalized != raw {
        attempts.push(Some(raw.to_string()));
    }
    attempts
}

fn parse_ads(data: &Value) -> Vec<AdEntry> {
    let raw_ads = data
        .get("ads")
        .and_then(Value::as_array)
        .filter(|ads| !ads.is_empty())
        .or_else(|| data.get("ad_results").and_then(Value::as_array));

    let first_str = |ad: &Value, keys: &[&str]| -> String {
        keys.iter()
            .filter_map(|key| ad.get(*key).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    raw_ads
        .map(|ads| {
            ads.iter()
                .map(|ad| AdEntry {
                    title: first_str(ad, &["title", "headline"]),
                    url: first_str(ad, &["link", "displayed_link", "tracking_link"]),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Search ads come from `parse_ads`; shopping ads are only flagged, their
/// entries are not listed.
fn parse_ad_types(data: &Value, has_search_ads: bool) -> Vec<AdType> {
    let mut types = Vec::new();
    if has_search_ads {
        types.push(AdType::Search);
    }
    let has_shopping = ["shopping_results", "inline_shopping_results"]
        .iter()
        .filter_map(|key| data.get(*key).and_then(Value::as_array))
        .any(|results| !results.is_empty());
    if has_shopping {
        types.push(AdType::Shopping);
    }
    types
}

fn classify_transport_error(e: reqwest::Error) -> CheckError {
    if e.is_timeout() {
        CheckError::transient(TransientKind::Timeout, e.to_string())
    } else if let Some(status) = e.status() {
        classify_status(status.as_u16(), &e.to_string())
    } else {
        CheckError::transient(TransientKind::Network, e.to_string())
    }
}

fn classify_status(status: u16, body: &str) -> CheckError {
    let message = format!("upstream returned status {}: {}", status, body.trim());
    match status {
        429 => CheckError::transient(TransientKind::RateLimited, message),
        408 => CheckError::transient(TransientKind::Timeout, message),
        500..=599 => CheckError::transient(TransientKind::Upstream, message),
        _ => CheckError::permanent(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check_client::Device;
    use serde_json::json;

    #[test]
    fn test_client_creation_trims_trailing_slash() {
        let client = SerpApiClient::new(SerpApiSettings {
            base_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_permanent() {
        let client = SerpApiClient::new(SerpApiSettings::default()).unwrap();
        let request = CheckRequest::new("shoes", None, Device::Desktop);

        let err = client.check(&request).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("key is not configured"));
    }

    #[test]
    fn test_location_attempts_without_location() {
        assert_eq!(location_attempts(None), vec![None]);
        assert_eq!(location_attempts(Some("   ")), vec![None]);
    }

    #[test]
    fn test_location_attempts_normalizes_city() {
        assert_eq!(
            location_attempts(Some("Ankara/Cankaya")),
            vec![
                None,
                Some("Ankara, Turkey".to_string()),
                Some("Ankara/Cankaya".to_string()),
            ]
        );
    }

    #[test]
    fn test_location_attempts_istanbul_variants() {
        assert_eq!(
            location_attempts(Some("istanbul kadikoy")),
            vec![
                None,
                Some("Istanbul, Turkey".to_string()),
                Some("istanbul kadikoy".to_string()),
            ]
        );
        // Already normalized input is not tried twice
        assert_eq!(
            location_attempts(Some("Istanbul, Turkey")),
            vec![None, Some("Istanbul, Turkey".to_string())]
        );
    }

    #[test]
    fn test_parse_ads_prefers_ads_then_ad_results() {
        let data = json!({
            "ads": [
                {"title": "Cheap Flights", "link": "https://flights.example"},
                {"headline": "Fly Now", "displayed_link": "fly.example"}
            ]
        });
        let ads = parse_ads(&data);
        assert_eq!(ads.len(), 2);
        assert_eq!(ads[0].title, "Cheap Flights");
        assert_eq!(ads[0].url, "https://flights.example");
        assert_eq!(ads[1].title, "Fly Now");
        assert_eq!(ads[1].url, "fly.example");

        let data = json!({
            "ads": [],
            "ad_results": [{"title": "Other", "tracking_link": "https://t.example"}]
        });
        let ads = parse_ads(&data);
        assert_eq!(ads.len(), 1);
        assert_eq!(ads[0].url, "https://t.example");

        assert!(parse_ads(&json!({"organic_results": []})).is_empty());
    }

    #[test]
    fn test_parse_ad_types() {
        let data = json!({
            "ads": [{"title": "Shoe Shop", "link": "https://shoes.example"}],
            "inline_shopping_results": [{"title": "Sneakers", "price": "100 TL"}]
        });
        assert_eq!(
            parse_ad_types(&data, true),
            vec![AdType::Search, AdType::Shopping]
        );

        let data = json!({"shopping_results": [], "inline_shopping_results": []});
        assert!(parse_ad_types(&data, false).is_empty());

        let data = json!({"shopping_results": [{"title": "Boots"}]});
        assert_eq!(parse_ad_types(&data, false), vec![AdType::Shopping]);
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(
            classify_status(429, "slow down"),
            CheckError::transient(
                TransientKind::RateLimited,
                "upstream returned status 429: slow down"
            )
        );
        assert!(classify_status(503, "").is_retryable());
        assert!(classify_status(408, "").is_retryable());
        assert!(!classify_status(400, "bad query").is_retryable());
        assert!(!classify_status(401, "invalid key").is_retryable());
    }
}
