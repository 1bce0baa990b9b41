// HTTP digit source
//
// Fetches windows from a pi.delivery-compatible REST API:
//   GET {api_url}?start=<offset>&numberOfDigits=<count>
// Expected response body:
// {
//   "content": "14159265358979323846"
// }

use super::SequenceSource;
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.pi.delivery/v1/pi";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct DigitsResponse {
    content: String,
}

pub struct PiDeliverySource {
    api_url: String,
    client: reqwest::Client,
}

impl PiDeliverySource {
    pub fn new(api_url: impl Into<String>, timeout_secs: u64) -> StreamResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StreamError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_url: api_url.into(),
            client,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn parse_body(body: &str) -> StreamResult<String> {
        serde_json::from_str::<DigitsResponse>(body)
            .map(|response| response.content)
            .map_err(|e| StreamError::Parse(format!("Invalid JSON: {}", e)))
    }
}

impl Default for PiDeliverySource {
    fn default() -> Self {
        // Only fails if the TLS backend cannot initialize
        Self::new(DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS).unwrap_or_else(|e| {
            log::warn!("Using default HTTP client: {}", e);
            Self {
                api_url: DEFAULT_API_URL.to_string(),
                client: reqwest::Client::new(),
            }
        })
    }
}

#[async_trait]
impl SequenceSource for PiDeliverySource {
    async fn fetch(&self, start: u64, count: usize) -> StreamResult<String> {
        if count == 0 {
            return Err(StreamError::InvalidRequest(
                "digit count must be positive".to_string(),
            ));
        }

        log::debug!("GET {} start={} numberOfDigits={}", self.api_url, start, count);

        let response = self
            .client
            .get(&self.api_url)
            .query(&[("start", start), ("numberOfDigits", count as u64)])
            .send()
            .await
            .map_err(|e| StreamError::Network(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(StreamError::Network(format!(
                "{} returned status {}",
                self.api_url,
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| StreamError::Network(format!("Failed to read body: {}", e)))?;
        let content = Self::parse_body(&body)?;

        if content.chars().count() != count {
            log::warn!(
                "Asked {} for {} digits at {}, got {}",
                self.api_url,
                count,
                start,
                content.chars().count()
            );
        }

        Ok(content)
    }

    fn describe(&self) -> String {
        format!("http source ({})", self.api_url)
    }
}
