// In-memory digit source
//
// Serves windows of a fixed digit string. Useful for:
// - Running the engine offline
// - Deterministic tests of the pipeline
// - Simulating network latency with `with_latency`

use super::SequenceSource;
use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct StaticSource {
    digits: Vec<char>,
    latency: Option<Duration>,
    fetch_count: AtomicU64,
}

impl StaticSource {
    pub fn new(digits: impl Into<String>) -> Self {
        Self {
            digits: digits.into().chars().collect(),
            latency: None,
            fetch_count: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    /// Number of fetches served so far, including failed ones
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SequenceSource for StaticSource {
    async fn fetch(&self, start: u64, count: usize) -> StreamResult<String> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);

        if count == 0 {
            return Err(StreamError::InvalidRequest(
                "digit count must be positive".to_string(),
            ));
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let end = start.saturating_add(count as u64);
        let available = self.digits.len() as u64;
        if end > available {
            return Err(StreamError::OutOfRange {
                start,
                end,
                available,
            });
        }

        Ok(self.digits[start as usize..end as usize].iter().collect())
    }

    fn describe(&self) -> String {
        format!("static source ({} digits)", self.digits.len())
    }
}
