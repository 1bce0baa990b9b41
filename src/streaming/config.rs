// Stream engine configuration

use crate::streaming::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EVENT_NAME_PREFIX: &str = "pi.digit";
pub const DEFAULT_RING_SIZE: usize = 2;
pub const DEFAULT_CHUNK_SIZE: usize = 314;
pub const DEFAULT_DELAY_MS: u64 = 1000;
pub const DEFAULT_START: u64 = 0;

/// Options recognized by [`StreamEngine`](crate::streaming::StreamEngine)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamEngineConfig {
    /// Notification channel name, unique per engine instance
    pub event_name: String,
    /// Number of prefetch slots
    pub ring_size: usize,
    /// Digits fetched per slot
    pub chunk_size: usize,
    /// Milliseconds between digit events
    pub delay_ms: u64,
    /// Offset of the first digit
    pub start: u64,
    /// Milliseconds between readiness checks of a slot; defaults to `delay_ms`
    pub retry_wait_ms: Option<u64>,
}

impl Default for StreamEngineConfig {
    fn default() -> Self {
        Self {
            event_name: unique_event_name(),
            ring_size: DEFAULT_RING_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            delay_ms: DEFAULT_DELAY_MS,
            start: DEFAULT_START,
            retry_wait_ms: None,
        }
    }
}

impl StreamEngineConfig {
    pub fn validate(&self) -> StreamResult<()> {
        if self.ring_size == 0 {
            return Err(StreamError::InvalidConfig(
                "ring_size must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(StreamError::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if (self.chunk_size as u64)
            .checked_mul(self.ring_size as u64)
            .is_none()
        {
            return Err(StreamError::InvalidConfig(format!(
                "chunk_size * ring_size ({} * {}) overflows a digit offset",
                self.chunk_size, self.ring_size
            )));
        }
        if self.event_name.is_empty() {
            return Err(StreamError::InvalidConfig(
                "event_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Retry interval in effect for this configuration
    pub fn retry_wait_ms(&self) -> u64 {
        self.retry_wait_ms.unwrap_or(self.delay_ms)
    }
}

/// `pi.digit-<random>`, so engines never share a channel by accident
pub fn unique_event_name() -> String {
    format!(
        "{}-{}",
        DEFAULT_EVENT_NAME_PREFIX,
        uuid::Uuid::new_v4().simple()
    )
}
