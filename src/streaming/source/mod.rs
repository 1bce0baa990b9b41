// Pluggable digit sources for the stream engine
//
// A source answers one question: "give me `count` digits starting at `start`".
// The engine never retries a failed fetch, so a source that needs resilience must
// bring its own. New sources can be added by:
// 1. Implementing the SequenceSource trait
// 2. Adding a variant to SourceConfig
// 3. Registering in the factory function
//
// Current implementations:
// - Http: the pi.delivery REST API
// - Static: an in-memory digit string (offline use and tests)

mod http;
mod memory;

use crate::streaming::types::{Digit, StreamResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use http::{PiDeliverySource, DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};
pub use memory::StaticSource;

/// Configuration for the available source types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SourceConfig {
    /// Remote REST API returning `{ "content": "<digits>" }`
    #[serde(rename = "http")]
    Http {
        #[serde(default = "default_api_url")]
        api_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },

    /// Fixed digit string held in memory
    #[serde(rename = "static")]
    Static {
        digits: String,
        /// Artificial per-fetch latency in milliseconds
        #[serde(default)]
        latency_ms: Option<u64>,
    },
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Http {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// A window-addressable source of sequence digits
///
/// Implementations must be idempotent for a given `(start, count)` pair: the engine
/// may refetch a window and relies on getting the same digits back.
///
/// # Extension Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use pi_stream::streaming::{SequenceSource, StreamResult};
///
/// pub struct Zeros;
///
/// #[async_trait]
/// impl SequenceSource for Zeros {
///     async fn fetch(&self, _start: u64, count: usize) -> StreamResult<String> {
///         Ok("0".repeat(count))
///     }
/// }
/// ```
#[async_trait]
pub trait SequenceSource: Send + Sync {
    /// Fetch `count` digits covering offsets `[start, start + count)`
    ///
    /// Returns the raw payload, one character per offset. Characters that are not
    /// decimal digits are tolerated and skipped by the engine.
    async fn fetch(&self, start: u64, count: usize) -> StreamResult<String>;

    /// Short human-readable description, used in logs
    fn describe(&self) -> String;
}

/// Factory function to create a SequenceSource from configuration
pub fn create_source(config: SourceConfig) -> StreamResult<Arc<dyn SequenceSource>> {
    match config {
        SourceConfig::Http {
            api_url,
            timeout_secs,
        } => Ok(Arc::new(PiDeliverySource::new(api_url, timeout_secs)?)),

        SourceConfig::Static { digits, latency_ms } => {
            let source = StaticSource::new(digits);
            Ok(Arc::new(match latency_ms {
                Some(ms) => source.with_latency(std::time::Duration::from_millis(ms)),
                None => source,
            }))
        }
    }
}

/// Convert a source payload into ring slot contents
pub fn parse_digits(payload: &str) -> Vec<Digit> {
    payload.chars().map(Digit::from_char).collect()
}
