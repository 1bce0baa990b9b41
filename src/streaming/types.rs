// Common types for the streaming module

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur during streaming operations
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Requested digits [{start}, {end}) are beyond the {available} available")]
    OutOfRange {
        start: u64,
        end: u64,
        available: u64,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// One element of the sequence as delivered by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Digit {
    /// A decimal digit, 0 through 9
    Value(u8),

    /// Anything that is not a decimal digit; skipped on emission
    Invalid,
}

impl Digit {
    pub fn from_char(c: char) -> Self {
        match c.to_digit(10) {
            Some(d) => Digit::Value(d as u8),
            None => Digit::Invalid,
        }
    }

    pub fn value(&self) -> Option<u8> {
        match self {
            Digit::Value(d) => Some(*d),
            Digit::Invalid => None,
        }
    }
}

/// Current state of a streaming engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", content = "data")]
pub enum StreamState {
    /// Engine has never been started
    #[default]
    Idle,

    /// Initial fetch of every ring slot is in flight
    Buffering,

    /// Pipeline is emitting digits
    Streaming { started_at: f64 },

    /// Engine was stopped (or seeked) and is waiting for `start`
    Stopped,

    /// The initial fill failed
    Error { message: String },
}

/// Notification published for every emitted digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitEvent {
    /// Offset of the digit in the sequence
    pub position: u64,
    pub digit: u8,
    /// Run that produced the event; bumps on every `start`, `stop` and `seek`
    pub generation: u64,
}

/// Statistics about an engine
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineStats {
    pub generation: u64,
    pub digits_emitted: u64,
    pub slots_fetched: u64,
    pub fetch_failures: u64,
    pub slot_retries: u64,
    pub stale_results_discarded: u64,
    pub position: Option<u64>,
}
