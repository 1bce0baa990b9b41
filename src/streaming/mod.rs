// Digit streaming engine
//
// This module fetches windows of a digit sequence from a pluggable source,
// buffers them in a fixed ring, and emits them one digit at a time at a steady
// cadence so that fetch latency is hidden from listeners.
//
// Architecture:
// - `source`: Trait-based system for pluggable digit sources (HTTP, in-memory)
// - `ring`: Fixed ring of prefetch slots, guarded by a run generation
// - `engine`: Lifecycle, prefetch scheduling and timed emission
// - `config`: Engine options and defaults

pub mod config;
pub mod engine;
pub mod ring;
pub mod source;
pub mod types;

pub use config::StreamEngineConfig;
pub use engine::{ListenerId, StreamEngine};
pub use ring::{BufferSlot, RingBuffer, RingMetrics};
pub use source::{
    create_source, parse_digits, PiDeliverySource, SequenceSource, SourceConfig, StaticSource,
};
pub use types::{Digit, DigitEvent, EngineStats, StreamError, StreamResult, StreamState};
