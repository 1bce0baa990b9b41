//! Streams the digits of pi (or any window-addressable digit sequence) as a
//! steady cadence of events.
//!
//! A [`StreamEngine`] keeps a small ring of prefetched windows so that the time
//! spent fetching the next window overlaps with emitting the current one.
//!
//! ```rust,ignore
//! use pi_stream::{StreamEngine, StreamEngineConfig};
//!
//! let engine = StreamEngine::with_default_source(StreamEngineConfig::default())?;
//! engine.listen(|event| println!("{} -> {}", event.position, event.digit));
//! engine.start().await?;
//! ```

pub mod streaming;

pub use streaming::{
    create_source, Digit, DigitEvent, EngineStats, ListenerId, SequenceSource, SourceConfig,
    StreamEngine, StreamEngineConfig, StreamError, StreamResult, StreamState,
};
