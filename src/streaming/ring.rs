// Fixed-size ring of buffer slots for prefetched digit windows
//
// Each slot holds the most recent window fetched for its ring position. Slots are
// overwritten in place as the ring wraps. The ring also owns the run generation:
// writes tagged with a superseded generation are rejected under the same lock that
// bumps it, so a fetch that lands after `stop` can never touch the current run.

use crate::streaming::types::Digit;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// One ring position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferSlot {
    /// Sequence offset of `digits[0]`; `None` until first populated
    pub start: Option<u64>,
    pub digits: Vec<Digit>,
}

impl BufferSlot {
    pub fn is_ready(&self, expected: u64) -> bool {
        self.start == Some(expected)
    }
}

/// Metrics for ring activity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RingMetrics {
    pub total_stored: u64,
    pub total_stale: u64,
    pub generation: u64,
    pub capacity: usize,
}

struct RingState {
    generation: u64,
    slots: Vec<BufferSlot>,
}

pub struct RingBuffer {
    state: RwLock<RingState>,
    capacity: usize,

    total_stored: AtomicU64,
    total_stale: AtomicU64,
}

impl RingBuffer {
    /// Create a ring with `capacity` empty slots
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(RingState {
                generation: 0,
                slots: vec![BufferSlot::default(); capacity],
            }),
            capacity,
            total_stored: AtomicU64::new(0),
            total_stale: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Supersede the current generation and return the new one
    pub fn begin_generation(&self) -> u64 {
        let mut state = self.state.write();
        state.generation += 1;
        state.generation
    }

    /// Store a fetched window into `position`
    ///
    /// Returns `false` without touching the slot if `generation` is no longer current.
    pub fn store(&self, generation: u64, position: usize, start: u64, digits: Vec<Digit>) -> bool {
        let mut state = self.state.write();
        if state.generation != generation {
            self.total_stale.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let Some(slot) = state.slots.get_mut(position) else {
            return false;
        };
        slot.start = Some(start);
        slot.digits = digits;
        self.total_stored.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Whether `position` already holds the window starting at `start`
    pub fn holds(&self, position: usize, start: u64) -> bool {
        self.state
            .read()
            .slots
            .get(position)
            .is_some_and(|slot| slot.is_ready(start))
    }

    /// Snapshot of the slot at `position` if it holds the window at `expected`
    pub fn ready(&self, position: usize, expected: u64) -> Option<BufferSlot> {
        self.state
            .read()
            .slots
            .get(position)
            .filter(|slot| slot.is_ready(expected))
            .cloned()
    }

    /// Start offsets of every slot, in ring order
    pub fn offsets(&self) -> Vec<Option<u64>> {
        self.state.read().slots.iter().map(|slot| slot.start).collect()
    }

    pub fn get_metrics(&self) -> RingMetrics {
        RingMetrics {
            total_stored: self.total_stored.load(Ordering::Relaxed),
            total_stale: self.total_stale.load(Ordering::Relaxed),
            generation: self.generation(),
            capacity: self.capacity,
        }
    }
}
