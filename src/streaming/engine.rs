// Stream engine - prefetching ring buffer with cadence-timed digit emission
//
// The engine manages:
// - A fixed ring of slots, each holding one window of digits
// - Concurrent initial fill of every slot before emission begins
// - A pipeline task that emits the ready slot one digit per tick and prefetches
//   the next use of that slot while it does so
// - Lifecycle (start, stop, seek) with a generation id per run, so results and
//   timers from a superseded run are dropped instead of acted upon
// - Listener registry for emitted digits

use crate::streaming::{
    config::StreamEngineConfig,
    ring::{BufferSlot, RingBuffer},
    source::{parse_digits, PiDeliverySource, SequenceSource},
    types::{Digit, DigitEvent, EngineStats, StreamError, StreamResult, StreamState},
};
use futures_util::future::join_all;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// Handle returned by [`StreamEngine::listen`]
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&DigitEvent) + Send + Sync>;

/// Shared between the engine handle and its spawned tasks
struct EngineInner {
    event_name: String,
    source: Arc<dyn SequenceSource>,
    ring: RingBuffer,
    ring_size: usize,
    chunk_size: usize,
    retry_wait: Duration,

    delay_ms: AtomicU64,
    cursor: AtomicU64,
    position: RwLock<Option<u64>>,
    running: AtomicBool,
    state: RwLock<StreamState>,

    // Cancels the pending timers and fetches of the current run
    cancel_token: Mutex<CancellationToken>,
    // Fired whenever a fetch lands in the ring
    slot_filled: Notify,
    // Serializes digit publication against lifecycle changes. Re-entrant so a
    // listener may call `stop` or `seek`.
    dispatch_gate: ReentrantMutex<()>,

    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,

    // Statistics
    digits_emitted: AtomicU64,
    slots_fetched: AtomicU64,
    fetch_failures: AtomicU64,
    slot_retries: AtomicU64,
}

/// Streams sequence digits from a [`SequenceSource`] at a configurable cadence
pub struct StreamEngine {
    inner: Arc<EngineInner>,
}

impl StreamEngine {
    /// Create an engine reading from `source`
    pub fn new(config: StreamEngineConfig, source: Arc<dyn SequenceSource>) -> StreamResult<Self> {
        config.validate()?;

        log::debug!(
            "Creating stream engine {} over {} (ring {} x {} digits)",
            config.event_name,
            source.describe(),
            config.ring_size,
            config.chunk_size
        );

        let inner = EngineInner {
            ring: RingBuffer::new(config.ring_size),
            ring_size: config.ring_size,
            chunk_size: config.chunk_size,
            // A zero interval would spin the dispatcher
            retry_wait: Duration::from_millis(config.retry_wait_ms().max(1)),
            delay_ms: AtomicU64::new(config.delay_ms),
            cursor: AtomicU64::new(config.start),
            position: RwLock::new(None),
            running: AtomicBool::new(false),
            state: RwLock::new(StreamState::Idle),
            cancel_token: Mutex::new(CancellationToken::new()),
            slot_filled: Notify::new(),
            dispatch_gate: ReentrantMutex::new(()),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            digits_emitted: AtomicU64::new(0),
            slots_fetched: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            slot_retries: AtomicU64::new(0),
            event_name: config.event_name,
            source,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Create an engine reading from the public pi.delivery API
    pub fn with_default_source(config: StreamEngineConfig) -> StreamResult<Self> {
        Self::new(config, Arc::new(PiDeliverySource::default()))
    }

    /// Name of this engine's notification channel
    pub fn event_name(&self) -> &str {
        &self.inner.event_name
    }

    /// Fill every ring slot, then begin emitting from the cursor
    ///
    /// Returns once the initial fill completed and the pipeline is running. Does
    /// nothing if the engine is already running. If `stop` or `seek` is called
    /// while the fill is in flight, returns `Ok(())` without starting emission.
    pub async fn start(&self) -> StreamResult<()> {
        let inner = &self.inner;

        let (generation, token, start, offsets) = {
            let _gate = inner.dispatch_gate.lock();
            if inner.running.load(Ordering::SeqCst) {
                return Ok(());
            }

            let start = inner.cursor.load(Ordering::SeqCst);
            let offsets = (0..inner.ring_size as u64)
                .map(|i| inner.window_after(start, i))
                .collect::<Option<Vec<u64>>>()
                .ok_or_else(|| {
                    StreamError::InvalidRequest(format!(
                        "offset {} leaves no room for {} windows of {} digits",
                        start, inner.ring_size, inner.chunk_size
                    ))
                })?;

            inner.running.store(true, Ordering::SeqCst);
            let generation = inner.ring.begin_generation();
            let token = CancellationToken::new();
            *inner.cancel_token.lock() = token.clone();
            inner.set_state(StreamState::Buffering);
            (generation, token, start, offsets)
        };

        log::info!(
            "Starting stream engine {} at offset {} (generation {})",
            inner.event_name,
            start,
            generation
        );

        // Barrier: every slot must land before the first digit goes out
        let fills = offsets
            .into_iter()
            .enumerate()
            .map(|(i, offset)| inner.fill_slot(generation, i, offset));
        let results = tokio::select! {
            biased;

            _ = token.cancelled() => {
                log::debug!("Initial fill of generation {} cancelled", generation);
                return Ok(());
            }

            results = join_all(fills) => results,
        };

        {
            let _gate = inner.dispatch_gate.lock();
            if !inner.is_current(generation, &token) {
                log::debug!("Generation {} superseded during initial fill", generation);
                return Ok(());
            }

            if let Some(err) = results.into_iter().find_map(Result::err) {
                log::error!("Initial fill of {} failed: {}", inner.event_name, err);
                inner.running.store(false, Ordering::SeqCst);
                token.cancel();
                inner.set_state(StreamState::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }

            inner.set_state(StreamState::Streaming {
                started_at: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            });
        }

        tokio::spawn(Arc::clone(inner).run_pipeline(generation, token, start));

        log::info!("Stream engine {} started", inner.event_name);
        Ok(())
    }

    /// Stop emitting and cancel all pending timers
    ///
    /// Fetches already in flight may still complete, but their results are
    /// discarded. No digit of the stopped run is published after this returns.
    pub fn stop(&self) {
        self.inner.halt();
    }

    /// Stop and move the cursor to `offset`; the next `start` begins there
    pub fn seek(&self, offset: u64) {
        {
            // Held across both so no `start` slips in between with the old cursor
            let _gate = self.inner.dispatch_gate.lock();
            self.inner.halt();
            self.inner.cursor.store(offset, Ordering::SeqCst);
        }
        log::info!("Stream engine {} cursor moved to {}", self.inner.event_name, offset);
    }

    /// Change the delay between digits
    ///
    /// Takes effect at the next scheduling decision. A tick already waiting keeps
    /// the delay it was scheduled with.
    pub fn set_delay(&self, delay_ms: u64) {
        self.inner.delay_ms.store(delay_ms, Ordering::Relaxed);
        log::debug!("Stream engine {} delay set to {} ms", self.inner.event_name, delay_ms);
    }

    pub fn delay(&self) -> u64 {
        self.inner.delay_ms.load(Ordering::Relaxed)
    }

    /// Register a callback for every emitted digit
    pub fn listen<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&DigitEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(callback);
        self.inner.listeners.write().push((id, listener));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Receive emitted digits through a channel
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DigitEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listen(move |event| {
            // Receiver may have been dropped
            let _ = tx.send(*event);
        });
        rx
    }

    /// Offset of the most recently emitted digit
    pub fn position(&self) -> Option<u64> {
        *self.inner.position.read()
    }

    /// Offset the next `start` begins from
    pub fn cursor(&self) -> u64 {
        self.inner.cursor.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> StreamState {
        self.inner.state.read().clone()
    }

    pub fn ring_size(&self) -> usize {
        self.inner.ring_size
    }

    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// Start offset held by each ring slot, in ring order
    pub fn ring_offsets(&self) -> Vec<Option<u64>> {
        self.inner.ring.offsets()
    }

    pub fn stats(&self) -> EngineStats {
        let ring = self.inner.ring.get_metrics();
        EngineStats {
            generation: ring.generation,
            digits_emitted: self.inner.digits_emitted.load(Ordering::Relaxed),
            slots_fetched: self.inner.slots_fetched.load(Ordering::Relaxed),
            fetch_failures: self.inner.fetch_failures.load(Ordering::Relaxed),
            slot_retries: self.inner.slot_retries.load(Ordering::Relaxed),
            stale_results_discarded: ring.total_stale,
            position: self.position(),
        }
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        // Pipeline tasks hold their own Arc; cancelling lets them exit
        self.inner.halt();
        log::debug!("StreamEngine {} dropped", self.inner.event_name);
    }
}

impl EngineInner {
    fn is_current(&self, generation: u64, token: &CancellationToken) -> bool {
        !token.is_cancelled() && self.ring.generation() == generation
    }

    fn set_state(&self, state: StreamState) {
        log::debug!("Stream engine {} state: {:?}", self.event_name, state);
        *self.state.write() = state;
    }

    fn halt(&self) {
        let _gate = self.dispatch_gate.lock();
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.cancel_token.lock().cancel();
        let generation = self.ring.begin_generation();

        if was_running {
            self.set_state(StreamState::Stopped);
            log::info!(
                "Stream engine {} stopped (next generation {})",
                self.event_name,
                generation
            );
        }
    }

    /// Start of the window `windows` chunks after `start`
    ///
    /// `None` if that window, or any digit in it, would lie past `u64::MAX`.
    fn window_after(&self, start: u64, windows: u64) -> Option<u64> {
        let chunk = self.chunk_size as u64;
        let offset = chunk
            .checked_mul(windows)
            .and_then(|distance| start.checked_add(distance))?;
        offset.checked_add(chunk - 1)?;
        Some(offset)
    }

    /// Fetch the window at `start` into ring slot `position`
    ///
    /// Skips the fetch if the slot already holds that window.
    async fn fill_slot(&self, generation: u64, position: usize, start: u64) -> StreamResult<()> {
        if self.ring.holds(position, start) {
            log::debug!("Slot {} already holds offset {}", position, start);
            return Ok(());
        }

        let payload = self
            .source
            .fetch(start, self.chunk_size)
            .await
            .inspect_err(|_| {
                self.fetch_failures.fetch_add(1, Ordering::Relaxed);
            })?;
        self.slots_fetched.fetch_add(1, Ordering::Relaxed);

        if self.ring.store(generation, position, start, parse_digits(&payload)) {
            self.slot_filled.notify_waiters();
        } else {
            log::debug!(
                "Discarding window at {} from superseded generation {}",
                start,
                generation
            );
        }
        Ok(())
    }

    fn spawn_prefetch(
        self: &Arc<Self>,
        generation: u64,
        token: CancellationToken,
        position: usize,
        start: u64,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    log::debug!("Prefetch of offset {} cancelled", start);
                }

                result = inner.fill_slot(generation, position, start) => {
                    if let Err(e) = result {
                        log::error!(
                            "Prefetch of slot {} at offset {} failed: {}",
                            position,
                            start,
                            e
                        );
                    }
                }
            }
        });
    }

    /// Emit slots in ring order until the run is cancelled
    async fn run_pipeline(self: Arc<Self>, generation: u64, token: CancellationToken, start: u64) {
        let ring_size = self.ring_size as u64;
        let mut position = 0;
        let mut expected = start;

        loop {
            let Some(slot) = self.wait_for_slot(position, expected, generation, &token).await
            else {
                break;
            };

            // The snapshot is ours, so the slot can be refilled while we emit
            match self.window_after(expected, ring_size) {
                Some(next) => self.spawn_prefetch(generation, token.clone(), position, next),
                None => log::warn!(
                    "Slot {} not refilled: no window after offset {} fits in the offset range",
                    position,
                    expected
                ),
            }

            if !self.send(expected, &slot.digits, generation, &token).await {
                break;
            }

            let Some(next) = self.window_after(expected, 1) else {
                log::error!(
                    "Stream engine {} reached the end of the offset range after {}",
                    self.event_name,
                    expected
                );
                let _gate = self.dispatch_gate.lock();
                if self.is_current(generation, &token) {
                    self.halt();
                }
                break;
            };

            position = (position + 1) % self.ring_size;
            expected = next;
        }

        log::debug!("Pipeline of generation {} finished", generation);
    }

    /// Wait until ring slot `position` holds the window at `expected`
    ///
    /// Re-checks every `retry_wait`, or sooner when any fetch lands. Returns `None`
    /// once the run is cancelled.
    async fn wait_for_slot(
        &self,
        position: usize,
        expected: u64,
        generation: u64,
        token: &CancellationToken,
    ) -> Option<BufferSlot> {
        loop {
            // Register before checking so a fill between the check and the wait is not lost
            let filled = self.slot_filled.notified();
            tokio::pin!(filled);
            filled.as_mut().enable();

            if !self.is_current(generation, token) {
                return None;
            }
            if let Some(slot) = self.ring.ready(position, expected) {
                return Some(slot);
            }

            self.slot_retries.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "Slot {} not ready for offset {}, retrying in {:?}",
                position,
                expected,
                self.retry_wait
            );

            tokio::select! {
                biased;

                _ = token.cancelled() => return None,
                _ = &mut filled => {}
                _ = tokio::time::sleep(self.retry_wait) => {}
            }
        }
    }

    /// Emit one slot, one digit per tick
    ///
    /// Invalid entries are skipped without consuming a tick. Returns `false` if the
    /// run was cancelled part way through.
    async fn send(
        &self,
        start: u64,
        digits: &[Digit],
        generation: u64,
        token: &CancellationToken,
    ) -> bool {
        for (i, digit) in digits.iter().enumerate() {
            let Some(value) = digit.value() else {
                continue;
            };
            // Only reachable if a source returned more digits than requested
            let Some(position) = start.checked_add(i as u64) else {
                break;
            };

            if !self.publish(generation, token, position, value) {
                return false;
            }

            // Read fresh so `set_delay` applies from the next tick on
            let delay = Duration::from_millis(self.delay_ms.load(Ordering::Relaxed));
            tokio::select! {
                biased;

                _ = token.cancelled() => return false,
                _ = tick(delay) => {}
            }
        }

        true
    }

    fn publish(&self, generation: u64, token: &CancellationToken, position: u64, digit: u8) -> bool {
        let _gate = self.dispatch_gate.lock();
        if !self.is_current(generation, token) {
            return false;
        }

        *self.position.write() = Some(position);
        self.digits_emitted.fetch_add(1, Ordering::Relaxed);

        let event = DigitEvent {
            position,
            digit,
            generation,
        };

        // Clone out so listeners can register or remove listeners
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }

        true
    }
}

async fn tick(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}
