use async_trait::async_trait;
use parking_lot::Mutex;
use pi_stream::streaming::source::StaticSource;
use pi_stream::{
    DigitEvent, SequenceSource, StreamEngine, StreamEngineConfig, StreamError, StreamResult,
    StreamState,
};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::time::{sleep, Instant};

// =============================================================================
// HELPERS
// =============================================================================

/// Serves a fixed digit string with a per-window latency
struct ScriptedSource {
    digits: Vec<char>,
    latency: Box<dyn Fn(u64) -> Duration + Send + Sync>,
    calls: Mutex<Vec<u64>>,
}

impl ScriptedSource {
    fn new(digits: &str, latency: impl Fn(u64) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            digits: digits.chars().collect(),
            latency: Box::new(latency),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<u64> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SequenceSource for ScriptedSource {
    async fn fetch(&self, start: u64, count: usize) -> StreamResult<String> {
        self.calls.lock().push(start);
        sleep((self.latency)(start)).await;

        let end = start + count as u64;
        if end > self.digits.len() as u64 {
            return Err(StreamError::OutOfRange {
                start,
                end,
                available: self.digits.len() as u64,
            });
        }
        Ok(self.digits[start as usize..end as usize].iter().collect())
    }

    fn describe(&self) -> String {
        "scripted source".to_string()
    }
}

/// Records every event with the (paused) time it was published at
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<(DigitEvent, Instant)>>>,
}

impl Recorder {
    fn attach(engine: &StreamEngine) -> Self {
        let recorder = Self::default();
        let events = Arc::clone(&recorder.events);
        engine.listen(move |event| events.lock().push((*event, Instant::now())));
        recorder
    }

    fn len(&self) -> usize {
        self.events.lock().len()
    }

    fn events(&self) -> Vec<DigitEvent> {
        self.events.lock().iter().map(|(event, _)| *event).collect()
    }

    fn positions(&self) -> Vec<u64> {
        self.events().iter().map(|event| event.position).collect()
    }

    fn digits(&self) -> Vec<u8> {
        self.events().iter().map(|event| event.digit).collect()
    }

    fn times(&self) -> Vec<Instant> {
        self.events.lock().iter().map(|(_, at)| *at).collect()
    }

    /// Milliseconds between consecutive events
    fn gaps_ms(&self) -> Vec<u128> {
        self.times()
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }
}

fn config(ring_size: usize, chunk_size: usize, delay_ms: u64) -> StreamEngineConfig {
    StreamEngineConfig {
        ring_size,
        chunk_size,
        delay_ms,
        ..Default::default()
    }
}

fn repeating_digits(len: usize) -> String {
    (0..len).map(|i| char::from(b'0' + (i % 10) as u8)).collect()
}

// =============================================================================
// INITIAL FILL
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_initial_fill_populates_every_slot() {
    for ring_size in 1..=4 {
        let engine = StreamEngine::new(
            StreamEngineConfig {
                start: 5,
                ..config(ring_size, 4, 1000)
            },
            Arc::new(StaticSource::new(repeating_digits(100))),
        )
        .unwrap();

        engine.start().await.unwrap();

        let expected: Vec<Option<u64>> = (0..ring_size).map(|i| Some(5 + 4 * i as u64)).collect();
        assert_eq!(engine.ring_offsets(), expected, "ring_size {}", ring_size);
        engine.stop();
    }
}

#[tokio::test(start_paused = true)]
async fn test_emission_waits_for_every_slot() {
    // Slot 1 lands long after slot 0
    let source = Arc::new(ScriptedSource::new(&repeating_digits(60), |start| {
        if start == 3 {
            Duration::from_millis(300)
        } else {
            Duration::ZERO
        }
    }));
    let engine = StreamEngine::new(config(2, 3, 100), source).unwrap();
    let recorder = Recorder::attach(&engine);

    let started = Instant::now();
    engine.start().await.unwrap();
    assert!(matches!(engine.state(), StreamState::Streaming { .. }));

    sleep(Duration::from_millis(50)).await;

    let times = recorder.times();
    assert!(!times.is_empty());
    assert!(times[0] - started >= Duration::from_millis(300));
    engine.stop();
}

// =============================================================================
// EMISSION ORDER AND CADENCE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_slot_ring_emits_nine_digits_in_order() {
    let engine = StreamEngine::new(config(2, 3, 100), Arc::new(StaticSource::new("123456789")))
        .unwrap();
    let recorder = Recorder::attach(&engine);

    engine.start().await.unwrap();
    sleep(Duration::from_millis(2000)).await;

    assert_eq!(recorder.positions(), (0..9).collect::<Vec<u64>>());
    assert_eq!(recorder.digits(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    assert!(recorder.gaps_ms().iter().all(|gap| *gap == 100));

    // Windows [9, 12) and [12, 15) do not exist, so the pipeline stalls at 9
    let stats = engine.stats();
    assert_eq!(stats.fetch_failures, 2);
    assert_eq!(stats.digits_emitted, 9);
    assert_eq!(engine.position(), Some(8));
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_fetches_emit_without_gaps() {
    // Latencies 0, 40, 80 ms by window index, so fetches complete out of order
    let source = Arc::new(ScriptedSource::new(&repeating_digits(400), |start| {
        Duration::from_millis(((start / 7) % 3) * 40)
    }));
    let engine = StreamEngine::new(config(3, 7, 10), source.clone()).unwrap();
    let mut events = engine.subscribe();

    engine.start().await.unwrap();

    for expected in 0..150u64 {
        let event = events.recv().await.unwrap();
        assert_eq!(event.position, expected);
        assert_eq!(event.digit as u64, expected % 10);
    }
    engine.stop();

    // Every window was fetched once, in dispatch order
    let calls = source.calls();
    assert!(calls.len() >= 150 / 7);
    for (i, start) in calls.iter().enumerate().skip(3) {
        assert_eq!(*start, 7 * i as u64);
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_prefetch_stalls_without_gaps() {
    // Each window takes longer to fetch than a slot takes to emit
    let source = Arc::new(ScriptedSource::new(&repeating_digits(200), |_| {
        Duration::from_millis(100)
    }));
    let engine = StreamEngine::new(config(2, 2, 10), source).unwrap();
    let mut events = engine.subscribe();

    engine.start().await.unwrap();

    for expected in 0..20u64 {
        let event = events.recv().await.unwrap();
        assert_eq!(event.position, expected);
    }

    assert!(engine.stats().slot_retries > 0);
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn test_invalid_entries_are_skipped_without_a_tick() {
    let engine =
        StreamEngine::new(config(2, 3, 100), Arc::new(StaticSource::new("12x456789012")))
            .unwrap();
    let recorder = Recorder::attach(&engine);

    engine.start().await.unwrap();
    sleep(Duration::from_millis(550)).await;

    assert_eq!(recorder.positions(), vec![0, 1, 3, 4, 5, 6]);
    assert_eq!(recorder.digits(), vec![1, 2, 4, 5, 6, 7]);
    assert!(recorder.gaps_ms().iter().all(|gap| *gap == 100));
    engine.stop();
}

#[tokio::test(start_paused = true)]
async fn test_set_delay_applies_from_next_scheduled_tick() {
    let engine = StreamEngine::new(
        config(2, 5, 100),
        Arc::new(StaticSource::new(repeating_digits(50))),
    )
    .unwrap();
    let recorder = Recorder::attach(&engine);

    engine.start().await.unwrap();

    // First digit went out at t=0 with a 100 ms tick already scheduled
    sleep(Duration::from_millis(50)).await;
    engine.set_delay(300);
    assert_eq!(engine.delay(), 300);

    sleep(Duration::from_millis(700)).await;

    assert_eq!(recorder.positions(), vec![0, 1, 2, 3]);
    assert_eq!(recorder.gaps_ms(), vec![100, 300, 300]);
    engine.stop();
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_then_start_drops_previous_generation() {
    let engine = StreamEngine::new(
        config(2, 3, 100),
        Arc::new(StaticSource::new(repeating_digits(30))),
    )
    .unwrap();
    let recorder = Recorder::attach(&engine);

    engine.start().await.unwrap();
    sleep(Duration::from_millis(250)).await;

    engine.stop();
    assert!(!engine.is_running());
    assert_eq!(engine.state(), StreamState::Stopped);

    let before = recorder.events();
    assert_eq!(before.len(), 3);
    let first_generation = before[0].generation;

    // Nothing of the stopped run trickles in
    sleep(Duration::from_millis(500)).await;
    assert_eq!(recorder.len(), 3);

    engine.start().await.unwrap();
    sleep(Duration::from_millis(250)).await;
    engine.stop();

    let after = &recorder.events()[3..];
    assert_eq!(after.len(), 3);
    assert!(after.iter().all(|event| event.generation > first_generation));
    // Restart resumes from the cursor, which only `seek` moves
    assert_eq!(
        after.iter().map(|event| event.position).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[tokio::test(start_paused = true)]
async fn test_immediate_restart_publishes_only_new_generation() {
    // Prefetches are slow, so the stopped run still has one in flight at restart
    let source = Arc::new(ScriptedSource::new(&repeating_digits(60), |start| {
        if start < 6 {
            Duration::ZERO
        } else {
            Duration::from_millis(300)
        }
    }));
    let engine = StreamEngine::new(config(2, 3, 100), source).unwrap();
    let recorder = Recorder::attach(&engine);

    engine.start().await.unwrap();

    // Mid-tick: digits 0 and 1 are out, the tick for 2 is pending, [6, 9) is in flight
    sleep(Duration::from_millis(150)).await;
    engine.stop();
    engine.start().await.unwrap();
    let generation = engine.stats().generation;

    // Slot 0 still holds [0, 3), so the old prefetch never landed
    assert_eq!(engine.ring_offsets(), vec![Some(0), Some(3)]);

    sleep(Duration::from_millis(420)).await;
    engine.stop();

    let events = recorder.events();
    assert_eq!(events.len(), 7);
    let (before, after) = events.split_at(2);
    assert!(before.iter().all(|event| event.generation < generation));
    assert!(after.iter().all(|event| event.generation == generation));
    assert_eq!(
        after.iter().map(|event| event.position).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4]
    );
    assert_eq!(engine.stats().stale_results_discarded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_seek_restarts_at_new_offset() {
    let engine = StreamEngine::new(
        config(2, 3, 100),
        Arc::new(StaticSource::new(repeating_digits(40))),
    )
    .unwrap();
    let recorder = Recorder::attach(&engine);

    engine.start().await.unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(recorder.positions(), vec![0, 1]);

    engine.seek(17);
    assert!(!engine.is_running());
    assert_eq!(engine.cursor(), 17);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(recorder.len(), 2);

    engine.start().await.unwrap();
    assert_eq!(engine.ring_offsets(), vec![Some(17), Some(20)]);
    sleep(Duration::from_millis(250)).await;
    engine.stop();

    assert_eq!(recorder.positions(), vec![0, 1, 17, 18, 19]);
    assert_eq!(recorder.digits()[2..], [7, 8, 9]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_initial_fill_discards_results() {
    let source = Arc::new(ScriptedSource::new(&repeating_digits(100), |_| {
        Duration::from_millis(500)
    }));
    let engine = Arc::new(StreamEngine::new(config(2, 3, 100), source).unwrap());
    let recorder = Recorder::attach(&engine);

    let starting = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.start().await })
    };

    sleep(Duration::from_millis(100)).await;
    engine.seek(30);

    // The interrupted start returns quietly
    starting.await.unwrap().unwrap();
    assert!(!engine.is_running());
    assert_eq!(engine.ring_offsets(), vec![None, None]);

    sleep(Duration::from_millis(1000)).await;
    assert_eq!(recorder.len(), 0);
    assert_eq!(engine.ring_offsets(), vec![None, None]);

    engine.start().await.unwrap();
    assert_eq!(engine.ring_offsets(), vec![Some(30), Some(33)]);
    sleep(Duration::from_millis(50)).await;
    engine.stop();

    assert_eq!(recorder.positions(), vec![30]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_reuses_slots_that_already_hold_the_window() {
    let source = Arc::new(ScriptedSource::new(&repeating_digits(100), |_| Duration::ZERO));
    let engine = StreamEngine::new(config(2, 3, 1000), source.clone()).unwrap();

    engine.start().await.unwrap();
    engine.stop();
    engine.start().await.unwrap();
    engine.stop();

    assert_eq!(source.calls(), vec![0, 3]);
    assert_eq!(engine.stats().slots_fetched, 2);
}

#[tokio::test(start_paused = true)]
async fn test_listener_can_stop_the_engine() {
    let engine = Arc::new(
        StreamEngine::new(
            config(2, 3, 10),
            Arc::new(StaticSource::new(repeating_digits(60))),
        )
        .unwrap(),
    );
    let handle: Arc<OnceLock<Weak<StreamEngine>>> = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));

    {
        let handle = Arc::clone(&handle);
        let seen = Arc::clone(&seen);
        engine.listen(move |event| {
            seen.lock().push(event.position);
            if event.position == 2 {
                if let Some(engine) = handle.get().and_then(Weak::upgrade) {
                    engine.stop();
                }
            }
        });
    }
    handle.set(Arc::downgrade(&engine)).unwrap();

    engine.start().await.unwrap();
    sleep(Duration::from_millis(500)).await;

    assert_eq!(*seen.lock(), vec![0, 1, 2]);
    assert!(!engine.is_running());
}

// =============================================================================
// LISTENERS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_engines_publish_on_separate_channels() {
    let source: Arc<StaticSource> = Arc::new(StaticSource::new(repeating_digits(60)));
    let a = StreamEngine::new(config(2, 3, 100), source.clone()).unwrap();
    let b = StreamEngine::new(
        StreamEngineConfig {
            start: 10,
            ..config(2, 3, 100)
        },
        source,
    )
    .unwrap();
    assert_ne!(a.event_name(), b.event_name());

    let recorder_a = Recorder::attach(&a);
    let recorder_b = Recorder::attach(&b);

    a.start().await.unwrap();
    b.start().await.unwrap();
    sleep(Duration::from_millis(250)).await;
    a.stop();
    b.stop();

    assert_eq!(recorder_a.positions(), vec![0, 1, 2]);
    assert_eq!(recorder_b.positions(), vec![10, 11, 12]);
}

#[tokio::test(start_paused = true)]
async fn test_unlisten_stops_delivery() {
    let engine = StreamEngine::new(
        config(2, 3, 100),
        Arc::new(StaticSource::new(repeating_digits(60))),
    )
    .unwrap();
    let seen = Arc::new(Mutex::new(0u32));
    let id = {
        let seen = Arc::clone(&seen);
        engine.listen(move |_| *seen.lock() += 1)
    };

    engine.start().await.unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(*seen.lock(), 2);

    assert!(engine.unlisten(id));
    sleep(Duration::from_millis(300)).await;
    assert_eq!(*seen.lock(), 2);
    assert!(engine.stats().digits_emitted >= 5);
    engine.stop();
}
