//! Playback queue: bounded FIFO of decoded frames in front of the output
//! device, with end-of-stream detection and interruptible flush.
//!
//! The protocol layer produces decoded frames; a feeder thread trickles them
//! into the [`AudioSink`] so the device never holds more than a couple of
//! frames and the FIFO here remains the real buffer (drop-oldest applies to
//! the oldest queued audio, not to arbitrary device internals).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use verdure_core::domain::AudioFrame;

use crate::error::AudioError;
use crate::sink::AudioSink;

/// Target capacity of the frame FIFO (≈ 3 s of 60 ms frames).
pub const QUEUE_CAPACITY_FRAMES: usize = 50;

/// Frames kept queued inside the device sink at any time.
const SINK_LOW_WATER: usize = 3;

/// Residual playback below which the stream counts as drained.
const RESIDUAL_THRESHOLD_MS: u64 = 100;

/// Events emitted by the playback path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The buffer drained and stayed idle: the utterance finished.
    /// Emitted at most once per burst of frames.
    Completed,
}

/// Playback tuning.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Idle window after the last enqueued frame before end-of-stream fires.
    pub eos_idle: Duration,

    /// Nominal duration of one frame, for residual estimation.
    pub frame_duration: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            eos_idle: Duration::from_millis(1500),
            frame_duration: Duration::from_millis(60),
        }
    }
}

struct QueueState {
    frames: VecDeque<AudioFrame>,
    /// Set once playback of the current burst has begun; cleared by flush
    /// and by the Completed emission.
    burst_active: bool,
    last_enqueue: Instant,
}

struct Shared {
    state: Mutex<QueueState>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    dropped: AtomicU64,
}

/// The playback queue and its feeder thread.
pub struct Playback {
    shared: Arc<Shared>,
    sink: Arc<dyn AudioSink>,
    feeder: Option<thread::JoinHandle<()>>,
}

impl Playback {
    /// Create the queue over `sink`. Returns the handle and the event stream.
    pub fn new(
        sink: Arc<dyn AudioSink>,
        config: PlaybackConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(QUEUE_CAPACITY_FRAMES),
                burst_active: false,
                last_enqueue: Instant::now(),
            }),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        });

        let feeder = {
            let shared = Arc::clone(&shared);
            let sink = Arc::clone(&sink);
            thread::Builder::new()
                .name("verdure-playfeed".into())
                .spawn(move || Self::feed_loop(&shared, sink.as_ref(), &config, &event_tx))
                .expect("failed to spawn playback feeder thread")
        };

        (
            Self {
                shared,
                sink,
                feeder: Some(feeder),
            },
            event_rx,
        )
    }

    /// Enqueue one decoded frame. When the FIFO is full the oldest frame is
    /// dropped and the overflow logged.
    pub fn enqueue(&self, frame: AudioFrame) {
        let mut state = lock(&self.shared.state);
        if state.frames.len() >= QUEUE_CAPACITY_FRAMES {
            state.frames.pop_front();
            let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(
                dropped_total = total,
                "Playback queue full, dropping oldest frame"
            );
        }
        state.frames.push_back(frame);
        state.burst_active = true;
        state.last_enqueue = Instant::now();
        drop(state);
        self.shared.wakeup.notify_one();
    }

    /// Discard everything queued, both here and in the device. Idempotent.
    pub fn flush(&self) {
        let mut state = lock(&self.shared.state);
        state.frames.clear();
        state.burst_active = false;
        drop(state);
        self.sink.clear();
        tracing::debug!("Playback flushed");
    }

    /// Whether any audio is queued or audible.
    pub fn is_active(&self) -> bool {
        let queued = {
            let state = lock(&self.shared.state);
            !state.frames.is_empty()
        };
        queued || self.sink.is_playing()
    }

    /// Frames currently waiting in the FIFO (excludes device internals).
    pub fn queued_frames(&self) -> usize {
        lock(&self.shared.state).frames.len()
    }

    /// Total frames dropped to overflow.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Set device output volume (0.0 – 1.0).
    pub fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume);
    }

    // ── Feeder thread ──────────────────────────────────────────────

    fn feed_loop(
        shared: &Shared,
        sink: &dyn AudioSink,
        config: &PlaybackConfig,
        events: &mpsc::UnboundedSender<PlaybackEvent>,
    ) {
        let poll = Duration::from_millis(20);

        loop {
            if shared.shutdown.load(Ordering::SeqCst) {
                return;
            }

            // Pull the next frame if the device wants more.
            let next = {
                let mut state = lock(&shared.state);
                if state.frames.is_empty() {
                    // Nothing queued: check end-of-stream, then wait.
                    let device_frames = sink.queued_frames();
                    let residual_ms = device_frames as u64 * config.frame_duration.as_millis() as u64;
                    if state.burst_active
                        && residual_ms < RESIDUAL_THRESHOLD_MS
                        && state.last_enqueue.elapsed() >= config.eos_idle
                    {
                        state.burst_active = false;
                        tracing::debug!("Playback drained, emitting completion");
                        let _ = events.send(PlaybackEvent::Completed);
                    }
                    let (guard, _timeout) = match shared.wakeup.wait_timeout(state, poll) {
                        Ok(pair) => pair,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    drop(guard);
                    None
                } else if sink.queued_frames() < SINK_LOW_WATER {
                    state.frames.pop_front()
                } else {
                    drop(state);
                    thread::sleep(poll);
                    None
                }
            };

            if let Some(frame) = next {
                if let Err(e) = sink.append(frame.pcm, frame.sample_rate, frame.channels) {
                    tracing::error!(error = %e, "Playback sink rejected frame");
                }
            }
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_all();
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Recording sink: swallows frames instantly, reports a configurable
    /// queue depth.
    #[derive(Default)]
    struct MockSinkState {
        appended: Vec<usize>,
        cleared: u32,
    }

    struct MockSink {
        state: StdMutex<MockSinkState>,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: StdMutex::new(MockSinkState::default()),
            })
        }
    }

    impl AudioSink for MockSink {
        fn append(&self, pcm: Vec<i16>, _sample_rate: u32, _channels: u16) -> Result<(), AudioError> {
            self.state.lock().unwrap().appended.push(pcm.len());
            Ok(())
        }

        fn clear(&self) {
            self.state.lock().unwrap().cleared += 1;
        }

        fn queued_frames(&self) -> usize {
            0 // device consumes instantly
        }

        fn is_playing(&self) -> bool {
            false
        }

        fn set_volume(&self, _volume: f32) {}
    }

    fn frame() -> AudioFrame {
        AudioFrame::new(vec![1i16; 960], 16_000, 1)
    }

    fn short_config() -> PlaybackConfig {
        PlaybackConfig {
            eos_idle: Duration::from_millis(80),
            frame_duration: Duration::from_millis(60),
        }
    }

    #[tokio::test]
    async fn frames_flow_to_the_sink() {
        let sink = MockSink::new();
        let (playback, _rx) = Playback::new(sink.clone(), short_config());

        for _ in 0..3 {
            playback.enqueue(frame());
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.state.lock().unwrap().appended.len(), 3);
        drop(playback);
    }

    #[tokio::test]
    async fn completion_emitted_once_after_idle() {
        let sink = MockSink::new();
        let (playback, mut rx) = Playback::new(sink, short_config());

        playback.enqueue(frame());
        playback.enqueue(frame());

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("expected completion within timeout")
            .unwrap();
        assert_eq!(event, PlaybackEvent::Completed);

        // No second emission without new frames.
        let second = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(second.is_err(), "completion must fire once per burst");

        // A new burst re-arms the detector.
        playback.enqueue(frame());
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("expected second completion")
            .unwrap();
        assert_eq!(event, PlaybackEvent::Completed);
        drop(playback);
    }

    #[tokio::test]
    async fn overflow_drops_oldest() {
        // A sink that reports itself full so the feeder never drains.
        struct FullSink;
        impl AudioSink for FullSink {
            fn append(&self, _p: Vec<i16>, _r: u32, _c: u16) -> Result<(), AudioError> {
                Ok(())
            }
            fn clear(&self) {}
            fn queued_frames(&self) -> usize {
                SINK_LOW_WATER + 1
            }
            fn is_playing(&self) -> bool {
                true
            }
            fn set_volume(&self, _v: f32) {}
        }

        let (playback, _rx) = Playback::new(Arc::new(FullSink), short_config());
        for _ in 0..(QUEUE_CAPACITY_FRAMES + 5) {
            playback.enqueue(frame());
        }
        assert_eq!(playback.queued_frames(), QUEUE_CAPACITY_FRAMES);
        assert_eq!(playback.dropped_frames(), 5);
        drop(playback);
    }

    #[tokio::test]
    async fn flush_clears_queue_and_sink_and_is_idempotent() {
        let sink = MockSink::new();
        let (playback, mut rx) = Playback::new(sink.clone(), short_config());

        for _ in 0..10 {
            playback.enqueue(frame());
        }
        playback.flush();
        playback.flush();

        assert_eq!(playback.queued_frames(), 0);
        assert!(sink.state.lock().unwrap().cleared >= 2);

        // A flushed burst must not report completion.
        let event = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(event.is_err(), "flush must suppress the completion event");
        drop(playback);
    }
}
