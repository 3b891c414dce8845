//! Keyword spotter — wake-word detection over the shared capture stream.
//!
//! The spotter is a pure producer: it subscribes to the capture hub, feeds
//! frames to a [`KeywordBackend`], and emits [`SpotterEvent`]s. Exactly one
//! consumer (the orchestrator) reacts to detections; the spotter never calls
//! back into conversation control itself.
//!
//! Restart discipline: a restart always disposes the old recognizer and
//! model and builds fresh instances — underlying SDKs fail with invalid
//! handles when state is reused — and at least the configured gap must pass
//! between dispose and re-create.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::capture::{CaptureHub, Subscription};
use crate::error::AudioError;

/// Consecutive restart failures within [`FAILURE_WINDOW`] that disable the
/// spotter.
const FAILURE_LIMIT: usize = 3;

/// Window over which restart failures are counted.
const FAILURE_WINDOW: Duration = Duration::from_secs(10);

/// A successful wake-word detection.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordDetection {
    /// The phrase that fired.
    pub keyword: String,
    /// Backend confidence (0.0 – 1.0).
    pub confidence: f32,
    /// Name of the model that produced the detection.
    pub model: String,
}

/// A recognizer instance over one loaded model.
///
/// Implementations are consumed frame-by-frame and re-armed with
/// [`reset`](KeywordBackend::reset) after each detection.
pub trait KeywordBackend: Send {
    /// Feed one PCM frame (16 kHz mono i16); returns a detection when the
    /// keyword completes.
    fn process(&mut self, pcm: &[i16]) -> Result<Option<KeywordDetection>, AudioError>;

    /// Re-arm continuous recognition after a detection.
    fn reset(&mut self) -> Result<(), AudioError>;
}

/// Builds fresh recognizer instances.
///
/// Every call must construct a new recognizer and a new model instance —
/// handle reuse across restarts is what this seam exists to prevent.
pub trait KeywordBackendFactory: Send + Sync {
    fn create(&self, model_path: &Path) -> Result<Box<dyn KeywordBackend>, AudioError>;
}

/// Events produced by the spotter.
#[derive(Debug, Clone, PartialEq)]
pub enum SpotterEvent {
    /// The wake word fired.
    Detected(KeywordDetection),

    /// A recognition or restart failure; the spotter keeps running.
    Error(String),

    /// Repeated restart failures: the spotter is latched off until an
    /// explicit [`KeywordSpotter::restart`].
    Disabled,
}

struct SpotterShared {
    paused: AtomicBool,
    disabled: AtomicBool,
    failures: Mutex<Vec<Instant>>,
}

impl SpotterShared {
    /// Record a restart failure; returns true when the failure limit tripped.
    fn record_failure(&self) -> bool {
        let mut failures = match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        failures.push(now);
        failures.retain(|t| now.duration_since(*t) <= FAILURE_WINDOW);
        if failures.len() >= FAILURE_LIMIT {
            self.disabled.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn clear_failures(&self) {
        match self.failures.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

/// Wake-word spotter over the capture hub.
pub struct KeywordSpotter {
    factory: Arc<dyn KeywordBackendFactory>,
    model_path: PathBuf,
    recreate_gap: Duration,
    shared: Arc<SpotterShared>,
    events: mpsc::UnboundedSender<SpotterEvent>,
    subscription: Option<Subscription>,
    last_dispose: Option<Instant>,
}

impl KeywordSpotter {
    /// Create a spotter. Returns the handle and its event stream.
    pub fn new(
        factory: Arc<dyn KeywordBackendFactory>,
        model_path: impl Into<PathBuf>,
        recreate_gap: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SpotterEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                factory,
                model_path: model_path.into(),
                recreate_gap,
                shared: Arc::new(SpotterShared {
                    paused: AtomicBool::new(false),
                    disabled: AtomicBool::new(false),
                    failures: Mutex::new(Vec::new()),
                }),
                events,
                subscription: None,
                last_dispose: None,
            },
            event_rx,
        )
    }

    /// Acquire a capture subscription and begin continuous recognition with
    /// a freshly created recognizer.
    pub fn start(&mut self, hub: &CaptureHub) -> Result<(), AudioError> {
        if self.shared.disabled.load(Ordering::SeqCst) {
            return Err(AudioError::SpotterDisabled);
        }
        if self.subscription.is_some() {
            return Ok(());
        }

        // Dispose → re-create gap: invalid-handle failures in backend SDKs.
        if let Some(disposed_at) = self.last_dispose {
            let elapsed = disposed_at.elapsed();
            if elapsed < self.recreate_gap {
                std::thread::sleep(self.recreate_gap - elapsed);
            }
        }

        let backend = match self.factory.create(&self.model_path) {
            Ok(backend) => {
                self.shared.clear_failures();
                backend
            }
            Err(e) => {
                if self.shared.record_failure() {
                    let _ = self.events.send(SpotterEvent::Disabled);
                }
                return Err(e);
            }
        };

        let handler = Self::make_handler(
            backend,
            Arc::clone(&self.factory),
            self.model_path.clone(),
            self.recreate_gap,
            Arc::clone(&self.shared),
            self.events.clone(),
        );
        self.subscription = Some(hub.subscribe(handler));

        tracing::info!(model = %self.model_path.display(), "Keyword spotter started");
        Ok(())
    }

    /// Suspend frame delivery to the recognizer without releasing the
    /// subscriber slot. Used while the orchestrator owns the microphone for
    /// a conversational turn.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        tracing::debug!("Keyword spotter paused");
    }

    /// Resume recognition after [`pause`](Self::pause).
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        tracing::debug!("Keyword spotter resumed");
    }

    /// Whether frame delivery is currently suspended.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Release the subscription and dispose the recognizer.
    pub fn stop(&mut self) {
        if self.subscription.take().is_some() {
            // Dropping the subscription joins the delivery thread, which
            // drops the recognizer and model with it.
            self.last_dispose = Some(Instant::now());
            tracing::info!("Keyword spotter stopped");
        }
    }

    /// Whether the spotter holds an active subscription.
    pub fn is_running(&self) -> bool {
        self.subscription.is_some()
    }

    /// Whether the failure latch is set.
    pub fn is_disabled(&self) -> bool {
        self.shared.disabled.load(Ordering::SeqCst)
    }

    /// Clear the failure latch and start again.
    pub fn restart(&mut self, hub: &CaptureHub) -> Result<(), AudioError> {
        self.stop();
        self.shared.disabled.store(false, Ordering::SeqCst);
        self.shared.clear_failures();
        self.start(hub)
    }

    /// Switch to a different keyword model.
    ///
    /// A running spotter is stopped first; the next start loads the new
    /// model into a fresh recognizer.
    pub fn set_model(&mut self, model_path: impl Into<PathBuf>) {
        self.stop();
        self.model_path = model_path.into();
        tracing::info!(model = %self.model_path.display(), "Keyword model selected");
    }

    /// Build the frame handler that runs on the subscription's delivery
    /// thread and owns the recognizer.
    fn make_handler(
        backend: Box<dyn KeywordBackend>,
        factory: Arc<dyn KeywordBackendFactory>,
        model_path: PathBuf,
        recreate_gap: Duration,
        shared: Arc<SpotterShared>,
        events: mpsc::UnboundedSender<SpotterEvent>,
    ) -> impl FnMut(verdure_core::domain::AudioFrame) + Send + 'static {
        let mut backend = Some(backend);

        move |frame| {
            if shared.paused.load(Ordering::SeqCst) || shared.disabled.load(Ordering::SeqCst) {
                return;
            }

            let Some(recognizer) = backend.as_mut() else {
                return;
            };

            match recognizer.process(&frame.pcm) {
                Ok(Some(detection)) => {
                    tracing::info!(
                        keyword = %detection.keyword,
                        confidence = detection.confidence,
                        "Keyword detected"
                    );
                    let _ = events.send(SpotterEvent::Detected(detection));

                    // Auto-restart recognition; a reset failure is reported
                    // but does not release the subscriber slot.
                    if let Err(e) = recognizer.reset() {
                        tracing::warn!(error = %e, "Recognizer re-arm failed");
                        let _ = events.send(SpotterEvent::Error(e.to_string()));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Keyword recognition failed, rebuilding recognizer");
                    let _ = events.send(SpotterEvent::Error(e.to_string()));

                    // Fresh instances only: dispose, wait the gap, re-create.
                    backend = None;
                    std::thread::sleep(recreate_gap);
                    match factory.create(&model_path) {
                        Ok(fresh) => {
                            shared.clear_failures();
                            backend = Some(fresh);
                        }
                        Err(create_err) => {
                            let _ = events.send(SpotterEvent::Error(create_err.to_string()));
                            if shared.record_failure() {
                                tracing::error!(
                                    "Keyword spotter disabled after repeated restart failures"
                                );
                                let _ = events.send(SpotterEvent::Disabled);
                            }
                        }
                    }
                }
            }
        }
    }
}
