//! Audio capture hub — one physical input stream, many subscribers.
//!
//! The hub owns the single capture stream for the process, opened through a
//! [`CaptureBackend`]. The default backend drives `cpal`; `cpal::Stream` is
//! `!Send` on some platforms, so it lives on a dedicated OS thread and the
//! hub talks to it through channels. Captured samples are converted to mono,
//! resampled to the session rate, cut into fixed-duration frames, and fanned
//! out to subscribers (codec path, keyword spotter).
//!
//! Lifecycle is reference-counted: the device stays open while any
//! [`Subscription`] is alive and closes shortly after the last one is
//! dropped. Calling [`CaptureHub::start`] while a stream with compatible
//! parameters is running is a no-op — tearing down and reopening the device
//! on every Listening ↔ Speaking cycle can block for seconds on constrained
//! boards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use rubato::{FftFixedIn, Resampler as _};

use verdure_core::domain::{AudioFrame, AudioParams};

use crate::error::AudioError;
use crate::fanout::FanOut;

/// Grace period between the last unsubscribe and device close.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Input chunk size fed to the resampler.
const RESAMPLE_CHUNK: usize = 1024;

/// Receives assembled frames from an open capture stream.
pub type FrameSink = Arc<dyn Fn(AudioFrame) + Send + Sync>;

/// An open capture stream.
pub trait CaptureStream: Send {
    /// Stop the stream. Must return within `timeout`; past it the caller
    /// force-resets its state and surfaces the error.
    fn close(self: Box<Self>, timeout: Duration) -> Result<(), AudioError>;
}

/// Opens capture streams.
///
/// The production backend wraps `cpal`; tests and headless deployments use
/// [`NullCaptureBackend`].
pub trait CaptureBackend: Send + Sync {
    fn open(
        &self,
        params: AudioParams,
        on_frame: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// State shared between the hub and its subscriptions.
struct HubShared {
    fanout: FanOut,
    backend: Arc<dyn CaptureBackend>,
    device: Mutex<Option<(AudioParams, Box<dyn CaptureStream>)>>,
    open_count: AtomicU64,
    stop_timeout: Duration,
}

/// The process-wide capture hub.
pub struct CaptureHub {
    inner: Arc<HubShared>,
}

/// An owned capture subscription.
///
/// Dropping the subscription unsubscribes the handler; when the last
/// subscription goes away the device closes after a short grace period.
pub struct Subscription {
    inner: Arc<HubShared>,
    id: u64,
}

impl CaptureHub {
    /// Create a hub over the default `cpal` backend.
    #[must_use]
    pub fn new(stop_timeout: Duration) -> Self {
        Self::with_backend(Arc::new(CpalCaptureBackend), stop_timeout)
    }

    /// Create a hub over an explicit backend.
    #[must_use]
    pub fn with_backend(backend: Arc<dyn CaptureBackend>, stop_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HubShared {
                fanout: FanOut::new(),
                backend,
                device: Mutex::new(None),
                open_count: AtomicU64::new(0),
                stop_timeout,
            }),
        }
    }

    /// Register a frame handler. Frames arrive in capture order on a
    /// dedicated delivery thread; a blocking handler only ever loses its own
    /// frames (drop-oldest, 8-frame buffer).
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        let id = self.inner.fanout.subscribe(handler);
        Subscription {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Ensure the capture stream is running with `params`.
    ///
    /// No-op when a stream with compatible `(sample_rate, channels)` is
    /// already open. A parameter mismatch tears the old stream down first,
    /// bounded by the stop timeout; past the timeout the stream state is
    /// force-reset and the error surfaced.
    pub fn start(&self, params: AudioParams) -> Result<(), AudioError> {
        let mut device = lock(&self.inner.device);

        if let Some((open_params, _)) = device.as_ref() {
            if open_params.is_compatible(&params) {
                tracing::debug!(
                    sample_rate = params.sample_rate,
                    channels = params.channels,
                    "Capture stream already running with compatible parameters"
                );
                return Ok(());
            }
            tracing::info!(
                old_rate = open_params.sample_rate,
                new_rate = params.sample_rate,
                "Capture parameters changed, restarting stream"
            );
            let (_, stream) = device.take().expect("checked above");
            stream.close(self.inner.stop_timeout)?;
        }

        let shared = Arc::clone(&self.inner);
        let sink: FrameSink = Arc::new(move |frame| shared.fanout.dispatch(&frame));
        let stream = self.inner.backend.open(params, sink)?;

        *device = Some((params, stream));
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            "Capture stream opened"
        );
        Ok(())
    }

    /// Stop the capture stream, bounded by the stop timeout.
    pub fn stop(&self) -> Result<(), AudioError> {
        let stream = lock(&self.inner.device).take();
        match stream {
            Some((_, stream)) => {
                let result = stream.close(self.inner.stop_timeout);
                if result.is_ok() {
                    tracing::debug!("Capture stream closed");
                }
                result
            }
            None => Ok(()),
        }
    }

    /// Whether the capture stream is currently open.
    pub fn is_running(&self) -> bool {
        lock(&self.inner.device).is_some()
    }

    /// Number of times the physical stream has been opened.
    ///
    /// The Listening ↔ Speaking cycle must not bump this; tests assert on it.
    pub fn open_count(&self) -> u64 {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    /// Active subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.inner.fanout.len()
    }

    /// Total frames dropped across subscriber buffers.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.fanout.dropped_frames()
    }

    /// Deliver one frame to all subscribers.
    ///
    /// The capture backend calls this for every assembled frame; tests use
    /// it to drive the fan-out without audio hardware.
    pub fn dispatch_frame(&self, frame: &AudioFrame) {
        self.inner.fanout.dispatch(frame);
    }

    fn release(inner: &Arc<HubShared>, id: u64) {
        inner.fanout.unsubscribe(id);
        if !inner.fanout.is_empty() {
            return;
        }

        // Last subscriber gone: close the device after a grace period, unless
        // someone re-subscribes in the meantime.
        let shared = Arc::clone(inner);
        thread::Builder::new()
            .name("verdure-capture-close".into())
            .spawn(move || {
                thread::sleep(CLOSE_GRACE);
                if !shared.fanout.is_empty() {
                    return;
                }
                let stream = lock(&shared.device).take();
                if let Some((_, stream)) = stream {
                    if let Err(e) = stream.close(shared.stop_timeout) {
                        tracing::warn!(error = %e, "Deferred capture close failed");
                    }
                }
            })
            .ok();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        CaptureHub::release(&self.inner, self.id);
    }
}

impl Drop for CaptureHub {
    fn drop(&mut self) {
        if let Some((_, stream)) = lock(&self.inner.device).take() {
            let _ = stream.close(Duration::from_secs(1));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Null backend ───────────────────────────────────────────────────

/// A backend that opens nothing. Frames are injected with
/// [`CaptureHub::dispatch_frame`]; used in tests and audio-less deployments.
#[derive(Debug, Clone, Default)]
pub struct NullCaptureBackend;

struct NullStream;

impl CaptureStream for NullStream {
    fn close(self: Box<Self>, _timeout: Duration) -> Result<(), AudioError> {
        Ok(())
    }
}

impl CaptureBackend for NullCaptureBackend {
    fn open(
        &self,
        _params: AudioParams,
        _on_frame: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        Ok(Box::new(NullStream))
    }
}

// ── cpal backend ───────────────────────────────────────────────────

/// Production backend: default input device via `cpal`, confined to a
/// dedicated OS thread.
#[derive(Debug, Clone, Default)]
pub struct CpalCaptureBackend;

struct CpalStream {
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureStream for CpalStream {
    fn close(mut self: Box<Self>, timeout: Duration) -> Result<(), AudioError> {
        let _ = self.stop_tx.send(());
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                Ok(())
            }
            Err(_) => {
                // The stream refused to stop in time. Detach the thread and
                // let the caller reset its state.
                tracing::warn!(?timeout, "Capture stream stop timed out, force-resetting");
                Err(AudioError::StreamStopTimeout(timeout))
            }
        }
    }
}

impl CaptureBackend for CpalCaptureBackend {
    fn open(
        &self,
        params: AudioParams,
        on_frame: FrameSink,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), AudioError>>();

        let thread = thread::Builder::new()
            .name("verdure-capture".into())
            .spawn(move || {
                run_cpal_stream(params, &on_frame, &stop_rx, &init_tx);
                let _ = done_tx.send(());
            })
            .map_err(|e| AudioError::InputStream(format!("failed to spawn capture thread: {e}")))?;

        init_rx.recv().map_err(|_| AudioError::ThreadDied)??;

        Ok(Box::new(CpalStream {
            stop_tx,
            done_rx,
            thread: Some(thread),
        }))
    }
}

/// Body of the capture thread: build the stream, then park until stopped.
/// The `cpal::Stream` never leaves this thread.
fn run_cpal_stream(
    params: AudioParams,
    on_frame: &FrameSink,
    stop_rx: &mpsc::Receiver<()>,
    init_tx: &mpsc::Sender<Result<(), AudioError>>,
) {
    let stream = match build_cpal_stream(params, on_frame) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = init_tx.send(Err(AudioError::InputStream(e.to_string())));
        return;
    }

    let _ = init_tx.send(Ok(()));

    // Block until the hub asks us to stop (or is dropped).
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_cpal_stream(
    params: AudioParams,
    on_frame: &FrameSink,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    let supported = device
        .default_input_config()
        .map_err(|e| AudioError::InputStream(e.to_string()))?;

    let device_rate = supported.sample_rate().0;
    let device_channels = supported.channels();
    let stream_config: StreamConfig = supported.config();

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        device_rate,
        device_channels,
        "Capture device selected"
    );

    let mut assembler = FrameAssembler::new(device_rate, device_channels, params)?;

    let err_fn = |err: cpal::StreamError| {
        tracing::error!(%err, "Audio input stream error");
    };

    let stream = match supported.sample_format() {
        SampleFormat::F32 => {
            let sink = Arc::clone(on_frame);
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, |frame| sink(frame));
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let sink = Arc::clone(on_frame);
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let floats: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    assembler.push(&floats, |frame| sink(frame));
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I32 => {
            let sink = Arc::clone(on_frame);
            device.build_input_stream(
                &stream_config,
                move |data: &[i32], _: &cpal::InputCallbackInfo| {
                    #[allow(clippy::cast_precision_loss)]
                    let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 2_147_483_648.0).collect();
                    assembler.push(&floats, |frame| sink(frame));
                },
                err_fn,
                None,
            )
        }
        format => return Err(AudioError::UnsupportedFormat(format!("{format:?}"))),
    };

    stream.map_err(|e| AudioError::InputStream(e.to_string()))
}

// ── Frame assembly ─────────────────────────────────────────────────

/// Converts raw device callback chunks into session-rate mono i16 frames.
///
/// Pipeline: interleaved device samples → mono downmix → resample to the
/// session rate (when the device rate differs) → fixed-size frame cut.
struct FrameAssembler {
    target: AudioParams,
    device_channels: u16,
    resampler: Option<FftFixedIn<f32>>,
    /// Mono samples at device rate, waiting for a full resampler chunk.
    pending_input: Vec<f32>,
    /// Mono samples at session rate, waiting for a full frame.
    pending_output: Vec<f32>,
}

impl FrameAssembler {
    fn new(
        device_rate: u32,
        device_channels: u16,
        target: AudioParams,
    ) -> Result<Self, AudioError> {
        let resampler = if device_rate == target.sample_rate {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    device_rate as usize,
                    target.sample_rate as usize,
                    RESAMPLE_CHUNK,
                    2, // sub-chunks for quality
                    1, // mono
                )
                .map_err(|e| AudioError::Resample(e.to_string()))?,
            )
        };

        Ok(Self {
            target,
            device_channels,
            resampler,
            pending_input: Vec::new(),
            pending_output: Vec::new(),
        })
    }

    /// Feed one device callback chunk; emits zero or more complete frames.
    fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(AudioFrame)) {
        // Downmix to mono by averaging channels.
        if self.device_channels > 1 {
            let channels = self.device_channels as usize;
            self.pending_input.extend(
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        } else {
            self.pending_input.extend_from_slice(interleaved);
        }

        // Resample in fixed chunks, or pass through at matching rates.
        if let Some(resampler) = self.resampler.as_mut() {
            while self.pending_input.len() >= RESAMPLE_CHUNK {
                let chunk: Vec<f32> = self.pending_input.drain(..RESAMPLE_CHUNK).collect();
                match resampler.process(&[&chunk], None) {
                    Ok(resampled) => {
                        if let Some(channel) = resampled.first() {
                            self.pending_output.extend_from_slice(channel);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Resampler failed, dropping chunk");
                    }
                }
            }
        } else {
            self.pending_output.append(&mut self.pending_input);
        }

        // Cut complete frames.
        let frame_size = self.target.frame_size();
        while self.pending_output.len() >= frame_size {
            let pcm: Vec<i16> = self
                .pending_output
                .drain(..frame_size)
                .map(|s| {
                    #[allow(clippy::cast_possible_truncation)]
                    let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
                    v
                })
                .collect();
            emit(AudioFrame::new(
                pcm,
                self.target.sample_rate,
                self.target.channels,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;

    #[test]
    fn assembler_passthrough_cuts_exact_frames() {
        let params = AudioParams::default(); // 960 samples / frame
        let mut assembler = FrameAssembler::new(16_000, 1, params).unwrap();

        let mut frames = Vec::new();
        // 2.5 frames worth of samples in odd-sized chunks
        let chunk = vec![0.25f32; 800];
        for _ in 0..3 {
            assembler.push(&chunk, |f| frames.push(f));
        }

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.pcm.len() == 960));
        assert!(frames.iter().all(|f| f.sample_rate == 16_000));
        // 0.25 scaled to i16
        assert_eq!(frames[0].pcm[0], (0.25f32 * 32767.0).round() as i16);
    }

    #[test]
    fn assembler_downmixes_stereo() {
        let params = AudioParams::default();
        let mut assembler = FrameAssembler::new(16_000, 2, params).unwrap();

        let mut frames = Vec::new();
        // Stereo pairs (0.5, -0.5) average to silence; 960 pairs = one frame
        let chunk: Vec<f32> = (0..1920)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assembler.push(&chunk, |f| frames.push(f));

        assert_eq!(frames.len(), 1);
        assert!(frames[0].pcm.iter().all(|&s| s == 0));
    }

    #[test]
    fn assembler_resamples_48k_to_16k() {
        let params = AudioParams::default();
        let mut assembler = FrameAssembler::new(48_000, 1, params).unwrap();

        let mut frames = Vec::new();
        // 48000 samples (1 s at 48 kHz) should yield roughly 16000 output
        // samples → 16 full frames of 960.
        let chunk = vec![0.1f32; 48_000];
        assembler.push(&chunk, |f| frames.push(f));

        assert!(
            (15..=17).contains(&frames.len()),
            "expected ~16 frames, got {}",
            frames.len()
        );
        assert!(frames.iter().all(|f| f.pcm.len() == 960));
    }

    #[test]
    fn hub_dispatch_reaches_subscribers_in_order() {
        let hub = CaptureHub::with_backend(Arc::new(NullCaptureBackend), Duration::from_secs(5));
        let (tx, rx) = std_mpsc::channel();
        let _sub = hub.subscribe(move |f| tx.send(f.pcm[0]).unwrap());

        for seq in 0..4 {
            hub.dispatch_frame(&AudioFrame::new(vec![seq; 4], 16_000, 1));
        }
        let received: Vec<i16> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(1)).unwrap())
            .collect();
        assert_eq!(received, vec![0, 1, 2, 3]);
    }

    #[test]
    fn matching_params_reuse_the_open_stream() {
        let hub = CaptureHub::with_backend(Arc::new(NullCaptureBackend), Duration::from_secs(5));
        let params = AudioParams::default();

        hub.start(params).unwrap();
        assert_eq!(hub.open_count(), 1);

        // Listening ↔ Speaking cycles call start repeatedly; the stream must
        // not be reopened.
        hub.start(params).unwrap();
        hub.start(params).unwrap();
        assert_eq!(hub.open_count(), 1);
        assert!(hub.is_running());
    }

    #[test]
    fn parameter_change_reopens_the_stream() {
        let hub = CaptureHub::with_backend(Arc::new(NullCaptureBackend), Duration::from_secs(5));
        hub.start(AudioParams::default()).unwrap();

        let changed = AudioParams {
            sample_rate: 24_000,
            ..AudioParams::default()
        };
        hub.start(changed).unwrap();
        assert_eq!(hub.open_count(), 2);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = CaptureHub::with_backend(Arc::new(NullCaptureBackend), Duration::from_secs(5));
        let sub = hub.subscribe(|_| {});
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn open_count_starts_at_zero_and_stop_without_stream_is_noop() {
        let hub = CaptureHub::with_backend(Arc::new(NullCaptureBackend), Duration::from_secs(5));
        assert_eq!(hub.open_count(), 0);
        assert!(!hub.is_running());
        assert!(hub.stop().is_ok());
    }
}
