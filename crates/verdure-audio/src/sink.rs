//! `AudioSink` trait and the rodio-backed implementation.
//!
//! The trait decouples the playback queue from any concrete output backend,
//! so tests drive the queue with a recording mock. `rodio::OutputStream` is
//! `!Send` on some platforms, so the real implementation confines it to a
//! dedicated OS thread and proxies every call through a command channel.

use std::sync::mpsc;
use std::thread;

use rodio::{OutputStream, Sink};

use crate::error::AudioError;

/// Abstraction over an audio output device.
///
/// Object-safe: all methods take `&self`; implementations use interior
/// mutability (channels, atomics) for state changes.
pub trait AudioSink: Send + Sync {
    /// Queue one PCM frame for playback.
    fn append(&self, pcm: Vec<i16>, sample_rate: u32, channels: u16) -> Result<(), AudioError>;

    /// Stop playback and discard everything queued in the device.
    fn clear(&self);

    /// Frames queued in the device and not yet played.
    fn queued_frames(&self) -> usize;

    /// Whether audio is currently audible.
    fn is_playing(&self) -> bool;

    /// Set output volume (0.0 – 1.0).
    fn set_volume(&self, volume: f32);
}

/// A sink that discards audio. Used in headless deployments with no output
/// device and in tests.
#[derive(Debug, Clone, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn append(&self, _pcm: Vec<i16>, _sample_rate: u32, _channels: u16) -> Result<(), AudioError> {
        Ok(())
    }

    fn clear(&self) {}

    fn queued_frames(&self) -> usize {
        0
    }

    fn is_playing(&self) -> bool {
        false
    }

    fn set_volume(&self, _volume: f32) {}
}

// ── Rodio implementation ───────────────────────────────────────────

enum SinkCommand {
    Append {
        pcm: Vec<i16>,
        sample_rate: u32,
        channels: u16,
        reply: mpsc::Sender<Result<(), AudioError>>,
    },
    Clear,
    QueuedFrames {
        reply: mpsc::Sender<usize>,
    },
    IsPlaying {
        reply: mpsc::Sender<bool>,
    },
    SetVolume(f32),
    Shutdown,
}

/// `Send + Sync` handle to the dedicated playback thread.
pub struct RodioSink {
    cmd_tx: mpsc::Sender<SinkCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioSink {
    /// Spawn the playback thread and open the default output device.
    ///
    /// Device-open errors propagate back through a one-shot init channel.
    pub fn new() -> Result<Self, AudioError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<SinkCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), AudioError>>();

        let thread = thread::Builder::new()
            .name("verdure-playback".into())
            .spawn(move || Self::run(&cmd_rx, &init_tx))
            .map_err(|e| AudioError::OutputStream(format!("failed to spawn playback thread: {e}")))?;

        init_rx.recv().map_err(|_| AudioError::ThreadDied)??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    /// Playback thread body: owns the `OutputStream` and `Sink` for their
    /// entire lifetime — they never cross thread boundaries.
    fn run(cmd_rx: &mpsc::Receiver<SinkCommand>, init_tx: &mpsc::Sender<Result<(), AudioError>>) {
        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                let _ = init_tx.send(Err(AudioError::OutputStream(e.to_string())));
                return;
            }
        };

        let sink = match Sink::try_new(&handle) {
            Ok(sink) => sink,
            Err(e) => {
                let _ = init_tx.send(Err(AudioError::OutputStream(e.to_string())));
                return;
            }
        };

        tracing::info!("Playback initialized on default output device");
        let _ = init_tx.send(Ok(()));

        let mut sink = sink;
        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                SinkCommand::Append {
                    pcm,
                    sample_rate,
                    channels,
                    reply,
                } => {
                    let source = rodio::buffer::SamplesBuffer::new(channels, sample_rate, pcm);
                    sink.append(source);
                    let _ = reply.send(Ok(()));
                }
                SinkCommand::Clear => {
                    // rodio has no drain-and-keep; a stopped sink stays dead,
                    // so replace it.
                    sink.stop();
                    if let Ok(fresh) = Sink::try_new(&handle) {
                        sink = fresh;
                    }
                }
                SinkCommand::QueuedFrames { reply } => {
                    let _ = reply.send(sink.len());
                }
                SinkCommand::IsPlaying { reply } => {
                    let _ = reply.send(!sink.empty());
                }
                SinkCommand::SetVolume(volume) => {
                    sink.set_volume(volume.clamp(0.0, 1.0));
                }
                SinkCommand::Shutdown => break,
            }
        }

        drop(stream);
        tracing::debug!("Playback thread shutting down");
    }

    fn query<T>(&self, build: impl FnOnce(mpsc::Sender<T>) -> SinkCommand) -> Option<T> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx.send(build(tx)).ok()?;
        rx.recv().ok()
    }
}

impl AudioSink for RodioSink {
    fn append(&self, pcm: Vec<i16>, sample_rate: u32, channels: u16) -> Result<(), AudioError> {
        let (reply, rx) = mpsc::channel();
        self.cmd_tx
            .send(SinkCommand::Append {
                pcm,
                sample_rate,
                channels,
                reply,
            })
            .map_err(|_| AudioError::ThreadDied)?;
        rx.recv().map_err(|_| AudioError::ThreadDied)?
    }

    fn clear(&self) {
        let _ = self.cmd_tx.send(SinkCommand::Clear);
    }

    fn queued_frames(&self) -> usize {
        self.query(|reply| SinkCommand::QueuedFrames { reply })
            .unwrap_or(0)
    }

    fn is_playing(&self) -> bool {
        self.query(|reply| SinkCommand::IsPlaying { reply })
            .unwrap_or(false)
    }

    fn set_volume(&self, volume: f32) {
        let _ = self.cmd_tx.send(SinkCommand::SetVolume(volume));
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SinkCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
