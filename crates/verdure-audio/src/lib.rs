//! Shared audio pipeline for the verdure voice client.
//!
//! One physical capture stream fans out to any number of subscribers (the
//! codec path and the keyword spotter); playback runs a bounded frame queue
//! in front of the output device. `cpal` and `rodio` types are `!Send` on
//! some platforms, so both are confined to dedicated OS threads and the rest
//! of the system talks to them through handles.

pub mod capture;
pub mod codec;
pub mod error;
pub mod fanout;
pub mod playback;
pub mod sink;
pub mod spotter;
pub mod vad;

#[cfg(feature = "sherpa")]
pub mod spotter_sherpa;

pub use capture::{
    CaptureBackend, CaptureHub, CaptureStream, CpalCaptureBackend, FrameSink, NullCaptureBackend,
    Subscription,
};
pub use codec::{CodecApplication, OpusCodec};
pub use error::AudioError;
pub use playback::{Playback, PlaybackConfig, PlaybackEvent};
pub use sink::{AudioSink, NullSink, RodioSink};
pub use spotter::{
    KeywordBackend, KeywordBackendFactory, KeywordDetection, KeywordSpotter, SpotterEvent,
};
pub use vad::{EnergyVad, VadConfig, VadEvent};
