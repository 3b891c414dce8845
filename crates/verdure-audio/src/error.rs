//! Audio pipeline error types.

use std::path::PathBuf;

/// Errors that can occur in the audio pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// No audio input device found.
    #[error("No audio input device found")]
    NoInputDevice,

    /// Failed to open or drive the audio input stream.
    #[error("Failed to open audio input stream: {0}")]
    InputStream(String),

    /// Failed to open or drive the audio output stream.
    #[error("Failed to open audio output stream: {0}")]
    OutputStream(String),

    /// The capture stream did not stop within the hard timeout; state was
    /// force-reset.
    #[error("Audio stream did not stop within {0:?}; state force-reset")]
    StreamStopTimeout(std::time::Duration),

    /// The device offers no sample format we can consume.
    #[error("Unsupported device sample format: {0}")]
    UnsupportedFormat(String),

    /// Encoder/decoder construction or encode failure.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Resampler failure.
    #[error("Audio resampling failed: {0}")]
    Resample(String),

    /// Keyword model file not found.
    #[error("Keyword model not found at {0}")]
    ModelNotFound(PathBuf),

    /// Keyword backend construction or recognition failure.
    #[error("Keyword backend error: {0}")]
    SpotterBackend(String),

    /// The spotter was disabled after repeated restart failures and needs an
    /// explicit restart.
    #[error("Keyword spotter is disabled after repeated failures")]
    SpotterDisabled,

    /// A dedicated audio thread exited unexpectedly.
    #[error("Audio thread died")]
    ThreadDied,
}
