//! Audio frame and stream-parameter types shared across the pipeline.

use serde::{Deserialize, Serialize};

/// Upper bound for one encoded packet, in bytes.
pub const MAX_ENCODED_PACKET_BYTES: usize = 4000;

/// Stream parameters negotiated in the hello exchange.
///
/// The client advertises its preferred parameters; the server's hello reply
/// is authoritative for the session. All frames in a session share the same
/// `(sample_rate, channels)` — a change forces pipeline re-initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioParams {
    /// Samples per second. 16000 or 24000.
    pub sample_rate: u32,

    /// Channel count. Always 1 for speech.
    pub channels: u16,

    /// Frame duration in milliseconds. Fixed at 60.
    pub frame_duration_ms: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            frame_duration_ms: 60,
        }
    }
}

impl AudioParams {
    /// Samples per channel in one frame (`sample_rate × duration / 1000`).
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        (self.sample_rate as usize) * (self.frame_duration_ms as usize) / 1000
    }

    /// Total samples in one interleaved frame (`frame_size × channels`).
    #[must_use]
    pub const fn samples_per_frame(&self) -> usize {
        self.frame_size() * self.channels as usize
    }

    /// Whether `other` can reuse a stream opened with these parameters.
    #[must_use]
    pub const fn is_compatible(&self, other: &Self) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }
}

/// One fixed-duration block of PCM samples from the capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Interleaved 16-bit PCM, `frame_size × channels` samples.
    pub pcm: Vec<i16>,

    /// Samples per second.
    pub sample_rate: u32,

    /// Channel count.
    pub channels: u16,

    /// Capture timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AudioFrame {
    /// Create a frame stamped with the current time.
    #[must_use]
    pub fn new(pcm: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            pcm,
            sample_rate,
            channels,
            timestamp: chrono::Utc::now(),
        }
    }

    /// A frame of silence matching `params`.
    #[must_use]
    pub fn silence(params: &AudioParams) -> Self {
        Self::new(
            vec![0; params.samples_per_frame()],
            params.sample_rate,
            params.channels,
        )
    }

    /// Frame duration in milliseconds, derived from the sample count.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        (self.pcm.len() as u64 * 1000) / (u64::from(self.sample_rate) * u64::from(self.channels))
    }
}
