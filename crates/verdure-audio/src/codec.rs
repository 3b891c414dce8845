//! Opus encode/decode for 60 ms speech frames.
//!
//! The encoder/decoder pair is keyed by `(sample_rate, channels,
//! application)`. Parameter changes dispose and rebuild both ends — opus
//! state must never be reused across a rate change.

use opus::{Application, Channels, Decoder, Encoder};

use verdure_core::domain::{AudioParams, MAX_ENCODED_PACKET_BYTES};

use crate::error::AudioError;

/// Encoder tuning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecApplication {
    /// Optimised for speech.
    #[default]
    Voip,
    /// Optimised for general audio.
    Audio,
}

impl From<CodecApplication> for Application {
    fn from(app: CodecApplication) -> Self {
        match app {
            CodecApplication::Voip => Self::Voip,
            CodecApplication::Audio => Self::Audio,
        }
    }
}

/// Stateful opus encoder/decoder pair for one parameter set.
pub struct OpusCodec {
    encoder: Encoder,
    decoder: Decoder,
    params: AudioParams,
    application: CodecApplication,
    /// Input-length mismatches are logged once per session, not per frame.
    warned_size: bool,
}

impl OpusCodec {
    /// Build a codec for the given parameters.
    pub fn new(params: AudioParams, application: CodecApplication) -> Result<Self, AudioError> {
        let channels = match params.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            n => return Err(AudioError::Codec(format!("unsupported channel count {n}"))),
        };

        let encoder = Encoder::new(params.sample_rate, channels, application.into())
            .map_err(|e| AudioError::Codec(format!("encoder init: {e}")))?;
        let decoder = Decoder::new(params.sample_rate, channels)
            .map_err(|e| AudioError::Codec(format!("decoder init: {e}")))?;

        tracing::debug!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            ?application,
            "Opus codec initialized"
        );

        Ok(Self {
            encoder,
            decoder,
            params,
            application,
            warned_size: false,
        })
    }

    /// Current codec parameters.
    #[must_use]
    pub const fn params(&self) -> &AudioParams {
        &self.params
    }

    /// Rebuild the codec if `params` are not compatible with the current
    /// stream. Opus internal state is never carried across a change.
    pub fn ensure_params(&mut self, params: AudioParams) -> Result<(), AudioError> {
        if self.params.is_compatible(&params) {
            self.params = params;
            return Ok(());
        }
        tracing::info!(
            old_rate = self.params.sample_rate,
            new_rate = params.sample_rate,
            "Codec parameters changed, rebuilding encoder/decoder"
        );
        *self = Self::new(params, self.application)?;
        Ok(())
    }

    /// Encode one PCM frame into an opus packet (≤ 4000 bytes).
    ///
    /// Undersized input is zero-padded and oversized input truncated to the
    /// frame length; either case is logged once per session.
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError> {
        let expected = self.params.samples_per_frame();

        let packet = if pcm.len() == expected {
            self.encode_exact(pcm)?
        } else {
            if !self.warned_size {
                self.warned_size = true;
                tracing::warn!(
                    got = pcm.len(),
                    expected,
                    "PCM frame length mismatch; padding/truncating (logged once per session)"
                );
            }
            let mut adjusted = pcm.to_vec();
            adjusted.resize(expected, 0);
            self.encode_exact(&adjusted)?
        };

        Ok(packet)
    }

    fn encode_exact(&mut self, pcm: &[i16]) -> Result<Vec<u8>, AudioError> {
        let mut buffer = vec![0u8; MAX_ENCODED_PACKET_BYTES];
        let written = self
            .encoder
            .encode(pcm, &mut buffer)
            .map_err(|e| AudioError::Codec(format!("encode: {e}")))?;
        buffer.truncate(written);
        Ok(buffer)
    }

    /// Decode one packet into a PCM frame.
    ///
    /// A malformed packet never fails: it decodes to a silence frame so the
    /// playback path stays continuous.
    pub fn decode(&mut self, packet: &[u8]) -> Vec<i16> {
        let expected = self.params.samples_per_frame();
        let mut pcm = vec![0i16; expected];

        match self.decoder.decode(packet, &mut pcm, false) {
            Ok(samples) => {
                pcm.truncate(samples * self.params.channels as usize);
                // Short decodes are padded back to a full frame.
                pcm.resize(expected, 0);
                pcm
            }
            Err(e) => {
                tracing::warn!(error = %e, packet_len = packet.len(), "Opus decode failed, emitting silence");
                vec![0i16; expected]
            }
        }
    }
}
