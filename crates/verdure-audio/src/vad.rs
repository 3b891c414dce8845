//! Voice activity detection — barge-in while the assistant is speaking.
//!
//! RMS energy thresholding over capture frames. The detector is armed only
//! while server speech is playing; sustained user speech then counts as a
//! voice interruption. This is deliberately not speech recognition — it
//! answers one question: is the user talking over the assistant?

/// Barge-in detector configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VadConfig {
    /// Detection sensitivity (0.0–1.0, default 0.5).
    ///
    /// Higher values require more energy before speech is assumed; lower
    /// values are more sensitive (may trigger on playback bleed or noise).
    pub threshold: f32,

    /// Minimum sustained speech (ms) before an interruption fires
    /// (default 300).
    ///
    /// Filters out coughs, clicks, and stray playback echo.
    pub min_speech_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_speech_duration_ms: 300,
        }
    }
}

/// Events produced by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Sustained speech crossed the duration threshold.
    SpeechStart,
}

/// Energy-based voice activity detector.
pub struct EnergyVad {
    config: VadConfig,
    sample_rate: u32,
    /// Accumulated milliseconds of consecutive speech-energy frames.
    speech_ms: u32,
    /// Set after `SpeechStart` fired; cleared by [`reset`](Self::reset).
    triggered: bool,
}

impl EnergyVad {
    #[must_use]
    pub const fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            speech_ms: 0,
            triggered: false,
        }
    }

    /// Feed one PCM frame; returns `SpeechStart` once per speech run.
    pub fn process(&mut self, pcm: &[i16]) -> Option<VadEvent> {
        if pcm.is_empty() || self.sample_rate == 0 {
            return None;
        }

        let energy = rms_energy(pcm);
        let is_speech = energy > energy_threshold(self.config.threshold);

        #[allow(clippy::cast_possible_truncation)]
        let frame_ms = (pcm.len() as u64 * 1000 / u64::from(self.sample_rate)) as u32;

        if is_speech {
            self.speech_ms = self.speech_ms.saturating_add(frame_ms);
            if !self.triggered && self.speech_ms >= self.config.min_speech_duration_ms {
                self.triggered = true;
                tracing::debug!(energy, sustained_ms = self.speech_ms, "Barge-in detected");
                return Some(VadEvent::SpeechStart);
            }
        } else {
            // Silence interrupts the run before the threshold: start over.
            if !self.triggered {
                self.speech_ms = 0;
            }
        }

        None
    }

    /// Clear accumulated state; the next speech run can trigger again.
    pub const fn reset(&mut self) {
        self.speech_ms = 0;
        self.triggered = false;
    }

    /// Whether the current run already fired.
    #[must_use]
    pub const fn is_triggered(&self) -> bool {
        self.triggered
    }
}

/// RMS energy of a normalized i16 frame (0.0–1.0).
fn rms_energy(pcm: &[i16]) -> f32 {
    if pcm.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = pcm
        .iter()
        .map(|&s| {
            let normalized = f32::from(s) / 32768.0;
            normalized * normalized
        })
        .sum();

    #[allow(clippy::cast_precision_loss)]
    let mean = sum_squares / pcm.len() as f32;

    mean.sqrt()
}

/// Map the sensitivity knob (0.0–1.0) to an RMS energy threshold.
///
/// Lower knob → more sensitive (lower energy threshold).
fn energy_threshold(threshold: f32) -> f32 {
    // Map [0.0, 1.0] → [0.001, 0.05] RMS energy range;
    // ~0.01 is a reasonable level for normal speech.
    let min_energy: f32 = 0.001;
    let max_energy: f32 = 0.05;
    (max_energy - min_energy).mul_add(threshold, min_energy)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 60 ms frame (960 samples at 16 kHz) at the given amplitude.
    fn frame(amplitude: i16) -> Vec<i16> {
        vec![amplitude; 960]
    }

    fn vad() -> EnergyVad {
        EnergyVad::new(VadConfig::default(), 16_000)
    }

    #[test]
    fn silence_never_triggers() {
        let mut vad = vad();
        for _ in 0..100 {
            assert_eq!(vad.process(&frame(0)), None);
        }
    }

    #[test]
    fn sustained_speech_triggers_once() {
        let mut vad = vad();
        // 300 ms of loud speech = five 60 ms frames.
        let mut events = Vec::new();
        for _ in 0..10 {
            if let Some(event) = vad.process(&frame(16_000)) {
                events.push(event);
            }
        }
        assert_eq!(events, vec![VadEvent::SpeechStart]);
        assert!(vad.is_triggered());
    }

    #[test]
    fn brief_noise_is_filtered() {
        let mut vad = vad();
        // Two loud frames (120 ms) then silence: under the 300 ms floor.
        assert_eq!(vad.process(&frame(16_000)), None);
        assert_eq!(vad.process(&frame(16_000)), None);
        assert_eq!(vad.process(&frame(0)), None);
        // The run restarts; two more loud frames still do not trigger.
        assert_eq!(vad.process(&frame(16_000)), None);
        assert_eq!(vad.process(&frame(16_000)), None);
    }

    #[test]
    fn reset_rearms_the_detector() {
        let mut vad = vad();
        for _ in 0..6 {
            vad.process(&frame(16_000));
        }
        assert!(vad.is_triggered());

        vad.reset();
        assert!(!vad.is_triggered());

        let mut fired = false;
        for _ in 0..6 {
            if vad.process(&frame(16_000)).is_some() {
                fired = true;
            }
        }
        assert!(fired, "detector must fire again after reset");
    }

    #[test]
    fn rms_energy_is_normalized() {
        assert!((rms_energy(&frame(0)) - 0.0).abs() < f32::EPSILON);
        let full = rms_energy(&frame(i16::MAX));
        assert!(full > 0.99 && full <= 1.0);
    }

    #[test]
    fn sensitivity_maps_monotonically() {
        assert!(energy_threshold(0.0) < energy_threshold(0.5));
        assert!(energy_threshold(0.5) < energy_threshold(1.0));
    }
}
