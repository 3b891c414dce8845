//! sherpa-onnx keyword-spotting backend (feature `sherpa`).
//!
//! Loads a zipformer keyword model bundle from a directory containing
//! `encoder.onnx`, `decoder.onnx`, `joiner.onnx`, `tokens.txt`, and
//! `keywords.txt`. Every [`create`](KeywordBackendFactory::create) builds a
//! brand-new spotter over freshly opened model files, which is exactly what
//! the recreate-on-restart discipline requires.

use std::path::Path;

use sherpa_rs::keyword_spot::{KeywordSpot, KeywordSpotConfig};

use crate::error::AudioError;
use crate::spotter::{KeywordBackend, KeywordBackendFactory, KeywordDetection};

/// Factory producing sherpa-onnx keyword spotters.
#[derive(Debug, Clone, Default)]
pub struct SherpaKeywordFactory {
    /// Detection threshold (default 0.25, sherpa's recommended value).
    pub threshold: f32,
    /// Keyword boosting score.
    pub score: f32,
}

impl SherpaKeywordFactory {
    #[must_use]
    pub const fn new(threshold: f32, score: f32) -> Self {
        Self { threshold, score }
    }
}

impl KeywordBackendFactory for SherpaKeywordFactory {
    fn create(&self, model_path: &Path) -> Result<Box<dyn KeywordBackend>, AudioError> {
        if !model_path.exists() {
            return Err(AudioError::ModelNotFound(model_path.to_path_buf()));
        }

        let file = |name: &str| model_path.join(name).to_string_lossy().into_owned();

        let config = KeywordSpotConfig {
            zipformer_encoder: file("encoder.onnx"),
            zipformer_decoder: file("decoder.onnx"),
            zipformer_joiner: file("joiner.onnx"),
            tokens: file("tokens.txt"),
            keywords: file("keywords.txt"),
            keywords_threshold: if self.threshold > 0.0 {
                self.threshold
            } else {
                0.25
            },
            keywords_score: if self.score > 0.0 { self.score } else { 1.5 },
            ..Default::default()
        };

        let spotter = KeywordSpot::new(config)
            .map_err(|e| AudioError::SpotterBackend(format!("sherpa init: {e}")))?;

        let model = model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "keyword-model".to_string());

        tracing::info!(model = %model, "sherpa keyword spotter created");
        Ok(Box::new(SherpaKeywordBackend { spotter, model }))
    }
}

struct SherpaKeywordBackend {
    spotter: KeywordSpot,
    model: String,
}

impl KeywordBackend for SherpaKeywordBackend {
    fn process(&mut self, pcm: &[i16]) -> Result<Option<KeywordDetection>, AudioError> {
        let samples: Vec<f32> = pcm.iter().map(|&s| f32::from(s) / 32768.0).collect();

        let keyword = self
            .spotter
            .extract_keyword(samples, 16_000)
            .map_err(|e| AudioError::SpotterBackend(format!("sherpa decode: {e}")))?;

        Ok(keyword.map(|keyword| KeywordDetection {
            keyword,
            // sherpa does not report a per-detection score; anything past
            // the configured threshold is a firm hit.
            confidence: 1.0,
            model: self.model.clone(),
        }))
    }

    fn reset(&mut self) -> Result<(), AudioError> {
        // extract_keyword resets the internal stream after each hit; there
        // is no separate re-arm call to fail.
        Ok(())
    }
}
