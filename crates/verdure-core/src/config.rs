//! Client configuration.
//!
//! Pure domain type: how a config is obtained (file, flags, desktop shell)
//! is the caller's concern. Every timeout the pipeline uses is a field here
//! so deployments can tune them; the defaults are the values the protocol
//! was validated against.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AudioParams, ListeningMode};

/// Default WebSocket endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/xiaozhi/v1/";

/// Errors produced by [`ClientConfig::validate`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server_url must not be empty")]
    EmptyServerUrl,

    #[error("unsupported sample rate {0} (expected 16000 or 24000)")]
    UnsupportedSampleRate(u32),

    #[error("unsupported channel count {0} (expected 1)")]
    UnsupportedChannels(u16),

    #[error("keyword model path is set but empty")]
    EmptyKeywordModel,
}

/// Configuration consumed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct ClientConfig {
    /// Server endpoint (`ws://` / `wss://` for WebSocket, broker URL for MQTT).
    pub server_url: String,

    /// Use WebSocket transport; false selects MQTT.
    pub use_websocket: bool,

    /// Client identity advertised in transport headers.
    pub client_id: String,

    /// Stable device identity (typically a MAC address).
    pub device_id: String,

    /// Whether the audio pipeline (capture, spotter, playback) is enabled.
    pub enable_voice: bool,

    /// Preferred audio parameters advertised in the hello message.
    /// The server's reply is authoritative for the session.
    pub audio: AudioParams,

    /// Wire codec identifier advertised in the hello message.
    pub audio_format: String,

    /// Directory searched for keyword models.
    pub keyword_models_path: Option<String>,

    /// Selected keyword model name within `keyword_models_path`.
    pub current_keyword_model: Option<String>,

    /// Re-arm listening after each turn (`AutoStop` mode only).
    pub keep_listening: bool,

    /// Listening mode for new turns.
    pub listening_mode: ListeningMode,

    /// MQTT topic prefix (MQTT transport only).
    pub mqtt_topic_prefix: String,

    // ── Timeouts (defaults are the validated protocol values) ──────
    /// Max wait for the server hello after connecting.
    #[serde(with = "duration_ms")]
    pub hello_timeout: Duration,

    /// Max wait for an MCP response before the pending request is rejected.
    #[serde(with = "duration_ms")]
    pub mcp_request_timeout: Duration,

    /// Hard ceiling on stopping the capture stream before state is
    /// force-reset.
    #[serde(with = "duration_ms")]
    pub stream_stop_timeout: Duration,

    /// Playback idle window after which end-of-stream is declared.
    #[serde(with = "duration_ms")]
    pub playback_eos_idle: Duration,

    /// Transport read idle ceiling before the connection is recycled.
    #[serde(with = "duration_ms")]
    pub read_idle_timeout: Duration,

    /// Required gap between disposing and re-creating the keyword recognizer.
    #[serde(with = "duration_ms")]
    pub spotter_recreate_gap: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            use_websocket: true,
            client_id: String::new(),
            device_id: String::new(),
            enable_voice: true,
            audio: AudioParams::default(),
            audio_format: "opus".to_string(),
            keyword_models_path: None,
            current_keyword_model: None,
            keep_listening: false,
            listening_mode: ListeningMode::AutoStop,
            mqtt_topic_prefix: "verdure".to_string(),
            hello_timeout: Duration::from_secs(5),
            mcp_request_timeout: Duration::from_secs(10),
            stream_stop_timeout: Duration::from_secs(5),
            playback_eos_idle: Duration::from_millis(1500),
            read_idle_timeout: Duration::from_secs(30),
            spotter_recreate_gap: Duration::from_millis(200),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::EmptyServerUrl);
        }
        if !matches!(self.audio.sample_rate, 16_000 | 24_000) {
            return Err(ConfigError::UnsupportedSampleRate(self.audio.sample_rate));
        }
        if self.audio.channels != 1 {
            return Err(ConfigError::UnsupportedChannels(self.audio.channels));
        }
        if let Some(model) = &self.current_keyword_model {
            if model.trim().is_empty() {
                return Err(ConfigError::EmptyKeywordModel);
            }
        }
        Ok(())
    }

    /// Whether keyword spotting is configured.
    #[must_use]
    pub fn keyword_spotting_enabled(&self) -> bool {
        self.enable_voice && self.current_keyword_model.is_some()
    }
}

/// Serde helper: durations as integer milliseconds on the wire.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_values() {
        let config = ClientConfig::default();
        assert_eq!(config.hello_timeout, Duration::from_secs(5));
        assert_eq!(config.mcp_request_timeout, Duration::from_secs(10));
        assert_eq!(config.playback_eos_idle, Duration::from_millis(1500));
        assert_eq!(config.spotter_recreate_gap, Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_stereo() {
        let mut config = ClientConfig::default();
        config.audio.channels = 2;
        assert_eq!(config.validate(), Err(ConfigError::UnsupportedChannels(2)));
    }

    #[test]
    fn rejects_odd_sample_rate() {
        let mut config = ClientConfig::default();
        config.audio.sample_rate = 44_100;
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsupportedSampleRate(44_100))
        );
    }

    #[test]
    fn timeouts_round_trip_as_millis() {
        let config = ClientConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["hello_timeout"], 5000);

        let back: ClientConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"server_url":"wss://example.test/v1/"}"#).unwrap();
        assert_eq!(config.server_url, "wss://example.test/v1/");
        assert!(config.use_websocket);
        assert_eq!(config.audio.sample_rate, 16_000);
    }
}
