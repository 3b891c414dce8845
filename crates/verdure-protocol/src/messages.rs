//! Typed envelope variants and their parse/serialize entry points.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use verdure_core::domain::{AbortReason, AudioParams, ListeningMode};
use verdure_core::events::TtsState;

use crate::error::ProtocolError;

/// Protocol version announced in the client hello.
pub const PROTOCOL_VERSION: u32 = 1;

/// Envelope `type` values this client understands.
const KNOWN_TYPES: &[&str] = &[
    "hello", "listen", "abort", "stt", "tts", "llm", "music", "iot", "mcp", "goodbye",
];

// ── Envelope ───────────────────────────────────────────────────────

/// The outermost message on the text channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Handshake / capability exchange (both directions).
    Hello(HelloMessage),

    /// Listening-turn lifecycle (client → server).
    Listen(ListenMessage),

    /// Interrupt server-side synthesis (client → server).
    Abort(AbortMessage),

    /// Server's recognition of the user's speech.
    Stt {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Server TTS lifecycle.
    Tts(TtsMessage),

    /// Language-model reply text.
    Llm(LlmMessage),

    /// Song metadata, lyric timing, playback status.
    Music(MusicMessage),

    /// Legacy device status/command channel (superseded by MCP).
    Iot(IotMessage),

    /// MCP sub-protocol payload (JSON-RPC 2.0, both directions).
    Mcp(McpEnvelope),

    /// Server ends the session.
    Goodbye {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl Envelope {
    /// Serialize to the wire representation.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialize(e.to_string()))
    }

    /// Build the client hello advertising MCP support and audio parameters.
    #[must_use]
    pub fn client_hello(audio: &AudioParams, format: &str) -> Self {
        Self::Hello(HelloMessage {
            version: Some(PROTOCOL_VERSION),
            transport: Some("websocket".to_string()),
            audio_params: Some(WireAudioParams {
                format: Some(format.to_string()),
                sample_rate: Some(audio.sample_rate),
                channels: Some(audio.channels),
                frame_duration: Some(audio.frame_duration_ms),
            }),
            features: Some(FeatureFlags {
                mcp: true,
                extra: serde_json::Map::new(),
            }),
            session_id: None,
        })
    }

    /// Build a `listen` message for the given turn phase.
    #[must_use]
    pub fn listen(
        session_id: Option<String>,
        state: ListenState,
        mode: Option<ListeningMode>,
        text: Option<String>,
    ) -> Self {
        Self::Listen(ListenMessage {
            session_id,
            state,
            mode: mode.map(ListenMode::from),
            text,
        })
    }

    /// Build an `abort` message.
    #[must_use]
    pub fn abort(session_id: Option<String>, reason: AbortReason) -> Self {
        Self::Abort(AbortMessage {
            session_id,
            reason: reason.wire_name().to_string(),
        })
    }

    /// Build an `mcp` envelope wrapping a JSON-RPC payload.
    #[must_use]
    pub const fn mcp(session_id: Option<String>, payload: Value) -> Self {
        Self::Mcp(McpEnvelope {
            session_id,
            payload,
        })
    }
}

/// Parse a text frame into an [`Envelope`].
///
/// Unknown `type` values are a distinct error variant so the dispatcher can
/// log-and-ignore them without conflating them with malformed messages.
pub fn parse_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(ProtocolError::UnknownType(kind));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
        kind,
        detail: e.to_string(),
    })
}

// ── Hello ──────────────────────────────────────────────────────────

/// Audio parameters as they appear on the wire.
///
/// Every field is optional on parse — the server reply may carry any subset,
/// and absent fields fall back to the client's advertised values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WireAudioParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_duration: Option<u32>,
}

impl WireAudioParams {
    /// Resolve against the client's advertised parameters: any field the
    /// server specified wins; the rest keep the client values.
    #[must_use]
    pub fn resolve_against(&self, advertised: &AudioParams) -> AudioParams {
        AudioParams {
            sample_rate: self.sample_rate.unwrap_or(advertised.sample_rate),
            channels: self.channels.unwrap_or(advertised.channels),
            frame_duration_ms: self.frame_duration.unwrap_or(advertised.frame_duration_ms),
        }
    }
}

/// Feature flags exchanged in the hello.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FeatureFlags {
    #[serde(default)]
    pub mcp: bool,

    /// Flags we don't interpret are carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Handshake message (both directions).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HelloMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_params: Option<WireAudioParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureFlags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl HelloMessage {
    /// Whether the peer advertised MCP support.
    #[must_use]
    pub fn supports_mcp(&self) -> bool {
        self.features.as_ref().is_some_and(|f| f.mcp)
    }
}

// ── Listen ─────────────────────────────────────────────────────────

/// Phase of a listening turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenState {
    Start,
    Stop,
    /// Wake-word report: carries the detected text before the turn opens.
    Detect,
}

/// Listening mode as spelled on the wire (`auto`, not `auto_stop`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    Auto,
    Manual,
    AlwaysOn,
}

impl From<ListeningMode> for ListenMode {
    fn from(mode: ListeningMode) -> Self {
        match mode {
            ListeningMode::AutoStop => Self::Auto,
            ListeningMode::Manual => Self::Manual,
            ListeningMode::AlwaysOn => Self::AlwaysOn,
        }
    }
}

/// Listening-turn lifecycle message (client → server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub state: ListenState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ListenMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// ── Abort ──────────────────────────────────────────────────────────

/// Interrupt message (client → server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub reason: String,
}

// ── Tts / Llm / Music ──────────────────────────────────────────────

/// Server TTS lifecycle message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub state: TtsState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Language-model reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LlmMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Music playback status from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MusicMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyric: Option<String>,
    /// Playback position in seconds, for lyric alignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    /// Song duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

// ── Iot / Mcp ──────────────────────────────────────────────────────

/// Legacy device channel. Payload shapes are not interpreted beyond routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IotMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptors: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<Value>>,
}

/// MCP envelope: the JSON-RPC payload is opaque at this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_hello_matches_wire_shape() {
        let hello = Envelope::client_hello(&AudioParams::default(), "opus");
        let value: Value = serde_json::from_str(&hello.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "hello");
        assert_eq!(value["version"], 1);
        assert_eq!(value["transport"], "websocket");
        assert_eq!(value["audio_params"]["format"], "opus");
        assert_eq!(value["audio_params"]["sample_rate"], 16_000);
        assert_eq!(value["audio_params"]["channels"], 1);
        assert_eq!(value["audio_params"]["frame_duration"], 60);
        assert_eq!(value["features"]["mcp"], true);
    }

    #[test]
    fn parses_server_hello_with_session() {
        let text = r#"{"type":"hello","transport":"websocket","session_id":"abc123",
                       "audio_params":{"sample_rate":24000,"frame_duration":60}}"#;
        let envelope = parse_envelope(text).unwrap();
        let Envelope::Hello(hello) = envelope else {
            panic!("expected hello, got {envelope:?}");
        };
        assert_eq!(hello.session_id.as_deref(), Some("abc123"));

        let resolved = hello
            .audio_params
            .unwrap()
            .resolve_against(&AudioParams::default());
        assert_eq!(resolved.sample_rate, 24_000);
        assert_eq!(resolved.channels, 1);
    }

    #[test]
    fn hello_without_features_has_no_mcp() {
        let text = r#"{"type":"hello","transport":"websocket","features":{}}"#;
        let Envelope::Hello(hello) = parse_envelope(text).unwrap() else {
            panic!("expected hello");
        };
        assert!(!hello.supports_mcp());
    }

    #[test]
    fn listen_start_matches_wire_shape() {
        let listen = Envelope::listen(
            Some("sid".to_string()),
            ListenState::Start,
            Some(ListeningMode::AutoStop),
            None,
        );
        let value: Value = serde_json::from_str(&listen.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type":"listen","session_id":"sid","state":"start","mode":"auto"})
        );
    }

    #[test]
    fn listen_detect_carries_keyword() {
        let listen = Envelope::listen(
            Some("sid".to_string()),
            ListenState::Detect,
            None,
            Some("verdure".to_string()),
        );
        let value: Value = serde_json::from_str(&listen.to_json().unwrap()).unwrap();
        assert_eq!(value["state"], "detect");
        assert_eq!(value["text"], "verdure");
    }

    #[test]
    fn abort_uses_wire_reason() {
        let abort = Envelope::abort(Some("sid".to_string()), AbortReason::WakeWordDetected);
        let value: Value = serde_json::from_str(&abort.to_json().unwrap()).unwrap();
        assert_eq!(value["reason"], "wake_word_detected");
    }

    #[test]
    fn parses_tts_states() {
        for (wire, expected) in [
            ("start", TtsState::Start),
            ("stop", TtsState::Stop),
            ("sentence_start", TtsState::SentenceStart),
            ("sentence_end", TtsState::SentenceEnd),
        ] {
            let text = format!(r#"{{"type":"tts","state":"{wire}"}}"#);
            let Envelope::Tts(tts) = parse_envelope(&text).unwrap() else {
                panic!("expected tts");
            };
            assert_eq!(tts.state, expected);
        }
    }

    #[test]
    fn parses_llm_with_emotion() {
        let text = r#"{"type":"llm","text":"hello there","emotion":"happy"}"#;
        let Envelope::Llm(llm) = parse_envelope(text).unwrap() else {
            panic!("expected llm");
        };
        assert_eq!(llm.text.as_deref(), Some("hello there"));
        assert_eq!(llm.emotion.as_deref(), Some("happy"));
    }

    #[test]
    fn unknown_type_is_distinct_error() {
        let err = parse_envelope(r#"{"type":"telemetry","data":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(t) if t == "telemetry"));
    }

    #[test]
    fn missing_type_is_reported() {
        let err = parse_envelope(r#"{"state":"start"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingType));
    }

    #[test]
    fn missing_required_field_is_malformed_not_unknown() {
        // `listen` requires `state`
        let err = parse_envelope(r#"{"type":"listen","session_id":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { kind, .. } if kind == "listen"));
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = parse_envelope("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn mcp_envelope_round_trips_payload() {
        let payload = json!({"jsonrpc":"2.0","method":"tools/list","id":3});
        let envelope = Envelope::mcp(Some("sid".to_string()), payload.clone());
        let text = envelope.to_json().unwrap();
        let Envelope::Mcp(parsed) = parse_envelope(&text).unwrap() else {
            panic!("expected mcp");
        };
        assert_eq!(parsed.payload, payload);
        assert_eq!(parsed.session_id.as_deref(), Some("sid"));
    }

    #[test]
    fn goodbye_parses_without_session() {
        let envelope = parse_envelope(r#"{"type":"goodbye"}"#).unwrap();
        assert!(matches!(envelope, Envelope::Goodbye { session_id: None }));
    }
}
