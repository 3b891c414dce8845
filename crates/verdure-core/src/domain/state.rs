//! Conversation state, triggers, and the shared context snapshot.

use serde::{Deserialize, Serialize};

/// Current state of the conversation.
///
/// Exactly one state is current at any time; the state machine in
/// `verdure-client` is the single writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// No conversation in progress.
    #[default]
    Idle,

    /// Transport is (re)establishing the server connection.
    Connecting,

    /// Microphone is open and frames are streaming to the server.
    Listening,

    /// Server speech is being played back.
    Speaking,
}

impl DeviceState {
    /// All states, in declaration order. Used by exhaustive table tests.
    pub const ALL: [Self; 4] = [Self::Idle, Self::Connecting, Self::Listening, Self::Speaking];
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Speaking => "speaking",
        };
        f.write_str(s)
    }
}

/// How a listening turn terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListeningMode {
    /// Never leave Listening when TTS starts; capture keeps streaming.
    AlwaysOn,

    /// Listening ends when the server starts speaking; re-armed after the
    /// turn when `keep_listening` is set.
    #[default]
    AutoStop,

    /// Listening ends only on an explicit stop.
    Manual,
}

impl ListeningMode {
    /// Wire representation used by the `listen` message (`mode` field).
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::AlwaysOn => "always_on",
            Self::AutoStop => "auto",
            Self::Manual => "manual",
        }
    }
}

/// Why the current activity was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    #[default]
    None,
    WakeWordDetected,
    UserInterruption,
    VoiceInterruption,
    KeyboardInterruption,
    SystemError,
    NetworkError,
    AudioDeviceError,
}

impl AbortReason {
    /// Wire representation used by the `abort` message (`reason` field).
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::WakeWordDetected => "wake_word_detected",
            Self::UserInterruption => "user_interruption",
            Self::VoiceInterruption => "voice_interruption",
            Self::KeyboardInterruption => "keyboard_interruption",
            Self::SystemError => "system_error",
            Self::NetworkError => "network_error",
            Self::AudioDeviceError => "audio_device_error",
        }
    }
}

/// Inputs to the conversation state machine.
///
/// Triggers arrive from many sources (keyword spotter, transport, playback,
/// user actions) and are serialized onto a single dispatcher queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationTrigger {
    StartVoiceChat,
    StopVoiceChat,
    KeywordDetected,
    TtsStarted,
    TtsCompleted,
    AudioPlaybackCompleted,
    ConnectToServer,
    ServerDisconnected,
    UserInterrupt,
    ForceIdle,
}

impl ConversationTrigger {
    /// All triggers, in declaration order. Used by exhaustive table tests.
    pub const ALL: [Self; 10] = [
        Self::StartVoiceChat,
        Self::StopVoiceChat,
        Self::KeywordDetected,
        Self::TtsStarted,
        Self::TtsCompleted,
        Self::AudioPlaybackCompleted,
        Self::ConnectToServer,
        Self::ServerDisconnected,
        Self::UserInterrupt,
        Self::ForceIdle,
    ];
}

impl std::fmt::Display for ConversationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StartVoiceChat => "start_voice_chat",
            Self::StopVoiceChat => "stop_voice_chat",
            Self::KeywordDetected => "keyword_detected",
            Self::TtsStarted => "tts_started",
            Self::TtsCompleted => "tts_completed",
            Self::AudioPlaybackCompleted => "audio_playback_completed",
            Self::ConnectToServer => "connect_to_server",
            Self::ServerDisconnected => "server_disconnected",
            Self::UserInterrupt => "user_interrupt",
            Self::ForceIdle => "force_idle",
        };
        f.write_str(s)
    }
}

/// Snapshot of the orchestrator's conversation context.
///
/// Single writer (the state machine transition handler); readers get a clone
/// and never observe partial updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Current conversation state.
    pub state: DeviceState,

    /// Listening mode for new turns.
    pub mode: ListeningMode,

    /// Whether listening should be re-armed after each turn (`AutoStop` only).
    pub keep_listening: bool,

    /// Session id assigned by the server hello (None before handshake).
    pub session_id: Option<String>,

    /// Whether the MCP sub-protocol finished its initialize exchange.
    pub mcp_initialized: bool,

    /// Abort reason recorded for the in-flight interruption, if any.
    pub pending_abort: AbortReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_idle() {
        assert_eq!(DeviceState::default(), DeviceState::Idle);
        assert_eq!(ConversationContext::default().state, DeviceState::Idle);
    }

    #[test]
    fn listening_mode_wire_names() {
        assert_eq!(ListeningMode::AutoStop.wire_name(), "auto");
        assert_eq!(ListeningMode::Manual.wire_name(), "manual");
        assert_eq!(ListeningMode::AlwaysOn.wire_name(), "always_on");
    }

    #[test]
    fn abort_reason_wire_names_are_snake_case() {
        for reason in [
            AbortReason::WakeWordDetected,
            AbortReason::UserInterruption,
            AbortReason::NetworkError,
        ] {
            let name = reason.wire_name();
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }

    #[test]
    fn trigger_serde_round_trip() {
        let json = serde_json::to_string(&ConversationTrigger::TtsStarted).unwrap();
        assert_eq!(json, "\"tts_started\"");
        let back: ConversationTrigger = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ConversationTrigger::TtsStarted);
    }

    #[test]
    fn all_arrays_are_exhaustive() {
        assert_eq!(DeviceState::ALL.len(), 4);
        assert_eq!(ConversationTrigger::ALL.len(), 10);
    }
}
