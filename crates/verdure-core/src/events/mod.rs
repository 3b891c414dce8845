//! Typed events surfaced to the UI / caller.
//!
//! Events are emitted through the [`ClientEventEmitter`] port so that the
//! orchestrator never depends on a concrete delivery mechanism (console,
//! desktop shell, test recorder).
//!
//! [`ClientEventEmitter`]: crate::ports::ClientEventEmitter

use serde::{Deserialize, Serialize};

use crate::domain::{ChatMessage, ConversationTrigger, DeviceState, ListeningMode};
use crate::error::ErrorKind;

/// A single state-machine transition, as observed by listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub from: DeviceState,
    pub to: DeviceState,
    pub trigger: ConversationTrigger,
    /// Free-form reason, e.g. the keyword that fired.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Lifecycle of a server-side TTS utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    Stop,
    SentenceStart,
    SentenceEnd,
}

/// Events consumed by the UI / caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// The conversation state machine transitioned.
    DeviceStateChanged { change: StateChange },

    /// The listening mode was reconfigured.
    ListeningModeChanged { mode: ListeningMode },

    /// Voice chat was started or stopped through the public API.
    VoiceChatStateChanged { active: bool },

    /// A transcript entry was appended (user or assistant).
    MessageReceived { message: ChatMessage },

    /// Server TTS lifecycle, with the sentence text when present.
    TtsStateChanged {
        state: TtsState,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// Text reply from the language model, with an optional emotion tag.
    LlmMessageReceived {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
    },

    /// Music metadata / lyric / playback status from the server.
    MusicMessageReceived { payload: serde_json::Value },

    /// MCP activity of interest to the caller (tool registered, tool called).
    McpEvent { description: String },

    /// A typed error was surfaced. Never fatal to the client.
    ErrorOccurred { kind: ErrorKind, message: String },
}

impl ClientEvent {
    /// Create a state-changed event.
    pub fn state_changed(
        from: DeviceState,
        to: DeviceState,
        trigger: ConversationTrigger,
        reason: Option<String>,
    ) -> Self {
        Self::DeviceStateChanged {
            change: StateChange {
                from,
                to,
                trigger,
                reason,
            },
        }
    }

    /// Create an error event.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::ErrorOccurred {
            kind,
            message: message.into(),
        }
    }

    /// Create a transcript event.
    pub const fn message(message: ChatMessage) -> Self {
        Self::MessageReceived { message }
    }

    /// Create a TTS lifecycle event.
    pub const fn tts(state: TtsState, text: Option<String>) -> Self {
        Self::TtsStateChanged { state, text }
    }
}
