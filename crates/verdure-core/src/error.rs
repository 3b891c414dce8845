//! Error taxonomy shared across the workspace.

use serde::{Deserialize, Serialize};

/// Kind tag attached to every surfaced error event.
///
/// The concrete error enums live in the crates that produce them; this tag is
/// what the UI sees and what recovery policy is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connect / read / write failure, unexpected close. Retried with
    /// backoff; triggers `ServerDisconnected`.
    Transport,

    /// Malformed envelope or missing required field. Message dropped,
    /// connection retained.
    Protocol,

    /// JSON-RPC error response, timeout, unknown tool, invalid arguments.
    /// Rejected to the caller; never closes the connection.
    Mcp,

    /// Device open failure, callback failure, stop timeout. Forces Idle.
    AudioDevice,

    /// Keyword spotter failure. Auto-restarted; disabled after repeated
    /// failures.
    KeywordSpotter,

    /// Invalid (state, trigger) pair. No-op, debug-level log only.
    StateMachine,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Mcp => "mcp",
            Self::AudioDevice => "audio_device",
            Self::KeywordSpotter => "keyword_spotter",
            Self::StateMachine => "state_machine",
        };
        f.write_str(s)
    }
}
