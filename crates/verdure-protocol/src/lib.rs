//! Wire protocol for the verdure voice client.
//!
//! The outermost unit is the [`Envelope`]: a JSON object tagged by its
//! `type` field, carried as a text frame on the transport. Audio travels as
//! binary frames (one encoded packet per frame) and never appears here.
//!
//! Parse failures are values, not escapes: a malformed or unknown message
//! yields a [`ProtocolError`] that the dispatcher logs and drops without
//! touching the connection.

mod error;
mod messages;

pub use error::ProtocolError;
pub use messages::{
    AbortMessage, Envelope, FeatureFlags, HelloMessage, IotMessage, ListenMessage, ListenMode,
    ListenState, LlmMessage, McpEnvelope, MusicMessage, PROTOCOL_VERSION, TtsMessage,
    WireAudioParams, parse_envelope,
};
