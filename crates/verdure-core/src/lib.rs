//! Core domain types, events, and ports for the verdure voice client.
//!
//! This crate is dependency-light by design: every other crate in the
//! workspace depends on it, and it depends on none of them. It holds the
//! conversation data model, the typed event surface, the port traits that
//! adapters implement, and the client configuration.

pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod ports;

// Re-export commonly used types for convenience
pub use config::{ClientConfig, ConfigError};
pub use domain::{
    AbortReason, AudioFrame, AudioParams, ChatMessage, ChatRole, ConversationContext,
    ConversationTrigger, DeviceState, ListeningMode, MAX_ENCODED_PACKET_BYTES,
};
pub use error::ErrorKind;
pub use events::{ClientEvent, StateChange, TtsState};
pub use ports::{ClientEventEmitter, MediaController, NoopEmitter, NoopMediaController};
