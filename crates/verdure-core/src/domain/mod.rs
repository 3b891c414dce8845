//! Pure domain types for the conversation model.

mod audio;
mod chat;
mod state;

pub use audio::{AudioFrame, AudioParams, MAX_ENCODED_PACKET_BYTES};
pub use chat::{ChatMessage, ChatRole};
pub use state::{
    AbortReason, ConversationContext, ConversationTrigger, DeviceState, ListeningMode,
};
