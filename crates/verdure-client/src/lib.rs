//! Conversation control for the verdure voice client.
//!
//! The [`StateMachine`] is a deterministic table over
//! `(DeviceState, ConversationTrigger)`; the [`VoiceOrchestrator`] owns it
//! together with the audio pipeline, the transport connection, and the MCP
//! engine, and exposes the public conversation API.

pub mod error;
pub mod interrupt;
pub mod music;
pub mod orchestrator;
pub mod state;

pub use error::ClientError;
pub use interrupt::{InterruptCoordinator, InterruptSource};
pub use music::MusicVoiceCoordinator;
pub use orchestrator::{OrchestratorDeps, VoiceOrchestrator};
pub use state::{StateMachine, transition};
