//! Port traits implemented by adapters outside the core.

mod event_emitter;
mod media;

pub use event_emitter::{ClientEventEmitter, NoopEmitter};
pub use media::{MediaController, NoopMediaController};
