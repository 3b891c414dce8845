//! Music-voice coordination.
//!
//! Conversation turns should not talk over the user's music. On entering a
//! turn the coordinator pauses the external player; when the conversation
//! returns to idle it resumes — but only if it was the one that paused.
//! Media the user paused themselves stays paused.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use verdure_core::ports::MediaController;

/// Pauses and resumes external media around conversation turns.
pub struct MusicVoiceCoordinator {
    controller: Arc<dyn MediaController>,
    owns_pause: AtomicBool,
}

impl MusicVoiceCoordinator {
    #[must_use]
    pub fn new(controller: Arc<dyn MediaController>) -> Self {
        Self {
            controller,
            owns_pause: AtomicBool::new(false),
        }
    }

    /// A conversation turn is starting (Listening or Speaking entered).
    /// Idempotent: repeated calls while a turn is active do nothing new.
    pub fn on_turn_started(&self) {
        if self.owns_pause.load(Ordering::SeqCst) {
            return;
        }
        if self.controller.is_playing() {
            self.controller.pause();
            self.owns_pause.store(true, Ordering::SeqCst);
            tracing::debug!("Paused external media for conversation turn");
        }
    }

    /// The conversation returned to idle. Resumes only a pause we own.
    pub fn on_turn_ended(&self) {
        if self.owns_pause.swap(false, Ordering::SeqCst) {
            self.controller.resume();
            tracing::debug!("Resumed external media after conversation turn");
        }
    }

    /// Whether the coordinator currently holds the pause.
    pub fn owns_pause(&self) -> bool {
        self.owns_pause.load(Ordering::SeqCst)
    }
}
