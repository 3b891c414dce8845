//! External media-player control port.
//!
//! The music-voice coordinator pauses whatever the user is playing when a
//! conversation turn starts and resumes it afterwards. The player itself
//! (system media session, desktop app) lives outside the core.

/// Control surface over an external media player.
pub trait MediaController: Send + Sync {
    /// Whether media is currently playing.
    fn is_playing(&self) -> bool;

    /// Pause playback. Idempotent.
    fn pause(&self);

    /// Resume playback. Idempotent.
    fn resume(&self);
}

/// A media controller that controls nothing.
///
/// Used when no external player integration is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopMediaController;

impl NoopMediaController {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl MediaController for NoopMediaController {
    fn is_playing(&self) -> bool {
        false
    }

    fn pause(&self) {}

    fn resume(&self) {}
}
