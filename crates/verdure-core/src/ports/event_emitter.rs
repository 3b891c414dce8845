//! Event emitter trait for cross-crate event broadcasting.
//!
//! Implementations handle delivery details (console printing, channels,
//! desktop shells). The orchestrator only ever sees this trait.

use crate::events::ClientEvent;

/// Trait for emitting client events.
///
/// This abstraction keeps event plumbing consistent across crates and
/// prevents channel types from becoming part of the public API surface.
///
/// Implementations must not block: emit should hand the event off and return.
pub trait ClientEventEmitter: Send + Sync {
    /// Emit a client event.
    fn emit(&self, event: ClientEvent);

    /// Clone this emitter into a boxed trait object.
    ///
    /// This enables cloning of `Arc<dyn ClientEventEmitter>` without
    /// requiring the underlying type to implement Clone.
    fn clone_box(&self) -> Box<dyn ClientEventEmitter>;
}

/// A no-op event emitter for tests and headless contexts.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    /// Create a new no-op emitter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ClientEventEmitter for NoopEmitter {
    fn emit(&self, _event: ClientEvent) {
        // Intentionally do nothing
    }

    fn clone_box(&self) -> Box<dyn ClientEventEmitter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;

    #[test]
    fn noop_emitter_discards_events() {
        let emitter = NoopEmitter::new();
        emitter.emit(ClientEvent::error(ErrorKind::Protocol, "ignored"));
    }

    #[test]
    fn noop_emitter_clone_box() {
        let emitter: Arc<dyn ClientEventEmitter> = Arc::new(NoopEmitter::new());
        let _boxed: Box<dyn ClientEventEmitter> = emitter.clone_box();
    }
}
