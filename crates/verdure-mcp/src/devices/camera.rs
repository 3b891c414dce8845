//! Camera adapter.
//!
//! The concrete capture hardware lives outside the core; this adapter tracks
//! state and delegates the shot to an optional capture callback.

use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::error::McpError;
use crate::registry::{ToolDescriptor, ToolRegistry};

use super::DeviceStatusBoard;

/// Callback performing the actual capture; returns a description of the shot.
pub type CaptureFn = Arc<dyn Fn() -> Result<String, String> + Send + Sync>;

#[derive(Debug, Clone, Default)]
struct CameraState {
    photos_taken: u64,
    last_photo_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A virtual camera.
#[derive(Clone)]
pub struct Camera {
    state: Arc<Mutex<CameraState>>,
    capture: Option<CaptureFn>,
}

impl Camera {
    #[must_use]
    pub fn new(capture: Option<CaptureFn>) -> Self {
        Self {
            state: Arc::new(Mutex::new(CameraState::default())),
            capture,
        }
    }

    /// Register `self.camera.take_photo` and the status provider.
    pub fn register(
        &self,
        registry: &ToolRegistry,
        board: &DeviceStatusBoard,
    ) -> Result<(), McpError> {
        let state = Arc::clone(&self.state);
        let capture = self.capture.clone();
        registry.register(ToolDescriptor::new(
            "self.camera.take_photo",
            "Take a photo with the camera",
            json!({"type": "object", "properties": {}}),
            Arc::new(move |_| {
                let description = match &capture {
                    Some(capture) => capture().map_err(McpError::ToolFailed)?,
                    None => "Photo captured".to_string(),
                };

                let mut camera = lock(&state);
                camera.photos_taken += 1;
                camera.last_photo_at = Some(chrono::Utc::now());
                Ok(description)
            }),
        ))?;

        let state = Arc::clone(&self.state);
        board.add_provider(
            "camera",
            Arc::new(move || {
                let camera = lock(&state);
                json!({
                    "photos_taken": camera.photos_taken,
                    "last_photo_at": camera.last_photo_at.map(|t| t.to_rfc3339()),
                })
            }),
        );

        Ok(())
    }
}

fn lock(state: &Mutex<CameraState>) -> std::sync::MutexGuard<'_, CameraState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn take_photo_counts_and_stamps() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Camera::new(None).register(&registry, &board).unwrap();

        let reply = registry.call("self.camera.take_photo", &Map::new()).unwrap();
        assert_eq!(reply, "Photo captured");
        registry.call("self.camera.take_photo", &Map::new()).unwrap();

        let status = board.snapshot();
        assert_eq!(status["camera"]["photos_taken"], 2);
        assert!(status["camera"]["last_photo_at"].is_string());
    }

    #[test]
    fn capture_failure_does_not_mutate_state() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Camera::new(Some(Arc::new(|| Err("lens cap on".to_string()))))
            .register(&registry, &board)
            .unwrap();

        assert!(registry.call("self.camera.take_photo", &Map::new()).is_err());
        assert_eq!(board.snapshot()["camera"]["photos_taken"], 0);
    }
}
