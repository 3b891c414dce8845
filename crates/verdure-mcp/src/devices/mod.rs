//! Device adapters backing the local tool registry.
//!
//! Each adapter owns the state for one logical peripheral and registers its
//! typed tool records at construction time (never lazily). All state
//! mutation flows through the tool handlers, so a successful call is always
//! visible in the next `self.get_device_status` result.

mod camera;
mod lamp;
mod music;
mod speaker;

pub use camera::Camera;
pub use lamp::Lamp;
pub use music::MusicPlayer;
pub use speaker::Speaker;

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::error::McpError;
use crate::registry::{ToolDescriptor, ToolRegistry};

type StatusProvider = Arc<dyn Fn() -> Value + Send + Sync>;

/// Aggregates per-device status providers behind `self.get_device_status`.
#[derive(Clone, Default)]
pub struct DeviceStatusBoard {
    providers: Arc<Mutex<Vec<(String, StatusProvider)>>>,
}

impl DeviceStatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device's status snapshot function.
    pub fn add_provider(&self, device_id: impl Into<String>, provider: StatusProvider) {
        let mut providers = match self.providers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        providers.push((device_id.into(), provider));
    }

    /// Snapshot every device's properties as one JSON object.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let providers = match self.providers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut status = serde_json::Map::new();
        for (device_id, provider) in providers.iter() {
            status.insert(device_id.clone(), provider());
        }
        Value::Object(status)
    }

    /// Register the `self.get_device_status` built-in on `registry`.
    pub fn register_status_tool(&self, registry: &ToolRegistry) -> Result<(), McpError> {
        let board = self.clone();
        registry.register(ToolDescriptor::new(
            "self.get_device_status",
            "Get the current status of every local device",
            json!({"type": "object", "properties": {}}),
            Arc::new(move |_| {
                serde_json::to_string(&board.snapshot())
                    .map_err(|e| McpError::ToolFailed(e.to_string()))
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn status_tool_reflects_all_devices() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();

        let lamp = Lamp::new();
        lamp.register(&registry, &board).unwrap();
        let speaker = Speaker::new(None);
        speaker.register(&registry, &board).unwrap();

        board.register_status_tool(&registry).unwrap();

        let text = registry.call("self.get_device_status", &Map::new()).unwrap();
        let status: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(status["lamp"]["power"], "off");
        assert_eq!(status["audio_speaker"]["volume"], 50);
    }

    #[test]
    fn tool_call_mutations_show_up_in_status() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        let lamp = Lamp::new();
        lamp.register(&registry, &board).unwrap();
        board.register_status_tool(&registry).unwrap();

        let mut args = Map::new();
        args.insert("brightness".into(), json!(75));
        let reply = registry.call("self.lamp.turn_on", &args).unwrap();
        assert_eq!(reply, "Smart lamp turned on with brightness 75");

        let text = registry.call("self.get_device_status", &Map::new()).unwrap();
        let status: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(status["lamp"]["power"], "on");
        assert_eq!(status["lamp"]["brightness"], 75);
    }
}
