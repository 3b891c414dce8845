//! Smart-lamp adapter.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::error::McpError;
use crate::registry::{ToolDescriptor, ToolRegistry};

use super::DeviceStatusBoard;

#[derive(Debug, Clone)]
struct LampState {
    power: bool,
    /// Brightness in percent, clamped to [0, 100].
    brightness: u8,
}

/// A virtual smart lamp.
#[derive(Clone)]
pub struct Lamp {
    state: Arc<Mutex<LampState>>,
}

impl Lamp {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LampState {
                power: false,
                brightness: 100,
            })),
        }
    }

    /// Register `self.lamp.turn_on` / `self.lamp.turn_off` and the status
    /// provider.
    pub fn register(
        &self,
        registry: &ToolRegistry,
        board: &DeviceStatusBoard,
    ) -> Result<(), McpError> {
        let state = Arc::clone(&self.state);
        registry.register(ToolDescriptor::new(
            "self.lamp.turn_on",
            "Turn the smart lamp on, optionally setting brightness (0-100)",
            json!({
                "type": "object",
                "properties": {
                    "brightness": { "type": "integer", "minimum": 0, "maximum": 100 }
                },
                "required": []
            }),
            Arc::new(move |args| {
                let mut lamp = lock(&state);
                lamp.power = true;
                if let Some(brightness) = args.get("brightness").and_then(Value::as_u64) {
                    #[allow(clippy::cast_possible_truncation)]
                    let clamped = brightness.min(100) as u8;
                    lamp.brightness = clamped;
                }
                Ok(format!(
                    "Smart lamp turned on with brightness {}",
                    lamp.brightness
                ))
            }),
        ))?;

        let state = Arc::clone(&self.state);
        registry.register(ToolDescriptor::new(
            "self.lamp.turn_off",
            "Turn the smart lamp off",
            json!({"type": "object", "properties": {}}),
            Arc::new(move |_| {
                lock(&state).power = false;
                Ok("Smart lamp turned off".to_string())
            }),
        ))?;

        let state = Arc::clone(&self.state);
        board.add_provider(
            "lamp",
            Arc::new(move || {
                let lamp = lock(&state);
                json!({
                    "power": if lamp.power { "on" } else { "off" },
                    "brightness": lamp.brightness,
                })
            }),
        );

        Ok(())
    }
}

impl Default for Lamp {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<LampState>) -> std::sync::MutexGuard<'_, LampState> {
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
    fn turn_on_with_brightness_matches_expected_reply() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Lamp::new().register(&registry, &board).unwrap();

        let mut args = Map::new();
        args.insert("brightness".into(), json!(75));
        let reply = registry.call("self.lamp.turn_on", &args).unwrap();
        assert_eq!(reply, "Smart lamp turned on with brightness 75");
    }

    #[test]
    fn turn_on_without_brightness_keeps_previous_level() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Lamp::new().register(&registry, &board).unwrap();

        let reply = registry.call("self.lamp.turn_on", &Map::new()).unwrap();
        assert_eq!(reply, "Smart lamp turned on with brightness 100");
    }

    #[test]
    fn out_of_range_brightness_is_rejected_by_schema() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Lamp::new().register(&registry, &board).unwrap();

        let mut args = Map::new();
        args.insert("brightness".into(), json!(150));
        assert!(registry.call("self.lamp.turn_on", &args).is_err());
    }

    #[test]
    fn turn_off_flips_power_only() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Lamp::new().register(&registry, &board).unwrap();

        let mut args = Map::new();
        args.insert("brightness".into(), json!(40));
        registry.call("self.lamp.turn_on", &args).unwrap();
        registry.call("self.lamp.turn_off", &Map::new()).unwrap();

        let status = board.snapshot();
        assert_eq!(status["lamp"]["power"], "off");
        assert_eq!(status["lamp"]["brightness"], 40);
    }
}
