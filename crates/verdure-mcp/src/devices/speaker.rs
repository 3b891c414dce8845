//! Speaker adapter: volume and mute for the playback path.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::error::McpError;
use crate::registry::{ToolDescriptor, ToolRegistry};

use super::DeviceStatusBoard;

/// Callback applying a volume change (0-100) to the real output device.
pub type VolumeSink = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Debug, Clone)]
struct SpeakerState {
    /// Volume in percent, clamped to [0, 100].
    volume: u8,
    muted: bool,
}

/// A virtual speaker wired to the playback volume.
#[derive(Clone)]
pub struct Speaker {
    state: Arc<Mutex<SpeakerState>>,
    sink: Option<VolumeSink>,
}

impl Speaker {
    /// `sink` receives the effective volume whenever it changes; pass `None`
    /// when no output device is attached.
    #[must_use]
    pub fn new(sink: Option<VolumeSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SpeakerState {
                volume: 50,
                muted: false,
            })),
            sink,
        }
    }

    fn apply(&self, state: &SpeakerState) {
        if let Some(sink) = &self.sink {
            sink(if state.muted { 0 } else { state.volume });
        }
    }

    /// Register `self.audio_speaker.*` tools and the status provider.
    pub fn register(
        &self,
        registry: &ToolRegistry,
        board: &DeviceStatusBoard,
    ) -> Result<(), McpError> {
        let this = self.clone();
        registry.register(ToolDescriptor::new(
            "self.audio_speaker.set_volume",
            "Set the speaker volume (0-100)",
            json!({
                "type": "object",
                "properties": {
                    "volume": { "type": "integer", "minimum": 0, "maximum": 100 }
                },
                "required": ["volume"]
            }),
            Arc::new(move |args| {
                let volume = args
                    .get("volume")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| McpError::InvalidArguments("volume must be an integer".into()))?;
                #[allow(clippy::cast_possible_truncation)]
                let volume = volume.min(100) as u8;

                let mut state = lock(&this.state);
                state.volume = volume;
                let snapshot = state.clone();
                drop(state);
                this.apply(&snapshot);
                Ok(format!("Speaker volume set to {volume}"))
            }),
        ))?;

        let this = self.clone();
        registry.register(ToolDescriptor::new(
            "self.audio_speaker.mute",
            "Mute the speaker",
            json!({"type": "object", "properties": {}}),
            Arc::new(move |_| {
                let mut state = lock(&this.state);
                state.muted = true;
                let snapshot = state.clone();
                drop(state);
                this.apply(&snapshot);
                Ok("Speaker muted".to_string())
            }),
        ))?;

        let this = self.clone();
        registry.register(ToolDescriptor::new(
            "self.audio_speaker.unmute",
            "Unmute the speaker",
            json!({"type": "object", "properties": {}}),
            Arc::new(move |_| {
                let mut state = lock(&this.state);
                state.muted = false;
                let snapshot = state.clone();
                drop(state);
                this.apply(&snapshot);
                Ok("Speaker unmuted".to_string())
            }),
        ))?;

        let state = Arc::clone(&self.state);
        board.add_provider(
            "audio_speaker",
            Arc::new(move || {
                let speaker = lock(&state);
                json!({
                    "volume": speaker.volume,
                    "muted": speaker.muted,
                })
            }),
        );

        Ok(())
    }
}

fn lock(state: &Mutex<SpeakerState>) -> std::sync::MutexGuard<'_, SpeakerState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicU8, Ordering};

    #[test]
    fn set_volume_updates_state_and_sink() {
        let applied = Arc::new(AtomicU8::new(255));
        let probe = Arc::clone(&applied);

        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Speaker::new(Some(Arc::new(move |v| probe.store(v, Ordering::SeqCst))))
            .register(&registry, &board)
            .unwrap();

        let mut args = Map::new();
        args.insert("volume".into(), json!(30));
        let reply = registry.call("self.audio_speaker.set_volume", &args).unwrap();
        assert_eq!(reply, "Speaker volume set to 30");
        assert_eq!(applied.load(Ordering::SeqCst), 30);
        assert_eq!(board.snapshot()["audio_speaker"]["volume"], 30);
    }

    #[test]
    fn mute_drives_sink_to_zero_but_remembers_volume() {
        let applied = Arc::new(AtomicU8::new(255));
        let probe = Arc::clone(&applied);

        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Speaker::new(Some(Arc::new(move |v| probe.store(v, Ordering::SeqCst))))
            .register(&registry, &board)
            .unwrap();

        registry.call("self.audio_speaker.mute", &Map::new()).unwrap();
        assert_eq!(applied.load(Ordering::SeqCst), 0);

        registry
            .call("self.audio_speaker.unmute", &Map::new())
            .unwrap();
        assert_eq!(applied.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn missing_volume_is_rejected() {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        Speaker::new(None).register(&registry, &board).unwrap();
        assert!(
            registry
                .call("self.audio_speaker.set_volume", &Map::new())
                .is_err()
        );
    }
}
