//! Music-player adapter.
//!
//! Also implements the [`MediaController`] port so the music-voice
//! coordinator can pause and resume playback around conversation turns
//! through the same state the tools mutate.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use verdure_core::ports::MediaController;

use crate::error::McpError;
use crate::registry::{ToolDescriptor, ToolRegistry};

use super::DeviceStatusBoard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayerStatus {
    Stopped,
    Playing,
    Paused,
}

impl PlayerStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Playing => "playing",
            Self::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone)]
struct PlayerState {
    status: PlayerStatus,
    current_song: Option<String>,
}

/// A virtual music player.
#[derive(Clone)]
pub struct MusicPlayer {
    state: Arc<Mutex<PlayerState>>,
}

impl MusicPlayer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PlayerState {
                status: PlayerStatus::Stopped,
                current_song: None,
            })),
        }
    }

    /// Register `self.music_player.*` tools and the status provider.
    pub fn register(
        &self,
        registry: &ToolRegistry,
        board: &DeviceStatusBoard,
    ) -> Result<(), McpError> {
        let state = Arc::clone(&self.state);
        registry.register(ToolDescriptor::new(
            "self.music_player.play",
            "Play a song by name",
            json!({
                "type": "object",
                "properties": { "song": { "type": "string" } },
                "required": ["song"]
            }),
            Arc::new(move |args| {
                let song = args
                    .get("song")
                    .and_then(Value::as_str)
                    .ok_or_else(|| McpError::InvalidArguments("song must be a string".into()))?;
                let mut player = lock(&state);
                player.status = PlayerStatus::Playing;
                player.current_song = Some(song.to_string());
                Ok(format!("Playing {song}"))
            }),
        ))?;

        let state = Arc::clone(&self.state);
        registry.register(ToolDescriptor::new(
            "self.music_player.pause",
            "Pause playback",
            json!({"type": "object", "properties": {}}),
            Arc::new(move |_| {
                let mut player = lock(&state);
                if player.status == PlayerStatus::Playing {
                    player.status = PlayerStatus::Paused;
                }
                Ok("Playback paused".to_string())
            }),
        ))?;

        let state = Arc::clone(&self.state);
        registry.register(ToolDescriptor::new(
            "self.music_player.resume",
            "Resume paused playback",
            json!({"type": "object", "properties": {}}),
            Arc::new(move |_| {
                let mut player = lock(&state);
                if player.status == PlayerStatus::Paused {
                    player.status = PlayerStatus::Playing;
                }
                Ok("Playback resumed".to_string())
            }),
        ))?;

        let state = Arc::clone(&self.state);
        registry.register(ToolDescriptor::new(
            "self.music_player.stop",
            "Stop playback",
            json!({"type": "object", "properties": {}}),
            Arc::new(move |_| {
                let mut player = lock(&state);
                player.status = PlayerStatus::Stopped;
                player.current_song = None;
                Ok("Playback stopped".to_string())
            }),
        ))?;

        let state = Arc::clone(&self.state);
        board.add_provider(
            "music_player",
            Arc::new(move || {
                let player = lock(&state);
                json!({
                    "status": player.status.as_str(),
                    "current_song": player.current_song,
                })
            }),
        );

        Ok(())
    }
}

impl Default for MusicPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaController for MusicPlayer {
    fn is_playing(&self) -> bool {
        lock(&self.state).status == PlayerStatus::Playing
    }

    fn pause(&self) {
        let mut player = lock(&self.state);
        if player.status == PlayerStatus::Playing {
            player.status = PlayerStatus::Paused;
        }
    }

    fn resume(&self) {
        let mut player = lock(&self.state);
        if player.status == PlayerStatus::Paused {
            player.status = PlayerStatus::Playing;
        }
    }
}

fn lock(state: &Mutex<PlayerState>) -> std::sync::MutexGuard<'_, PlayerState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn setup() -> (ToolRegistry, DeviceStatusBoard, MusicPlayer) {
        let registry = ToolRegistry::new();
        let board = DeviceStatusBoard::new();
        let player = MusicPlayer::new();
        player.register(&registry, &board).unwrap();
        (registry, board, player)
    }

    #[test]
    fn play_pause_resume_stop_cycle() {
        let (registry, board, _player) = setup();

        let mut args = Map::new();
        args.insert("song".into(), json!("Clair de Lune"));
        assert_eq!(
            registry.call("self.music_player.play", &args).unwrap(),
            "Playing Clair de Lune"
        );
        assert_eq!(board.snapshot()["music_player"]["status"], "playing");

        registry.call("self.music_player.pause", &Map::new()).unwrap();
        assert_eq!(board.snapshot()["music_player"]["status"], "paused");

        registry
            .call("self.music_player.resume", &Map::new())
            .unwrap();
        assert_eq!(board.snapshot()["music_player"]["status"], "playing");

        registry.call("self.music_player.stop", &Map::new()).unwrap();
        let status = board.snapshot();
        assert_eq!(status["music_player"]["status"], "stopped");
        assert!(status["music_player"]["current_song"].is_null());
    }

    #[test]
    fn media_controller_port_shares_tool_state() {
        let (registry, _board, player) = setup();

        let mut args = Map::new();
        args.insert("song".into(), json!("x"));
        registry.call("self.music_player.play", &args).unwrap();
        assert!(player.is_playing());

        player.pause();
        assert!(!player.is_playing());
        player.resume();
        assert!(player.is_playing());
    }

    #[test]
    fn resume_does_not_revive_stopped_playback() {
        let (_registry, _board, player) = setup();
        player.resume();
        assert!(!player.is_playing());
    }
}
