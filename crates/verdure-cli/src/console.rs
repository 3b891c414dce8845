//! Console event printer.

use verdure_core::events::{ClientEvent, TtsState};
use verdure_core::ports::ClientEventEmitter;

/// Prints client events to stdout, one line each.
#[derive(Debug, Clone, Default)]
pub struct ConsoleEmitter;

impl ConsoleEmitter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ClientEventEmitter for ConsoleEmitter {
    fn emit(&self, event: ClientEvent) {
        match event {
            ClientEvent::DeviceStateChanged { change } => {
                println!("[state] {} → {} ({})", change.from, change.to, change.trigger);
            }
            ClientEvent::ListeningModeChanged { mode } => {
                println!("[mode] {mode:?}");
            }
            ClientEvent::VoiceChatStateChanged { active } => {
                println!("[voice] {}", if active { "on" } else { "off" });
            }
            ClientEvent::MessageReceived { message } => {
                println!("[{:?}] {}", message.role, message.content);
            }
            ClientEvent::TtsStateChanged { state, text } => match (state, text) {
                (TtsState::SentenceStart, Some(text)) => println!("[tts] {text}"),
                (TtsState::Start, _) => println!("[tts] speaking…"),
                (TtsState::Stop, _) => println!("[tts] done"),
                _ => {}
            },
            ClientEvent::LlmMessageReceived { text, emotion } => {
                let tag = emotion.map_or_else(String::new, |e| format!(" ({e})"));
                println!("[assistant]{tag} {text}");
            }
            ClientEvent::MusicMessageReceived { payload } => {
                println!("[music] {payload}");
            }
            ClientEvent::McpEvent { description } => {
                println!("[mcp] {description}");
            }
            ClientEvent::ErrorOccurred { kind, message } => {
                eprintln!("[error:{kind}] {message}");
            }
        }
    }

    fn clone_box(&self) -> Box<dyn ClientEventEmitter> {
        Box::new(self.clone())
    }
}
