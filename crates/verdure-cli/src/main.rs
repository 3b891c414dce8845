//! Console front-end — the composition root.
//!
//! This is the only place where concrete infrastructure is wired together:
//! transport selection, audio backends, the keyword factory, and the console
//! event printer all meet here. Everything conversational happens inside
//! `verdure-client`; this binary is presentation only.

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use verdure_audio::capture::{CaptureBackend, CpalCaptureBackend};
use verdure_audio::sink::{AudioSink, NullSink, RodioSink};
use verdure_client::interrupt::InterruptSource;
use verdure_client::orchestrator::{OrchestratorDeps, VoiceOrchestrator};
use verdure_core::config::ClientConfig;
use verdure_core::domain::ListeningMode;
use verdure_core::ports::NoopMediaController;
use verdure_transport::{MqttConfig, MqttTransport, Transport, WsConfig, WsTransport};

use console::ConsoleEmitter;

#[derive(Debug, Parser)]
#[command(name = "verdure", version, about = "Voice assistant client")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "verdure.json")]
    config: PathBuf,

    /// Override the server URL from the configuration.
    #[arg(long)]
    server: Option<String>,

    /// Disable the audio pipeline (text-only session).
    #[arg(long)]
    no_voice: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = if cli.config.exists() {
        let text = std::fs::read_to_string(&cli.config)
            .with_context(|| format!("reading {}", cli.config.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", cli.config.display()))?
    } else {
        tracing::info!(path = %cli.config.display(), "No config file, using defaults");
        ClientConfig::default()
    };

    if let Some(server) = &cli.server {
        config.server_url.clone_from(server);
    }
    if cli.no_voice {
        config.enable_voice = false;
    }
    config.validate()?;
    Ok(config)
}

fn build_transport(config: &ClientConfig) -> Arc<dyn Transport> {
    if config.use_websocket {
        Arc::new(WsTransport::new(WsConfig::from_client(config)))
    } else {
        Arc::new(MqttTransport::new(MqttConfig::from_client(config)))
    }
}

fn build_sink(enable_voice: bool) -> Arc<dyn AudioSink> {
    if !enable_voice {
        return Arc::new(NullSink);
    }
    match RodioSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "No output device, playback disabled");
            Arc::new(NullSink)
        }
    }
}

#[cfg(feature = "sherpa")]
fn keyword_factory() -> Option<Arc<dyn verdure_audio::spotter::KeywordBackendFactory>> {
    Some(Arc::new(
        verdure_audio::spotter_sherpa::SherpaKeywordFactory::default(),
    ))
}

#[cfg(not(feature = "sherpa"))]
fn keyword_factory() -> Option<Arc<dyn verdure_audio::spotter::KeywordBackendFactory>> {
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verdure=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing::info!(
        server = %config.server_url,
        transport = if config.use_websocket { "websocket" } else { "mqtt" },
        voice = config.enable_voice,
        "Starting verdure"
    );

    let enable_voice = config.enable_voice;
    let deps = OrchestratorDeps {
        transport: build_transport(&config),
        emitter: Arc::new(ConsoleEmitter::new()),
        media: Arc::new(NoopMediaController::new()),
        capture: Arc::new(CpalCaptureBackend) as Arc<dyn CaptureBackend>,
        sink: build_sink(enable_voice),
        keyword_factory: keyword_factory(),
    };

    let orchestrator = VoiceOrchestrator::new(config, deps)?;
    orchestrator.connect()?;

    println!("commands: start | stop | text <message> | status | mode <auto|manual|always_on> | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                if !handle_line(&orchestrator, line.trim()) {
                    break;
                }
            }
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_line(orchestrator: &VoiceOrchestrator, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let result = match command {
        "" => Ok(()),
        "start" => orchestrator.start_voice_chat(),
        "stop" => orchestrator.stop_voice_chat(),
        "toggle" => orchestrator.toggle_chat_state(),
        "text" if !rest.is_empty() => orchestrator.send_text_message(rest),
        "interrupt" => {
            orchestrator.interrupt(InterruptSource::User);
            Ok(())
        }
        "mode" => match rest {
            "auto" => orchestrator.set_listening_mode(ListeningMode::AutoStop),
            "manual" => orchestrator.set_listening_mode(ListeningMode::Manual),
            "always_on" => orchestrator.set_listening_mode(ListeningMode::AlwaysOn),
            other => {
                println!("unknown mode `{other}` (auto | manual | always_on)");
                Ok(())
            }
        },
        "status" => {
            let context = orchestrator.context();
            println!(
                "state: {} | session: {} | mode: {:?} | mcp: {}",
                context.state,
                context.session_id.as_deref().unwrap_or("-"),
                context.mode,
                if context.mcp_initialized { "ready" } else { "off" },
            );
            Ok(())
        }
        "quit" | "exit" => return false,
        other => {
            println!("unknown command `{other}`");
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("error: {e}");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::parse_from(["verdure"]);
        assert_eq!(cli.config, PathBuf::from("verdure.json"));
        assert!(cli.server.is_none());
        assert!(!cli.no_voice);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let cli = Cli::parse_from(["verdure", "--config", "/nonexistent/verdure.json"]);
        let config = load_config(&cli).unwrap();
        assert!(config.use_websocket);
    }

    #[test]
    fn server_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdure.json");
        std::fs::write(&path, r#"{"server_url":"ws://from-file/","device_id":"d1"}"#).unwrap();

        let cli = Cli::parse_from([
            "verdure",
            "--config",
            path.to_str().unwrap(),
            "--server",
            "ws://from-flag/",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.server_url, "ws://from-flag/");
        assert_eq!(config.device_id, "d1");
    }

    #[test]
    fn no_voice_flag_disables_audio() {
        let cli = Cli::parse_from(["verdure", "--no-voice"]);
        let config = load_config(&cli).unwrap();
        assert!(!config.enable_voice);
    }
}
