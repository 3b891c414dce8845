//! Orchestrator error types.

use verdure_audio::AudioError;
use verdure_core::config::ConfigError;
use verdure_transport::TransportError;

/// Errors surfaced by the public conversation API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("MCP error: {0}")]
    Mcp(#[from] verdure_mcp::McpError),

    #[error("not connected to a server")]
    NotConnected,

    #[error("orchestrator is already running")]
    AlreadyRunning,

    #[error("orchestrator is shut down")]
    ShutDown,
}
