//! MCP (Model Context Protocol) engine for the verdure voice client.
//!
//! Implements JSON-RPC 2.0 in both directions over the transport's `mcp`
//! envelope: as a *client* the engine initializes the session, mirrors the
//! server's tool list, and issues `tools/call`; as a *server* it exposes the
//! local device tool registry so the conversational server can drive lamps,
//! volume, the camera, and the music player.
//!
//! Reference: <https://spec.modelcontextprotocol.io/>

pub mod devices;
pub mod engine;
pub mod error;
pub mod jsonrpc;
pub mod pending;
pub mod registry;
pub mod schema;

pub use devices::{Camera, DeviceStatusBoard, Lamp, MusicPlayer, Speaker};
pub use engine::{McpEngine, RemoteTool};
pub use error::McpError;
pub use jsonrpc::{IncomingRpc, JsonRpcError, MCP_PROTOCOL_VERSION, RpcId};
pub use pending::PendingRequests;
pub use registry::{ToolDescriptor, ToolRegistry};
