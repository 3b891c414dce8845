//! MCP engine error types.

use serde_json::Value;

/// Errors that can occur during MCP operations.
///
/// None of these close the connection: requests are rejected to their
/// callers and the next request proceeds normally.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The peer answered with a JSON-RPC error object.
    #[error("server returned error: code={code}, message={message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// No response arrived within the request timeout.
    #[error("timeout waiting for MCP response")]
    Timeout,

    /// A tool call was attempted before the initialize exchange finished.
    #[error("MCP session not initialized")]
    NotInitialized,

    /// The named tool is not in the registry.
    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    /// Arguments did not satisfy the tool's input schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A tool with the same dot-path name is already registered.
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// A payload could not be understood as JSON-RPC 2.0.
    #[error("malformed JSON-RPC payload: {0}")]
    Protocol(String),

    /// The outbound channel to the transport is gone.
    #[error("failed to send MCP payload: {0}")]
    Send(String),

    /// A tool handler failed.
    #[error("tool execution failed: {0}")]
    ToolFailed(String),
}
