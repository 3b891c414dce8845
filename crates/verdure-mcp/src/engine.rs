//! The MCP engine: JSON-RPC 2.0 client and server over one transport.
//!
//! Client role: initialize the session (gated on the server hello advertising
//! MCP), mirror the server's tool list, and issue `tools/call` requests with
//! correlated ids. Server role: answer the server's `initialize`,
//! `tools/list`, and `tools/call` against the local device registry.
//!
//! Engine errors never escalate: a failed or timed-out request rejects its
//! caller and the next request proceeds normally. MCP traffic never moves
//! the conversation state machine — it only mutates device adapters.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::McpError;
use crate::jsonrpc::{
    self, INTERNAL_ERROR, INVALID_PARAMS, IncomingRpc, JsonRpcRequest, MCP_PROTOCOL_VERSION,
    METHOD_NOT_FOUND, RpcId,
};
use crate::pending::PendingRequests;
use crate::registry::ToolRegistry;

/// A tool exposed by the server, mirrored locally after `tools/list`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

/// The MCP engine. One instance per session.
pub struct McpEngine {
    registry: Arc<ToolRegistry>,
    pending: Arc<PendingRequests>,
    outbound: mpsc::UnboundedSender<Value>,
    initialized: AtomicBool,
    request_timeout: Duration,
    remote_tools: RwLock<Vec<RemoteTool>>,
    client_name: String,
    client_version: String,
}

impl McpEngine {
    /// Create an engine over the local `registry`.
    ///
    /// Returns the engine and the stream of outbound JSON-RPC payloads; the
    /// orchestrator wraps each payload in an `mcp` envelope and sends it.
    pub fn new(
        registry: Arc<ToolRegistry>,
        request_timeout: Duration,
        client_name: impl Into<String>,
        client_version: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                registry,
                pending: Arc::new(PendingRequests::new()),
                outbound,
                initialized: AtomicBool::new(false),
                request_timeout,
                remote_tools: RwLock::new(Vec::new()),
                client_name: client_name.into(),
                client_version: client_version.into(),
            },
            outbound_rx,
        )
    }

    /// Whether the initialize exchange has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Requests currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The mirrored server tool list (empty before initialization).
    pub fn remote_tools(&self) -> Vec<RemoteTool> {
        match self.remote_tools.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Reset session state on disconnect: pending requests are rejected,
    /// the initialize gate closes, the tool mirror empties.
    pub fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.pending.reject_all("connection lost");
        match self.remote_tools.write() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        tracing::debug!("MCP engine reset");
    }

    // ── Client role ────────────────────────────────────────────────

    /// Run the initialize exchange, then mirror the server's tools.
    ///
    /// Call this only when the server hello carried `features.mcp = true`.
    /// No `tools/call` is issued until the initialize response has arrived.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": self.client_name,
                "version": self.client_version,
            },
        });

        let result = self.request("initialize", Some(params)).await?;

        let server_version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("<unspecified>");
        let server_name = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>");
        tracing::info!(
            server = server_name,
            protocol = server_version,
            "MCP session initialized"
        );

        self.initialized.store(true, Ordering::SeqCst);
        self.send_payload(jsonrpc::notification("notifications/initialized", None))?;

        self.refresh_remote_tools().await?;
        Ok(())
    }

    /// Fetch `tools/list` from the server and update the local mirror.
    pub async fn refresh_remote_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        if !self.is_initialized() {
            return Err(McpError::NotInitialized);
        }

        let result = self.request("tools/list", None).await?;
        let tools: Vec<RemoteTool> = result
            .get("tools")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::Protocol(format!("unusable tools/list result: {e}")))?
            .unwrap_or_default();

        tracing::info!(count = tools.len(), "Server tool list mirrored");
        match self.remote_tools.write() {
            Ok(mut guard) => guard.clone_from(&tools),
            Err(poisoned) => poisoned.into_inner().clone_from(&tools),
        }
        Ok(tools)
    }

    /// Invoke a server-side tool.
    pub async fn call_remote_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Value, McpError> {
        if !self.is_initialized() {
            return Err(McpError::NotInitialized);
        }

        let params = json!({ "name": name, "arguments": arguments });
        self.request("tools/call", Some(params)).await
    }

    /// Send one request and await the correlated response or timeout.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.pending.next_id();
        let receiver = self.pending.register(id, method);

        let request = JsonRpcRequest::new(id, method, params);
        let payload =
            serde_json::to_value(&request).map_err(|e| McpError::Protocol(e.to_string()))?;

        if let Err(e) = self.send_payload(payload) {
            self.pending.remove(id);
            return Err(e);
        }

        match timeout(self.request_timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::Send("resolver dropped".into())),
            Err(_) => {
                // Timed-out entries leave the map so it drains to empty.
                self.pending.remove(id);
                tracing::warn!(id, method, "MCP request timed out");
                Err(McpError::Timeout)
            }
        }
    }

    fn send_payload(&self, payload: Value) -> Result<(), McpError> {
        self.outbound
            .send(payload)
            .map_err(|e| McpError::Send(e.to_string()))
    }

    // ── Inbound dispatch ───────────────────────────────────────────

    /// Handle one inbound JSON-RPC payload from the `mcp` envelope.
    ///
    /// Malformed payloads are logged and dropped (JSON-RPC 2.0 behavior for
    /// malformed notifications); nothing here closes the connection.
    pub fn handle_payload(&self, payload: &Value) {
        match jsonrpc::classify(payload) {
            Ok(IncomingRpc::Response { id, result, error }) => {
                self.handle_response(&id, result, error);
            }
            Ok(IncomingRpc::Request { id, method, params }) => {
                let response = self.dispatch_request(&id, &method, &params);
                if let Err(e) = self.send_payload(response) {
                    tracing::warn!(error = %e, "Failed to send MCP response");
                }
            }
            Ok(IncomingRpc::Notification { method, .. }) => {
                // Notifications consume no pending slot and get no reply.
                tracing::debug!(method, "MCP notification received");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed MCP payload");
            }
        }
    }

    fn handle_response(&self, id: &RpcId, result: Option<Value>, error: Option<jsonrpc::JsonRpcError>) {
        let RpcId::Number(id) = id else {
            tracing::warn!(%id, "Response with string id does not match any request of ours");
            return;
        };

        let outcome = match error {
            Some(error) => Err(McpError::ServerError {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        self.pending.resolve(*id, outcome);
    }

    // ── Server role ────────────────────────────────────────────────

    fn dispatch_request(&self, id: &RpcId, method: &str, params: &Value) -> Value {
        match method {
            "initialize" => jsonrpc::response_ok(
                id,
                json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": self.client_name,
                        "version": self.client_version,
                    },
                }),
            ),

            "ping" => jsonrpc::response_ok(id, json!({})),

            "tools/list" => jsonrpc::response_ok(id, json!({ "tools": self.registry.list() })),

            "tools/call" => self.dispatch_tool_call(id, params),

            other => {
                tracing::debug!(method = other, "Unknown MCP method");
                jsonrpc::response_err(id, METHOD_NOT_FOUND, &format!("Unknown method: {other}"))
            }
        }
    }

    fn dispatch_tool_call(&self, id: &RpcId, params: &Value) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return jsonrpc::response_err(id, INVALID_PARAMS, "tools/call requires a tool name");
        };

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return jsonrpc::response_err(id, INVALID_PARAMS, "arguments must be an object");
            }
        };

        tracing::info!(tool = name, "Server tool call");

        match self.registry.call(name, &arguments) {
            Ok(text) => jsonrpc::response_ok(
                id,
                json!({
                    "content": [ { "type": "text", "text": text } ],
                    "isError": false,
                }),
            ),
            Err(McpError::ToolNotFound(name)) => {
                jsonrpc::response_err(id, METHOD_NOT_FOUND, &format!("Unknown tool: {name}"))
            }
            Err(McpError::InvalidArguments(detail)) => {
                jsonrpc::response_err(id, INVALID_PARAMS, &format!("Invalid parameters: {detail}"))
            }
            Err(e) => jsonrpc::response_err(id, INTERNAL_ERROR, &e.to_string()),
        }
    }
}
