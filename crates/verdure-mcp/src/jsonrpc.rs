//! JSON-RPC 2.0 message shapes and payload classification.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::McpError;

/// The literal `jsonrpc` field value.
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version announced in the MCP initialize exchange.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

// Standard JSON-RPC 2.0 error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Outbound request (client role). Ids are integers starting at 1.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Request/response id: integer or string (this client emits integers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
}

impl std::fmt::Display for RpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A classified incoming JSON-RPC payload.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingRpc {
    /// Peer wants something from us (has `method` and `id`).
    Request {
        id: RpcId,
        method: String,
        params: Value,
    },

    /// Fire-and-forget (has `method`, no `id`). Does not consume a pending
    /// slot and gets no reply.
    Notification { method: String, params: Value },

    /// Answer to one of our requests (has `result` or `error`, plus `id`).
    Response {
        id: RpcId,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    },
}

/// Classify a raw payload.
///
/// Malformed payloads are an error value; JSON-RPC 2.0 says malformed
/// notifications are silently dropped, which the engine does after logging.
pub fn classify(payload: &Value) -> Result<IncomingRpc, McpError> {
    let object = payload
        .as_object()
        .ok_or_else(|| McpError::Protocol("payload is not an object".into()))?;

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(McpError::Protocol(
            "jsonrpc field is not the literal \"2.0\"".into(),
        ));
    }

    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            serde_json::from_value::<RpcId>(value.clone())
                .map_err(|_| McpError::Protocol(format!("unusable id: {value}")))?,
        ),
    };

    if let Some(method) = object.get("method").and_then(Value::as_str) {
        let params = object.get("params").cloned().unwrap_or(Value::Null);
        return Ok(match id {
            Some(id) => IncomingRpc::Request {
                id,
                method: method.to_string(),
                params,
            },
            None => IncomingRpc::Notification {
                method: method.to_string(),
                params,
            },
        });
    }

    let result = object.get("result").cloned();
    let error = match object.get("error") {
        Some(value) => Some(
            serde_json::from_value::<JsonRpcError>(value.clone())
                .map_err(|e| McpError::Protocol(format!("unusable error object: {e}")))?,
        ),
        None => None,
    };

    if result.is_none() && error.is_none() {
        return Err(McpError::Protocol(
            "payload has neither method, result, nor error".into(),
        ));
    }

    let id = id.ok_or_else(|| McpError::Protocol("response without id".into()))?;
    Ok(IncomingRpc::Response { id, result, error })
}

/// Build a success response payload.
#[must_use]
pub fn response_ok(id: &RpcId, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Build an error response payload.
#[must_use]
pub fn response_err(id: &RpcId, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": { "code": code, "message": message },
    })
}

/// Build a notification payload.
#[must_use]
pub fn notification(method: &str, params: Option<Value>) -> Value {
    match params {
        Some(params) => json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
        }),
        None => json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization_omits_empty_params() {
        let request = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn classifies_request_notification_response() {
        let request = json!({"jsonrpc":"2.0","method":"tools/call","params":{"name":"x"},"id":42});
        assert!(matches!(
            classify(&request).unwrap(),
            IncomingRpc::Request { id: RpcId::Number(42), .. }
        ));

        let notification = json!({"jsonrpc":"2.0","method":"notifications/initialized"});
        assert!(matches!(
            classify(&notification).unwrap(),
            IncomingRpc::Notification { .. }
        ));

        let response = json!({"jsonrpc":"2.0","id":7,"result":{"tools":[]}});
        assert!(matches!(
            classify(&response).unwrap(),
            IncomingRpc::Response { id: RpcId::Number(7), error: None, .. }
        ));
    }

    #[test]
    fn classifies_error_response() {
        let payload = json!({"jsonrpc":"2.0","id":7,"error":{"code":-32602,"message":"Invalid parameters"}});
        let IncomingRpc::Response { error, .. } = classify(&payload).unwrap() else {
            panic!("expected response");
        };
        let error = error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.message, "Invalid parameters");
    }

    #[test]
    fn string_ids_are_accepted() {
        let payload = json!({"jsonrpc":"2.0","id":"req-9","result":{}});
        assert!(matches!(
            classify(&payload).unwrap(),
            IncomingRpc::Response { id: RpcId::String(s), .. } if s == "req-9"
        ));
    }

    #[test]
    fn rejects_wrong_jsonrpc_version() {
        let payload = json!({"jsonrpc":"1.0","method":"x","id":1});
        assert!(classify(&payload).is_err());

        let payload = json!({"method":"x","id":1});
        assert!(classify(&payload).is_err());
    }

    #[test]
    fn rejects_shapeless_payload() {
        assert!(classify(&json!({"jsonrpc":"2.0","id":3})).is_err());
        assert!(classify(&json!("string")).is_err());
    }

    #[test]
    fn response_builders_round_trip_through_classify() {
        let ok = response_ok(&RpcId::Number(5), json!({"tools": []}));
        assert!(matches!(
            classify(&ok).unwrap(),
            IncomingRpc::Response { id: RpcId::Number(5), error: None, .. }
        ));

        let err = response_err(&RpcId::Number(6), METHOD_NOT_FOUND, "no such method");
        let IncomingRpc::Response { error, .. } = classify(&err).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(error.unwrap().code, METHOD_NOT_FOUND);
    }
}
