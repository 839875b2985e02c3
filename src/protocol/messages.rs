//! MCP JSON-RPC message types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Content, Info, Prompt, Resource, ResourceContents, ResourceTemplate, ServerCapabilities, Tool};
use crate::error::rpc_codes;

/// Request ID (string, number, or explicit null)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String ID
    String(String),
    /// Numeric ID, kept as received
    Number(serde_json::Number),
    /// Explicit `null`, echoed back as-is
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl RequestId {
    /// Interpret a JSON `id` member; `None` for types JSON-RPC does not allow
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => Some(Self::Number(n.clone())),
            _ => None,
        }
    }
}

/// Validated JSON-RPC request or notification
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// Request ID; `None` marks a notification
    pub id: Option<RequestId>,
    /// Method name
    pub method: String,
    /// Parameters
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Whether no response may be sent
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Validate a raw envelope
    ///
    /// Absent `id` is a notification; a present `id` (including `null`) is
    /// kept for echoing. Invalid envelopes always produce a response, echoing
    /// the id when it was usable.
    #[allow(clippy::result_large_err)] // JsonRpcResponse used directly as the error envelope
    pub fn parse(value: &Value) -> Result<Self, JsonRpcResponse> {
        let Some(object) = value.as_object() else {
            return Err(JsonRpcResponse::error(
                RequestId::Null,
                rpc_codes::INVALID_REQUEST,
                "Invalid Request: expected an object",
            ));
        };

        let id = match object.get("id") {
            None => None,
            Some(raw) => Some(RequestId::from_value(raw).ok_or_else(|| {
                JsonRpcResponse::error(
                    RequestId::Null,
                    rpc_codes::INVALID_REQUEST,
                    "Invalid Request: id must be a string, number or null",
                )
            })?),
        };
        let reply_id = id.clone().unwrap_or(RequestId::Null);

        if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(JsonRpcResponse::error(
                reply_id,
                rpc_codes::INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            ));
        }

        let method = object
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                JsonRpcResponse::error(
                    reply_id.clone(),
                    rpc_codes::INVALID_REQUEST,
                    "Invalid Request: missing method",
                )
            })?;

        Ok(Self {
            id,
            method: method.to_string(),
            params: object.get("params").cloned(),
        })
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,
    /// Request ID
    pub id: RequestId,
    /// Result (on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Self::failure(
            id,
            JsonRpcError {
                code,
                message: message.into(),
                data: None,
            },
        )
    }

    /// Map a gateway error into the envelope
    #[must_use]
    pub fn from_error(id: RequestId, err: &crate::Error) -> Self {
        Self::failure(id, err.into())
    }

    /// Wrap an already-built error object
    #[must_use]
    pub fn failure(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Optional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&crate::Error> for JsonRpcError {
    fn from(err: &crate::Error) -> Self {
        Self {
            code: err.to_rpc_code(),
            message: err.to_string(),
            data: err.data(),
        }
    }
}

// ============================================================================
// Initialize
// ============================================================================

/// Initialize result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities
    pub capabilities: ServerCapabilities,
    /// Server info
    #[serde(rename = "serverInfo")]
    pub server_info: Info,
    /// Optional instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ============================================================================
// Tools
// ============================================================================

/// Tools list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    /// List of tools
    pub tools: Vec<Tool>,
}

/// Tools call request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    /// Qualified tool name
    pub name: String,
    /// Tool arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Tools call result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallResult {
    /// Content items
    pub content: Vec<Content>,
}

impl ToolsCallResult {
    /// Wrap an integration result as a single text item
    #[must_use]
    pub fn wrap(value: &Value) -> Self {
        Self {
            content: vec![Content::from_result(value)],
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Resources list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesListResult {
    /// Concrete resources
    pub resources: Vec<Resource>,
    /// Parameterized resources
    #[serde(rename = "resourceTemplates", default, skip_serializing_if = "Vec::is_empty")]
    pub resource_templates: Vec<ResourceTemplate>,
}

/// Resources read request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadParams {
    /// URI of the resource to read
    pub uri: String,
}

/// Resources read result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadResult {
    /// Resource contents
    pub contents: Vec<ResourceContents>,
}

// ============================================================================
// Prompts
// ============================================================================

/// Prompts list result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsListResult {
    /// List of prompts
    pub prompts: Vec<Prompt>,
}

/// Prompts get request params
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsGetParams {
    /// Prompt name
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parse_request_with_string_id() {
        let req = JsonRpcRequest::parse(&json!({
            "jsonrpc": "2.0",
            "id": "req-1",
            "method": "tools/list"
        }))
        .unwrap();
        assert_eq!(req.id, Some(RequestId::String("req-1".to_string())));
        assert_eq!(req.method, "tools/list");
        assert!(req.params.is_none());
    }

    #[test]
    fn absent_id_is_notification() {
        let req = JsonRpcRequest::parse(&json!({"jsonrpc": "2.0", "method": "initialized"})).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn null_id_is_a_request() {
        let req = JsonRpcRequest::parse(&json!({"jsonrpc": "2.0", "id": null, "method": "ping"}))
            .unwrap();
        assert_eq!(req.id, Some(RequestId::Null));
        assert!(!req.is_notification());
    }

    #[test]
    fn wrong_version_echoes_id() {
        let err = JsonRpcRequest::parse(&json!({"jsonrpc": "1.0", "id": 7, "method": "ping"}))
            .unwrap_err();
        assert_eq!(err.id, RequestId::Number(7.into()));
        assert_eq!(err.error.unwrap().code, rpc_codes::INVALID_REQUEST);
    }

    #[test]
    fn invalid_id_type_is_invalid_request() {
        for id in [json!({"a": 1}), json!([1]), json!(true)] {
            let err = JsonRpcRequest::parse(&json!({"jsonrpc": "2.0", "id": id, "method": "ping"}))
                .unwrap_err();
            assert_eq!(err.id, RequestId::Null);
            assert_eq!(err.error.unwrap().code, rpc_codes::INVALID_REQUEST);
        }
    }

    #[test]
    fn numeric_ids_are_echoed_verbatim() {
        for id in [json!(u64::MAX), json!(1.5), json!(-3)] {
            let req = JsonRpcRequest::parse(&json!({"jsonrpc": "2.0", "id": id.clone(), "method": "ping"}))
                .unwrap();
            let reply = serde_json::to_value(JsonRpcResponse::success(req.id.unwrap(), json!({})))
                .unwrap();
            assert_eq!(reply["id"], id);
        }
    }

    #[test]
    fn missing_method_and_non_object() {
        let err = JsonRpcRequest::parse(&json!({"jsonrpc": "2.0", "id": 1})).unwrap_err();
        assert_eq!(err.error.unwrap().code, rpc_codes::INVALID_REQUEST);
        let err = JsonRpcRequest::parse(&json!(42)).unwrap_err();
        assert_eq!(err.id, RequestId::Null);
    }

    #[test]
    fn response_serializes_null_id() {
        let v = serde_json::to_value(JsonRpcResponse::success(RequestId::Null, json!({}))).unwrap();
        assert_eq!(v, json!({"jsonrpc": "2.0", "id": null, "result": {}}));
    }

    #[test]
    fn error_envelope_carries_data() {
        let err = crate::Error::Upstream {
            status: 500,
            body: "boom".into(),
        };
        let resp = JsonRpcResponse::from_error(RequestId::Number(1.into()), &err);
        let e = resp.error.unwrap();
        assert_eq!(e.code, rpc_codes::UPSTREAM_ERROR);
        assert_eq!(e.data.unwrap()["details"], "boom");
    }

    #[test]
    fn tools_call_result_wraps_json() {
        let v = serde_json::to_value(ToolsCallResult::wrap(&json!([1, 2]))).unwrap();
        assert_eq!(v, json!({"content": [{"type": "text", "text": "[1,2]"}]}));
    }
}
