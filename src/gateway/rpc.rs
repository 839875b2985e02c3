//! JSON-RPC 2.0 front end (`POST /mcp`)
//!
//! Accepts one message or a batch. Batch elements run concurrently and
//! responses keep input order; notifications are handled but never answered.
//! Protocol and application errors stay inside the envelope (HTTP 200), except
//! an unparseable body, which is a 400.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::debug;

use super::auth::AuthenticatedUser;
use super::router::AppState;
use crate::Error;
use crate::error::rpc_codes;
use crate::protocol::{
    Info, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
    PromptsCapability, PromptsListResult, RequestId, ResourcesCapability, ResourcesListResult,
    ServerCapabilities, ToolsCallParams, ToolsCallResult, ToolsCapability, ToolsListResult,
};
use crate::store::User;

/// Per-HTTP-request context shared by every message of a batch
struct RpcContext<'a> {
    state: &'a AppState,
    user: Option<&'a User>,
    headers: &'a HeaderMap,
}

impl RpcContext<'_> {
    fn require_user(&self) -> Result<&User, JsonRpcError> {
        self.user.ok_or_else(|| {
            JsonRpcError::from(&Error::Authentication(
                "missing or invalid API key".to_string(),
            ))
        })
    }
}

/// POST /mcp handler
pub async fn mcp_handler(
    State(state): State<Arc<AppState>>,
    http_request: Request<Body>,
) -> Response {
    let headers = http_request.headers().clone();
    let user = http_request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.clone());

    let body_bytes =
        match axum::body::to_bytes(http_request.into_body(), state.max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => return parse_error(&format!("Failed to read body: {e}")),
        };

    let message: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => return parse_error(&format!("Parse error: {e}")),
    };

    let ctx = RpcContext {
        state: &state,
        user: user.as_ref(),
        headers: &headers,
    };

    match message {
        Value::Array(items) if items.is_empty() => Json(JsonRpcResponse::error(
            RequestId::Null,
            rpc_codes::INVALID_REQUEST,
            "Invalid Request: empty batch",
        ))
        .into_response(),
        Value::Array(items) => {
            let responses: Vec<JsonRpcResponse> =
                join_all(items.iter().map(|item| handle_message(&ctx, item)))
                    .await
                    .into_iter()
                    .flatten()
                    .collect();
            if responses.is_empty() {
                StatusCode::ACCEPTED.into_response()
            } else {
                Json(responses).into_response()
            }
        }
        single => match handle_message(&ctx, &single).await {
            Some(response) => Json(response).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        },
    }
}

fn parse_error(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::error(
            RequestId::Null,
            rpc_codes::PARSE_ERROR,
            message,
        )),
    )
        .into_response()
}

/// Handle one envelope; `None` for notifications
async fn handle_message(ctx: &RpcContext<'_>, raw: &Value) -> Option<JsonRpcResponse> {
    let request = match JsonRpcRequest::parse(raw) {
        Ok(r) => r,
        Err(response) => return Some(response),
    };

    let outcome = dispatch(ctx, &request).await;

    let Some(id) = request.id else {
        if let Err(e) = outcome {
            debug!(method = %request.method, code = e.code, "Notification failed (no response sent)");
        }
        return None;
    };

    Some(match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    })
}

async fn dispatch(ctx: &RpcContext<'_>, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    debug!(method = %request.method, "JSON-RPC request");

    match request.method.as_str() {
        "initialize" => to_value(&initialize_result()),
        "initialized" | "notifications/initialized" | "ping" => Ok(json!({})),
        "tools/list" => {
            let user = ctx.require_user()?;
            let tools = ctx
                .state
                .list_tools(&user.id)
                .await
                .map_err(|e| JsonRpcError::from(&e))?;
            to_value(&ToolsListResult { tools })
        }
        "tools/call" => {
            let user = ctx.require_user()?;
            let params: ToolsCallParams =
                serde_json::from_value(request.params.clone().unwrap_or(Value::Null)).map_err(
                    |e| JsonRpcError {
                        code: rpc_codes::INVALID_PARAMS,
                        message: format!("Invalid params: tools/call requires params.name ({e})"),
                        data: None,
                    },
                )?;
            let result = ctx
                .state
                .call_tool(&user.id, &params.name, params.arguments, ctx.headers)
                .await
                .map_err(|e| JsonRpcError::from(&e))?;
            to_value(&ToolsCallResult::wrap(&result))
        }
        "resources/list" => {
            let user = ctx.require_user()?;
            let (resources, resource_templates) = ctx
                .state
                .list_resources(&user.id)
                .await
                .map_err(|e| JsonRpcError::from(&e))?;
            to_value(&ResourcesListResult {
                resources,
                resource_templates,
            })
        }
        "prompts/list" => to_value(&PromptsListResult::default()),
        other => Err(JsonRpcError {
            code: rpc_codes::METHOD_NOT_FOUND,
            message: format!("Method not found: {other}"),
            data: None,
        }),
    }
}

fn initialize_result() -> InitializeResult {
    InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            experimental: None,
            prompts: Some(PromptsCapability::default()),
            resources: Some(ResourcesCapability::default()),
            tools: Some(ToolsCapability::default()),
        },
        server_info: Info {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        instructions: Some(
            "Tools are addressed as `<integration>/<tool>`; call tools/list for the integrations enabled on your account."
                .to_string(),
        ),
    }
}

fn to_value<T: serde::Serialize>(result: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(result).map_err(|e| JsonRpcError::from(&Error::Json(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_advertises_protocol_and_capabilities() {
        let v = serde_json::to_value(initialize_result()).unwrap();
        assert_eq!(v["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(v["serverInfo"]["name"], "integration-gateway");
        assert!(v["capabilities"]["tools"].is_object());
        assert!(v["capabilities"]["resources"].is_object());
    }
}
