//! REST gateway handlers (`/gateway/*`)
//!
//! Every route sits behind the auth middleware, so a handler only runs with an
//! [`AuthenticatedUser`] in the request extensions. Errors render through
//! `Error`'s `IntoResponse`.

use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Query, State, rejection::JsonRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::auth::AuthenticatedUser;
use super::router::AppState;
use crate::Error;
use crate::protocol::{
    PromptsGetParams, PromptsListResult, ResourcesListResult, ResourcesReadParams,
    ResourcesReadResult, ToolsCallParams, ToolsListResult,
};

fn invalid_body(rejection: &JsonRejection) -> Error {
    Error::InvalidParams(rejection.body_text())
}

/// GET /gateway/tools/list
pub async fn tools_list(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Response {
    match state.list_tools(&user.id).await {
        Ok(tools) => Json(ToolsListResult { tools }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /gateway/tools/call
///
/// Returns the integration's JSON unwrapped.
pub async fn tools_call(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    params: Result<Json<ToolsCallParams>, JsonRejection>,
) -> Response {
    let Json(params) = match params {
        Ok(p) => p,
        Err(rejection) => return invalid_body(&rejection).into_response(),
    };
    debug!(user = %user.id, tool = %params.name, "REST tool call");

    match state
        .call_tool(&user.id, &params.name, params.arguments, &headers)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /gateway/resources/list
pub async fn resources_list(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Response {
    match state.list_resources(&user.id).await {
        Ok((resources, resource_templates)) => Json(ResourcesListResult {
            resources,
            resource_templates,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /gateway/resources/read
pub async fn resources_read(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    params: Result<Json<ResourcesReadParams>, JsonRejection>,
) -> Response {
    let Json(params) = match params {
        Ok(p) => p,
        Err(rejection) => return invalid_body(&rejection).into_response(),
    };

    match state.read_resource(&user.id, &params.uri).await {
        Ok(contents) => Json(ResourcesReadResult {
            contents: vec![contents],
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET|POST /gateway/prompts/list
pub async fn prompts_list(Extension(_user): Extension<AuthenticatedUser>) -> Response {
    Json(PromptsListResult::default()).into_response()
}

/// GET|POST /gateway/prompts/get
///
/// No integration publishes prompts, so every name is unknown.
pub async fn prompts_get(
    Extension(_user): Extension<AuthenticatedUser>,
    Query(query): Query<PromptsGetParams>,
    body: Bytes,
) -> Response {
    let params = match body_or(query, &body) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };
    Error::PromptNotFound(params.name).into_response()
}

/// Parameters from a JSON body when present, otherwise from the query string
fn body_or<T: DeserializeOwned>(query: T, body: &[u8]) -> Result<T, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(query);
    }
    serde_json::from_slice(body).map_err(|e| Error::InvalidParams(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_wins_over_query() {
        let p: PromptsGetParams = body_or(
            PromptsGetParams {
                name: "from-query".into(),
            },
            br#"{"name": "from-body"}"#,
        )
        .unwrap();
        assert_eq!(p.name, "from-body");
    }

    #[test]
    fn empty_body_falls_back_to_query() {
        let p = body_or(
            PromptsGetParams {
                name: "from-query".into(),
            },
            b"  ",
        )
        .unwrap();
        assert_eq!(p.name, "from-query");
    }

    #[test]
    fn malformed_body_is_invalid_params() {
        let err = body_or(PromptsGetParams::default(), b"{").unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }
}
