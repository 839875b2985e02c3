//! HTTP router, shared state and the catalog view both front ends serve

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::HeaderMap,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use futures::future::try_join_all;
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::auth::{ApiKeyAuth, auth_middleware};
use super::{rest, rpc};
use crate::invoker::IntegrationInvoker;
use crate::protocol::{Resource, ResourceContents, ResourceTemplate, Tool};
use crate::store::{ConnectionStore, IntegrationCatalog, IntegrationDescriptor};
use crate::{Error, Result};

/// JSON-RPC endpoint
pub const MCP_PATH: &str = "/mcp";

/// Shared application state
pub struct AppState {
    /// User connections
    pub connections: Arc<dyn ConnectionStore>,
    /// Integration catalog
    pub catalog: Arc<dyn IntegrationCatalog>,
    /// Tool call forwarding
    pub invoker: Arc<IntegrationInvoker>,
    /// Authentication
    pub auth: Arc<ApiKeyAuth>,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl AppState {
    /// Catalog entries the user has an enabled connection to, in catalog order
    pub async fn enabled_integrations(&self, user_id: &str) -> Result<Vec<IntegrationDescriptor>> {
        let all = self.catalog.list().await?;
        let connections = try_join_all(
            all.iter()
                .map(|d| self.connections.get_user_connection(user_id, &d.slug)),
        )
        .await?;

        Ok(all
            .into_iter()
            .zip(connections)
            .filter(|(_, c)| c.as_ref().is_some_and(|c| c.enabled))
            .map(|(d, _)| d)
            .collect())
    }

    /// Qualified tools across the user's enabled integrations
    pub async fn list_tools(&self, user_id: &str) -> Result<Vec<Tool>> {
        Ok(self
            .enabled_integrations(user_id)
            .await?
            .iter()
            .flat_map(|d| d.tools.iter().map(|t| Tool::qualified(&d.slug, t)))
            .collect())
    }

    /// Resource templates across the user's enabled integrations
    pub async fn list_resources(&self, user_id: &str) -> Result<(Vec<Resource>, Vec<ResourceTemplate>)> {
        let mut resources = Vec::new();
        let mut templates = Vec::new();
        for descriptor in self.enabled_integrations(user_id).await? {
            for resource in &descriptor.resources {
                if resource.uri_template.contains('{') {
                    templates.push(ResourceTemplate::from(resource));
                } else {
                    resources.push(Resource {
                        uri: resource.uri_template.clone(),
                        name: resource.name.clone(),
                        description: (!resource.description.is_empty())
                            .then(|| resource.description.clone()),
                        mime_type: resource.mime_type.clone(),
                    });
                }
            }
        }
        Ok((resources, templates))
    }

    /// Describe the resource `uri` resolves to
    ///
    /// Resources are metadata only; the contents are the matching template's
    /// description and owning integration, as JSON.
    pub async fn read_resource(&self, user_id: &str, uri: &str) -> Result<ResourceContents> {
        for descriptor in self.enabled_integrations(user_id).await? {
            if let Some(resource) = descriptor.resources.iter().find(|r| r.matches(uri)) {
                let text = json!({
                    "integration": descriptor.slug,
                    "name": resource.name,
                    "description": resource.description,
                    "uriTemplate": resource.uri_template,
                })
                .to_string();
                return Ok(ResourceContents {
                    uri: uri.to_string(),
                    mime_type: Some("application/json".to_string()),
                    text,
                });
            }
        }
        Err(Error::ResourceNotFound(uri.to_string()))
    }

    /// Forward a tool call through the invoker
    pub async fn call_tool(
        &self,
        user_id: &str,
        name: &str,
        arguments: Option<Value>,
        headers: &HeaderMap,
    ) -> Result<Value> {
        self.invoker.invoke(user_id, name, arguments, headers).await
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = Arc::clone(&state.auth);

    Router::new()
        .route("/health", get(health_handler))
        .route(MCP_PATH, post(rpc::mcp_handler))
        .route("/gateway/tools/list", get(rest::tools_list))
        .route("/gateway/tools/call", post(rest::tools_call))
        .route("/gateway/resources/list", get(rest::resources_list))
        .route("/gateway/resources/read", post(rest::resources_read))
        .route(
            "/gateway/prompts/list",
            get(rest::prompts_list).post(rest::prompts_list),
        )
        .route(
            "/gateway/prompts/get",
            get(rest::prompts_get).post(rest::prompts_get),
        )
        // Authentication middleware (applied before other layers)
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .layer(DefaultBodyLimit::max(state.max_body_size))
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
