//! Integration invoker
//!
//! Resolves a `slug/tool` call to the user's connection, obtains a valid access
//! token, forwards the call to the integration endpoint, and normalizes the
//! outcome. Telemetry is recorded once per dispatched call.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use reqwest::Client;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use gateway_core::ToolAddress;

use crate::config::InvokerConfig;
use crate::error::CredentialFailure;
use crate::store::{ConnectionStore, IntegrationCatalog};
use crate::telemetry::Telemetry;
use crate::vault::CredentialVault;
use crate::{Error, Result};

/// Forwards tool calls to integration endpoints
pub struct IntegrationInvoker {
    http_client: Client,
    connections: Arc<dyn ConnectionStore>,
    catalog: Arc<dyn IntegrationCatalog>,
    vault: Arc<CredentialVault>,
    telemetry: Arc<Telemetry>,
    token_header: HeaderName,
    config: InvokerConfig,
}

impl IntegrationInvoker {
    /// Create an invoker
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configured token header is not a valid header name.
    pub fn new(
        config: InvokerConfig,
        http_client: Client,
        connections: Arc<dyn ConnectionStore>,
        catalog: Arc<dyn IntegrationCatalog>,
        vault: Arc<CredentialVault>,
        telemetry: Arc<Telemetry>,
    ) -> Result<Self> {
        let token_header: HeaderName = config.token_header.parse().map_err(|_| {
            Error::Config(format!("invalid token header '{}'", config.token_header))
        })?;
        Ok(Self {
            http_client,
            connections,
            catalog,
            vault,
            telemetry,
            token_header,
            config,
        })
    }

    /// Telemetry pipeline
    #[must_use]
    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Invoke `tool_name` on behalf of `user_id`
    ///
    /// # Errors
    ///
    /// `InvalidToolName`, `IntegrationDisabled`, `IntegrationNotFound` and
    /// `Credential` are returned before anything is sent upstream.
    /// `RateLimited`, `Upstream` and `Transport` describe the upstream outcome.
    pub async fn invoke(
        &self,
        user_id: &str,
        tool_name: &str,
        arguments: Option<Value>,
        headers: &HeaderMap,
    ) -> Result<Value> {
        let address = gateway_core::resolve(tool_name)?;

        let connection = self
            .connections
            .get_user_connection(user_id, &address.slug)
            .await?
            .filter(|c| c.enabled)
            .ok_or_else(|| Error::IntegrationDisabled(address.slug.clone()))?;

        let descriptor = self
            .catalog
            .get_by_slug(&address.slug)
            .await?
            .ok_or_else(|| Error::IntegrationNotFound(address.slug.clone()))?;

        let access_token = if connection.oauth_token_encrypted.is_some() {
            Some(
                self.vault
                    .get_valid_access_token(&connection, &address.slug)
                    .await?,
            )
        } else {
            None
        };

        let qualified = address.qualified();
        let ctx = self
            .telemetry
            .begin(headers, &address.slug, &qualified, arguments.as_ref());

        let call = OutboundCall {
            client: self.http_client.clone(),
            function_path: descriptor.function_path,
            token_header: self.token_header.clone(),
            timeout: self.config.timeout,
            address,
            arguments,
            access_token,
        };
        let telemetry = Arc::clone(&self.telemetry);
        let user_id = user_id.to_string();
        let integration_id = connection.integration_id;

        // Detached: a dispatched call is recorded even if the caller is dropped
        let task = tokio::spawn(async move {
            let slug = call.address.slug.clone();
            let tool = call.address.tool.clone();
            let outcome = call.send().await;

            let latency_ms = telemetry.now_ms().saturating_sub(ctx.started_at());
            match &outcome {
                Ok(_) => info!(slug = %slug, tool = %tool, latency_ms, "Tool call succeeded"),
                Err(e) => warn!(slug = %slug, tool = %tool, latency_ms, error = %e, "Tool call failed"),
            }

            telemetry.finish(ctx, &user_id, &integration_id, &outcome);
            outcome
        });

        task.await
            .map_err(|e| Error::Internal(format!("tool call task failed: {e}")))?
    }
}

/// One outbound POST to an integration endpoint
struct OutboundCall {
    client: Client,
    function_path: String,
    token_header: HeaderName,
    timeout: Duration,
    address: ToolAddress,
    arguments: Option<Value>,
    access_token: Option<String>,
}

impl OutboundCall {
    async fn send(self) -> Result<Value> {
        let address = &self.address;
        let body = json!({
            "toolName": address.tool,
            "arguments": self.arguments.unwrap_or_else(|| json!({})),
        });

        let mut request = self
            .client
            .post(&self.function_path)
            .timeout(self.timeout)
            .json(&body);

        if let Some(token) = self.access_token.as_deref() {
            // never echo the token in the error
            let value = HeaderValue::from_str(token)
                .map_err(|_| Error::credential(&address.slug, CredentialFailure::Corrupt))?;
            request = request.header(self.token_header, value);
        }

        debug!(slug = %address.slug, tool = %address.tool, "Dispatching tool call");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Transport(format!("request to '{}' timed out", address.slug))
            } else {
                Error::Transport(format!("request to '{}' failed: {e}", address.slug))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let hint = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let limit_type = hint("x-ratelimit-type");
            let retry_after = hint("retry-after");
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RateLimited {
                slug: address.slug.clone(),
                limit_type,
                retry_after,
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text)))
    }
}
