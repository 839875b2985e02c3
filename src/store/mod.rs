//! Collaborator interfaces: users, connections, integration catalog, usage sinks
//!
//! The gateway never owns persistence. Each collaborator is a trait so the
//! document store, identity provider and analytics warehouse can be plugged in;
//! [`memory`] provides `DashMap`-backed implementations for tests and the
//! standalone binary.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::telemetry::AnalyticsRecord;

pub use memory::{
    InMemoryAnalytics, InMemoryCatalog, InMemoryConnectionStore, InMemoryUsageLog,
    InMemoryUserDirectory,
};

/// Authenticated gateway user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable user id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
}

/// Tool exposed by an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationTool {
    /// Tool name, unique within the integration
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Input JSON Schema
    #[serde(default = "empty_object_schema", alias = "schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

/// Resource exposed by an integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationResource {
    /// URI template (e.g. `github://repos/{owner}/{repo}`)
    pub uri_template: String,
    /// Short name
    #[serde(default)]
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// MIME type of the resource contents
    #[serde(default)]
    pub mime_type: Option<String>,
}

impl IntegrationResource {
    /// Whether `uri` falls under this template (literal prefix before the first `{`)
    #[must_use]
    pub fn matches(&self, uri: &str) -> bool {
        match self.uri_template.split_once('{') {
            Some((prefix, _)) => !prefix.is_empty() && uri.starts_with(prefix),
            None => uri == self.uri_template,
        }
    }
}

/// Integration as published in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationDescriptor {
    /// Catalog id
    pub id: String,
    /// Addressing slug (`github`, `linear`, ...)
    pub slug: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Invocation endpoint the gateway POSTs tool calls to
    pub function_path: String,
    /// Tools
    #[serde(default)]
    pub tools: Vec<IntegrationTool>,
    /// Resources
    #[serde(default)]
    pub resources: Vec<IntegrationResource>,
}

/// A user's connection to one integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIntegrationConnection {
    /// Owning user
    pub user_id: String,
    /// Catalog id of the integration
    pub integration_id: String,
    /// Integration slug
    pub slug: String,
    /// Whether the user enabled the integration
    pub enabled: bool,
    /// Encrypted `OAuthToken` envelope
    #[serde(default)]
    pub oauth_token_encrypted: Option<String>,
    /// When the stored token was issued (epoch ms)
    #[serde(default)]
    pub token_issued_at: Option<i64>,
}

/// Partial update applied atomically by [`ConnectionStore::enable_integration`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionPatch {
    /// New enabled flag
    pub enabled: Option<bool>,
    /// Replacement token envelope
    pub oauth_token_encrypted: Option<String>,
    /// Replacement issue time
    pub token_issued_at: Option<i64>,
}

impl ConnectionPatch {
    /// Patch that replaces the stored token wholesale
    #[must_use]
    pub fn replace_token(encrypted: String, issued_at: i64) -> Self {
        Self {
            enabled: None,
            oauth_token_encrypted: Some(encrypted),
            token_issued_at: Some(issued_at),
        }
    }

    /// Apply to a connection in place
    pub fn apply(&self, connection: &mut UserIntegrationConnection) {
        if let Some(enabled) = self.enabled {
            connection.enabled = enabled;
        }
        if let Some(ref encrypted) = self.oauth_token_encrypted {
            connection.oauth_token_encrypted = Some(encrypted.clone());
        }
        if let Some(issued_at) = self.token_issued_at {
            connection.token_issued_at = Some(issued_at);
        }
    }
}

/// Outcome status shared by usage entries and analytics records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// 2xx from the integration
    Success,
    /// Any other failure after dispatch
    Error,
    /// 429 from the integration
    RateLimited,
}

impl CallStatus {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Per-user usage log entry (not anonymized; billing/quotas)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    /// User who made the call
    pub user_id: String,
    /// Integration catalog id
    pub integration_id: String,
    /// Qualified tool name
    pub tool_name: String,
    /// End-to-end latency of the upstream call
    pub latency_ms: u64,
    /// Outcome
    pub status: CallStatus,
}

/// Identity provider: API key hash -> user
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Resolve a hashed API key
    async fn get_user_by_api_key(&self, key_hash: &str) -> Result<Option<User>>;
}

/// Connection persistence
#[async_trait]
pub trait ConnectionStore: Send + Sync + 'static {
    /// Connection of `user_id` to the integration addressed by `slug`
    async fn get_user_connection(
        &self,
        user_id: &str,
        slug: &str,
    ) -> Result<Option<UserIntegrationConnection>>;

    /// Atomically apply `patch` to an existing connection
    async fn enable_integration(
        &self,
        user_id: &str,
        integration_id: &str,
        patch: ConnectionPatch,
    ) -> Result<()>;
}

/// Integration catalog
#[async_trait]
pub trait IntegrationCatalog: Send + Sync + 'static {
    /// Look up by slug
    async fn get_by_slug(&self, slug: &str) -> Result<Option<IntegrationDescriptor>>;

    /// All published integrations
    async fn list(&self) -> Result<Vec<IntegrationDescriptor>>;
}

/// Usage log sink
#[async_trait]
pub trait UsageLog: Send + Sync + 'static {
    /// Record one usage entry
    async fn log(&self, entry: UsageEntry) -> Result<()>;
}

/// Analytics sink
#[async_trait]
pub trait AnalyticsSink: Send + Sync + 'static {
    /// Record one anonymized tool call
    async fn log_tool_call(&self, record: AnalyticsRecord) -> Result<()>;
}
