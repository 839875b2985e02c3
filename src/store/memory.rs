//! In-memory collaborator implementations backed by `DashMap`

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{
    AnalyticsSink, ConnectionPatch, ConnectionStore, IntegrationCatalog, IntegrationDescriptor,
    UsageEntry, UsageLog, User, UserDirectory, UserIntegrationConnection,
};
use crate::telemetry::AnalyticsRecord;
use crate::{Error, Result};

/// Users indexed by API key hash
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    by_key_hash: DashMap<String, User>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user under an already-hashed API key
    pub fn insert(&self, key_hash: impl Into<String>, user: User) {
        self.by_key_hash.insert(key_hash.into(), user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user_by_api_key(&self, key_hash: &str) -> Result<Option<User>> {
        Ok(self.by_key_hash.get(key_hash).map(|u| u.clone()))
    }
}

/// Connections keyed by `(user_id, integration_id)`, indexed by `(user_id, slug)`
#[derive(Debug, Default)]
pub struct InMemoryConnectionStore {
    connections: DashMap<(String, String), UserIntegrationConnection>,
    by_slug: DashMap<(String, String), String>,
}

impl InMemoryConnectionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a connection
    pub fn insert(&self, connection: UserIntegrationConnection) {
        let slug = connection.slug.clone();
        self.by_slug.insert(
            (connection.user_id.clone(), slug.clone()),
            connection.integration_id.clone(),
        );
        let key = (
            connection.user_id.clone(),
            connection.integration_id.clone(),
        );
        if let Some(previous) = self.connections.insert(key, connection)
            && previous.slug != slug
        {
            self.by_slug
                .remove_if(&(previous.user_id, previous.slug), |_, id| {
                    *id == previous.integration_id
                });
        }
    }

    /// Number of stored connections
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn get_user_connection(
        &self,
        user_id: &str,
        slug: &str,
    ) -> Result<Option<UserIntegrationConnection>> {
        let Some(integration_id) = self
            .by_slug
            .get(&(user_id.to_string(), slug.to_string()))
            .map(|id| id.value().clone())
        else {
            return Ok(None);
        };
        Ok(self
            .connections
            .get(&(user_id.to_string(), integration_id))
            .map(|entry| entry.value().clone()))
    }

    async fn enable_integration(
        &self,
        user_id: &str,
        integration_id: &str,
        patch: ConnectionPatch,
    ) -> Result<()> {
        // get_mut holds the shard write lock for the whole patch
        let mut entry = self
            .connections
            .get_mut(&(user_id.to_string(), integration_id.to_string()))
            .ok_or_else(|| {
                Error::Store(format!(
                    "no connection for integration '{integration_id}'"
                ))
            })?;
        patch.apply(entry.value_mut());
        Ok(())
    }
}

/// Integration catalog keyed by slug
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    by_slug: DashMap<String, IntegrationDescriptor>,
}

impl InMemoryCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an integration
    pub fn insert(&self, descriptor: IntegrationDescriptor) {
        self.by_slug.insert(descriptor.slug.clone(), descriptor);
    }
}

#[async_trait]
impl IntegrationCatalog for InMemoryCatalog {
    async fn get_by_slug(&self, slug: &str) -> Result<Option<IntegrationDescriptor>> {
        Ok(self.by_slug.get(slug).map(|d| d.clone()))
    }

    async fn list(&self) -> Result<Vec<IntegrationDescriptor>> {
        let mut all: Vec<IntegrationDescriptor> =
            self.by_slug.iter().map(|d| d.value().clone()).collect();
        all.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(all)
    }
}

/// Usage log that keeps every entry in memory
#[derive(Debug, Default)]
pub struct InMemoryUsageLog {
    entries: Mutex<Vec<UsageEntry>>,
}

impl InMemoryUsageLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded entries
    #[must_use]
    pub fn entries(&self) -> Vec<UsageEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl UsageLog for InMemoryUsageLog {
    async fn log(&self, entry: UsageEntry) -> Result<()> {
        self.entries.lock().push(entry);
        Ok(())
    }
}

/// Analytics sink that keeps every record in memory
#[derive(Debug, Default)]
pub struct InMemoryAnalytics {
    records: Mutex<Vec<AnalyticsRecord>>,
}

impl InMemoryAnalytics {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded analytics
    #[must_use]
    pub fn records(&self) -> Vec<AnalyticsRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AnalyticsSink for InMemoryAnalytics {
    async fn log_tool_call(&self, record: AnalyticsRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }
}
