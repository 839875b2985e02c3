//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};

use super::auth::ApiKeyAuth;
use super::router::{AppState, MCP_PATH, create_router};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, VaultConfig};
use crate::invoker::IntegrationInvoker;
use crate::store::{
    AnalyticsSink, ConnectionStore, InMemoryAnalytics, InMemoryCatalog, InMemoryConnectionStore,
    InMemoryUsageLog, InMemoryUserDirectory, IntegrationCatalog, UsageLog, UserDirectory,
    UserIntegrationConnection,
};
use crate::telemetry::{Telemetry, TelemetryEmitter};
use crate::vault::{CredentialVault, ProviderRegistry, TokenCipher};
use crate::{Error, Result};

/// External systems the gateway talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Identity provider
    pub users: Arc<dyn UserDirectory>,
    /// Connection persistence
    pub connections: Arc<dyn ConnectionStore>,
    /// Integration catalog
    pub catalog: Arc<dyn IntegrationCatalog>,
    /// Usage log sink
    pub usage: Arc<dyn UsageLog>,
    /// Analytics sink
    pub analytics: Arc<dyn AnalyticsSink>,
}

/// Integration gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared handler state
    state: Arc<AppState>,
    /// Credential vault
    vault: Arc<CredentialVault>,
    /// Telemetry pipeline
    telemetry: Arc<Telemetry>,
    /// Shutdown flag
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Gateway {
    /// Create a gateway backed by in-memory stores seeded from `config.seed`
    ///
    /// Must be called inside a Tokio runtime (the telemetry worker is spawned here).
    pub async fn new(config: Config) -> Result<Self> {
        let users = Arc::new(InMemoryUserDirectory::new());
        for seeded in &config.seed.users {
            match seeded.key_hash() {
                Some(hash) => users.insert(hash, seeded.user.clone()),
                None => warn!(user = %seeded.user.id, "Seeded user has no API key, skipping"),
            }
        }

        let catalog = Arc::new(InMemoryCatalog::new());
        for integration in &config.seed.integrations {
            debug!(slug = %integration.slug, tools = integration.tools.len(), "Registered integration");
            catalog.insert(integration.clone());
        }

        let connections = Arc::new(InMemoryConnectionStore::new());
        let seed = config.seed.connections.clone();

        let gateway = Self::with_collaborators(
            config,
            Collaborators {
                users,
                connections: connections.clone(),
                catalog,
                usage: Arc::new(InMemoryUsageLog::new()),
                analytics: Arc::new(InMemoryAnalytics::new()),
            },
            Arc::new(SystemClock),
        )?;

        for seeded in seed {
            let mut connection = UserIntegrationConnection {
                user_id: seeded.user_id,
                integration_id: seeded.integration_id,
                slug: seeded.slug,
                enabled: seeded.enabled,
                oauth_token_encrypted: None,
                token_issued_at: None,
            };
            if let Some(token) = &seeded.token {
                gateway
                    .vault
                    .seal(&connection.user_id, &connection.integration_id, token)?
                    .apply(&mut connection);
            }
            connections.insert(connection);
        }

        Ok(gateway)
    }

    /// Create a gateway over caller-provided collaborators
    ///
    /// Must be called inside a Tokio runtime.
    pub fn with_collaborators(
        config: Config,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        let vault = Arc::new(CredentialVault::new(
            vault_cipher(&config.vault)?,
            ProviderRegistry::new(config.providers.clone(), http_client.clone())
                .with_timeout(config.invoker.timeout),
            Arc::clone(&collaborators.connections),
            Arc::clone(&clock),
        ));

        let telemetry = Arc::new(Telemetry::new(
            config.telemetry.clone(),
            TelemetryEmitter::spawn(collaborators.usage, collaborators.analytics),
            clock,
        ));

        let invoker = Arc::new(IntegrationInvoker::new(
            config.invoker.clone(),
            http_client,
            Arc::clone(&collaborators.connections),
            Arc::clone(&collaborators.catalog),
            Arc::clone(&vault),
            Arc::clone(&telemetry),
        )?);

        let auth = Arc::new(ApiKeyAuth::from_config(&config.auth, collaborators.users)?);

        let state = Arc::new(AppState {
            connections: collaborators.connections,
            catalog: collaborators.catalog,
            invoker,
            auth,
            max_body_size: config.server.max_body_size,
            request_timeout: config.server.request_timeout,
        });

        Ok(Self {
            config,
            state,
            vault,
            telemetry,
            shutdown_tx: None,
        })
    }

    /// Router serving both front ends
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    /// Credential vault
    #[must_use]
    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    /// Deliver queued telemetry and stop its worker
    pub async fn shutdown(&self) {
        self.telemetry.shutdown().await;
    }

    /// Run the gateway
    pub async fn run(mut self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("INTEGRATION GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            integrations = self.config.seed.integrations.len(),
            providers = self.config.providers.len(),
            "Catalog loaded"
        );
        info!(
            "  POST http://{}:{}{MCP_PATH}  (JSON-RPC)",
            self.config.server.host, self.config.server.port
        );
        info!(
            "  http://{}:{}/gateway/*  (REST)",
            self.config.server.host, self.config.server.port
        );
        if self.config.auth.rate_limit_per_minute > 0 {
            info!(
                per_minute = self.config.auth.rate_limit_per_minute,
                "Per-user rate limit enabled"
            );
        }
        if !self.config.telemetry.enabled {
            warn!("Analytics disabled - only usage entries are recorded");
        }
        info!("============================================================");

        let telemetry = Arc::clone(&self.telemetry);
        let sweep_interval = self.config.telemetry.sweep_interval;
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            if sweep_interval.is_zero() {
                return;
            }

            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        telemetry.sweep();
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Flushing telemetry...");
        self.shutdown().await;

        Ok(())
    }
}

/// Cipher for stored tokens; an unset key gets a per-process one
fn vault_cipher(config: &VaultConfig) -> Result<TokenCipher> {
    if config.encryption_key.is_empty() {
        warn!("vault.encryption_key not set - using an ephemeral key, stored tokens will not survive a restart");
        return TokenCipher::from_config_key(&TokenCipher::generate_key());
    }
    TokenCipher::from_config_key(&config.encryption_key)
}

async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_vault_key_is_used() {
        let key = TokenCipher::generate_key();
        let a = vault_cipher(&VaultConfig {
            encryption_key: key.clone(),
        })
        .unwrap();
        let b = vault_cipher(&VaultConfig {
            encryption_key: key,
        })
        .unwrap();
        let sealed = a.encrypt(b"hello", b"").unwrap();
        assert_eq!(b.decrypt(&sealed, b"").unwrap(), b"hello");
    }

    #[test]
    fn empty_vault_key_gets_an_ephemeral_one() {
        let cipher = vault_cipher(&VaultConfig::default()).unwrap();
        let sealed = cipher.encrypt(b"x", b"").unwrap();
        assert_eq!(cipher.decrypt(&sealed, b"").unwrap(), b"x");
    }
}
