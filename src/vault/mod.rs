//! Credential vault
//!
//! Holds users' OAuth tokens encrypted at rest, hands out valid access tokens,
//! and refreshes-and-persists expired ones. A failed refresh leaves the stored
//! token untouched; a successful one replaces it wholesale.

pub mod crypto;
pub mod provider;
pub mod token;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use crypto::{TokenCipher, connection_aad};
pub use provider::{OAuthProviderConfig, ProviderRegistry};
pub use token::{EXPIRY_SKEW_MS, OAuthToken, is_expired};

use crate::clock::Clock;
use crate::error::CredentialFailure;
use crate::store::{ConnectionPatch, ConnectionStore, UserIntegrationConnection};
use crate::{Error, Result};

/// Issues valid access tokens for user connections
pub struct CredentialVault {
    cipher: TokenCipher,
    providers: Arc<ProviderRegistry>,
    connections: Arc<dyn ConnectionStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialVault {
    /// Create a vault
    #[must_use]
    pub fn new(
        cipher: TokenCipher,
        providers: ProviderRegistry,
        connections: Arc<dyn ConnectionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cipher,
            providers: Arc::new(providers),
            connections,
            clock,
        }
    }

    /// Cipher used for stored tokens
    #[must_use]
    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    /// Encrypt a freshly issued token for storage on `user_id`'s connection
    /// to `integration_id`
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn seal(
        &self,
        user_id: &str,
        integration_id: &str,
        token: &OAuthToken,
    ) -> Result<ConnectionPatch> {
        let encrypted = self
            .cipher
            .encrypt_token(token, &connection_aad(user_id, integration_id))?;
        Ok(ConnectionPatch::replace_token(encrypted, self.clock.now_ms()))
    }

    /// Valid access token for `connection`, refreshing and persisting if expired
    ///
    /// The refresh runs on its own task: once started, the provider call and
    /// the store write both complete even if the caller is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Credential` naming only `slug`; token material never
    /// appears in the error.
    pub async fn get_valid_access_token(
        &self,
        connection: &UserIntegrationConnection,
        slug: &str,
    ) -> Result<String> {
        let encrypted = connection
            .oauth_token_encrypted
            .as_deref()
            .ok_or_else(|| Error::credential(slug, CredentialFailure::Corrupt))?;

        let aad = connection_aad(&connection.user_id, &connection.integration_id);
        let token = self.cipher.decrypt_token(encrypted, &aad).map_err(|e| {
            warn!(provider = %slug, error = %e, "Stored token could not be read");
            Error::credential(slug, CredentialFailure::Corrupt)
        })?;

        let issued_at = connection.token_issued_at.unwrap_or(0);
        let now = self.clock.now_ms();
        if !is_expired(&token, issued_at, now) {
            return Ok(token.access_token);
        }

        let refresh_token = token
            .refresh_token
            .ok_or_else(|| Error::credential(slug, CredentialFailure::NoRefreshToken))?;

        debug!(provider = %slug, user = %connection.user_id, "Access token expired");
        let job = RefreshJob {
            cipher: self.cipher.clone(),
            providers: Arc::clone(&self.providers),
            connections: Arc::clone(&self.connections),
            clock: Arc::clone(&self.clock),
            user_id: connection.user_id.clone(),
            integration_id: connection.integration_id.clone(),
            slug: slug.to_string(),
            refresh_token,
        };

        tokio::spawn(job.run()).await.map_err(|e| {
            warn!(provider = %slug, error = %e, "Token refresh task did not complete");
            Error::credential(
                slug,
                CredentialFailure::RefreshFailed("refresh task aborted".to_string()),
            )
        })?
    }
}

/// Refresh, re-encrypt and persist one connection's token
struct RefreshJob {
    cipher: TokenCipher,
    providers: Arc<ProviderRegistry>,
    connections: Arc<dyn ConnectionStore>,
    clock: Arc<dyn Clock>,
    user_id: String,
    integration_id: String,
    slug: String,
    refresh_token: String,
}

impl RefreshJob {
    async fn run(self) -> Result<String> {
        let slug = self.slug.as_str();
        let refreshed = self
            .providers
            .refresh(slug, &self.refresh_token)
            .await
            .map_err(|reason| Error::credential(slug, reason))?;

        let aad = connection_aad(&self.user_id, &self.integration_id);
        let envelope = self.cipher.encrypt_token(&refreshed, &aad).map_err(|e| {
            Error::credential(slug, CredentialFailure::PersistFailed(e.to_string()))
        })?;
        let patch = ConnectionPatch::replace_token(envelope, self.clock.now_ms());

        self.connections
            .enable_integration(&self.user_id, &self.integration_id, patch)
            .await
            .map_err(|e| {
                warn!(provider = %slug, error = %e, "Refreshed token could not be stored");
                Error::credential(slug, CredentialFailure::PersistFailed(e.to_string()))
            })?;

        info!(provider = %slug, user = %self.user_id, "Token refreshed");
        Ok(refreshed.access_token)
    }
}
