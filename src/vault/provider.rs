//! OAuth provider registry and refresh-token grant

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::token::OAuthToken;
use crate::error::CredentialFailure;

/// OAuth2 client settings for one integration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthProviderConfig {
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret (supports `${VAR}` expansion)
    pub client_secret: String,
    /// Authorization endpoint
    pub authorization_url: String,
    /// Token endpoint used for refresh
    pub token_url: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

/// Refresh calls give up after this long unless configured otherwise
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider configs keyed by integration slug
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, OAuthProviderConfig>,
    http_client: Client,
    timeout: Duration,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(HashMap::new(), Client::new())
    }
}

impl ProviderRegistry {
    /// Create a registry
    #[must_use]
    pub fn new(providers: HashMap<String, OAuthProviderConfig>, http_client: Client) -> Self {
        Self {
            providers,
            http_client,
            timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    /// Per-call timeout for token endpoint requests
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Provider for `slug`
    #[must_use]
    pub fn get(&self, slug: &str) -> Option<&OAuthProviderConfig> {
        self.providers.get(slug)
    }

    /// Registered slugs
    pub fn slugs(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    /// Exchange a refresh token for a new token
    ///
    /// When the provider omits `refresh_token`, the one passed in is kept.
    ///
    /// # Errors
    ///
    /// `UnsupportedProvider` if `slug` is not registered, `RefreshFailed` on
    /// transport errors, non-2xx responses, or unparseable bodies.
    pub async fn refresh(
        &self,
        slug: &str,
        refresh_token: &str,
    ) -> std::result::Result<OAuthToken, CredentialFailure> {
        let provider = self
            .providers
            .get(slug)
            .ok_or(CredentialFailure::UnsupportedProvider)?;

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", provider.client_id.as_str());
        params.insert("client_secret", provider.client_secret.as_str());

        debug!(provider = %slug, "Refreshing OAuth token");

        let response = self
            .http_client
            .post(&provider.token_url)
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .form(&params)
            .send()
            .await
            .map_err(|e| CredentialFailure::RefreshFailed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(provider = %slug, status = %status, "Token refresh rejected");
            return Err(CredentialFailure::RefreshFailed(format!("HTTP {status}")));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            CredentialFailure::RefreshFailed(format!("unparseable token response: {e}"))
        })?;

        Ok(OAuthToken {
            access_token: token_response.access_token,
            token_type: token_response
                .token_type
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_in: token_response.expires_in,
            refresh_token: token_response
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            scope: token_response.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{Form, Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    async fn spawn_token_endpoint(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/token")
    }

    fn registry(token_url: String) -> ProviderRegistry {
        let mut providers = HashMap::new();
        providers.insert(
            "github".to_string(),
            OAuthProviderConfig {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
                token_url,
                ..Default::default()
            },
        );
        ProviderRegistry::new(providers, Client::new())
    }

    #[tokio::test]
    async fn unknown_provider_is_unsupported() {
        let reg = ProviderRegistry::default();
        assert_eq!(
            reg.refresh("nope", "r").await.unwrap_err(),
            CredentialFailure::UnsupportedProvider
        );
    }

    #[tokio::test]
    async fn refresh_posts_form_and_carries_refresh_token() {
        let router = Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form["grant_type"], "refresh_token");
                assert_eq!(form["refresh_token"], "old-refresh");
                assert_eq!(form["client_id"], "cid");
                Json(json!({"access_token": "new-access", "expires_in": 3600}))
            }),
        );
        let url = spawn_token_endpoint(router).await;

        let token = registry(url).refresh("github", "old-refresh").await.unwrap();
        assert_eq!(token.access_token, "new-access");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.expires_in, Some(3600));
        assert_eq!(token.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[tokio::test]
    async fn provider_supplied_refresh_token_wins() {
        let router = Router::new().route(
            "/token",
            post(|| async {
                Json(json!({"access_token": "a", "refresh_token": "rotated"}))
            }),
        );
        let url = spawn_token_endpoint(router).await;
        let token = registry(url).refresh("github", "old").await.unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("rotated"));
    }

    #[tokio::test]
    async fn rejected_refresh_is_refresh_failed() {
        let router = Router::new().route(
            "/token",
            post(|| async { (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))) }),
        );
        let url = spawn_token_endpoint(router).await;
        let err = registry(url).refresh("github", "old").await.unwrap_err();
        assert!(matches!(err, CredentialFailure::RefreshFailed(_)));
    }

    #[tokio::test]
    async fn hung_token_endpoint_times_out() {
        let router = Router::new().route(
            "/token",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"access_token": "late"}))
            }),
        );
        let url = spawn_token_endpoint(router).await;
        let started = std::time::Instant::now();
        let err = registry(url)
            .with_timeout(Duration::from_millis(100))
            .refresh("github", "old")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialFailure::RefreshFailed(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn garbage_body_is_refresh_failed() {
        let router = Router::new().route("/token", post(|| async { Json(Value::Null) }));
        let url = spawn_token_endpoint(router).await;
        let err = registry(url).refresh("github", "old").await.unwrap_err();
        assert!(matches!(err, CredentialFailure::RefreshFailed(_)));
    }
}
