//! API key authentication middleware
//!
//! Supports:
//! - API keys resolved through the [`UserDirectory`] by SHA-256 hash
//! - Per-user rate limiting
//! - Public paths that bypass authentication
//! - Envelope paths (`/mcp`) where a failed lookup is reported by the
//!   JSON-RPC handler instead of an HTTP 401

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::router::MCP_PATH;
use crate::config::AuthConfig;
use crate::store::{User, UserDirectory};
use crate::{Error, Result};

/// Type alias for our rate limiter
type UserRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Stored form of an API key (hex SHA-256)
#[must_use]
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// User resolved by the middleware, available to handlers as an extension
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// API key authenticator
pub struct ApiKeyAuth {
    users: Arc<dyn UserDirectory>,
    header: HeaderName,
    /// Public paths
    public_paths: Vec<String>,
    quota: Option<Quota>,
    /// Rate limiters per user (keyed by user id), created on first request
    rate_limiters: DashMap<String, Arc<UserRateLimiter>>,
}

impl ApiKeyAuth {
    /// Create from `AuthConfig`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the API key header is not a valid header name.
    pub fn from_config(config: &AuthConfig, users: Arc<dyn UserDirectory>) -> Result<Self> {
        let header: HeaderName = config.api_key_header.parse().map_err(|_| {
            Error::Config(format!("invalid API key header '{}'", config.api_key_header))
        })?;

        Ok(Self {
            users,
            header,
            public_paths: config.public_paths.clone(),
            quota: NonZeroU32::new(config.rate_limit_per_minute).map(Quota::per_minute),
            rate_limiters: DashMap::new(),
        })
    }

    /// Check if a path is public (bypasses auth)
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p))
    }

    /// Resolve the request's API key to a user
    ///
    /// # Errors
    ///
    /// `Error::Authentication` for a missing or unknown key; store failures propagate.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<User> {
        let key = headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Authentication(format!("missing {} header", self.header)))?;

        self.users
            .get_user_by_api_key(&hash_api_key(key))
            .await?
            .ok_or_else(|| Error::Authentication("invalid API key".to_string()))
    }

    /// Check rate limit for a user. Returns true if allowed, false if rate limited.
    #[must_use]
    pub fn check_rate_limit(&self, user_id: &str) -> bool {
        let Some(quota) = self.quota else {
            return true;
        };
        let limiter = self
            .rate_limiters
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(quota)))
            .clone();
        limiter.check().is_ok()
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(auth): State<Arc<ApiKeyAuth>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if auth.is_public_path(&path) {
        debug!(path = %path, "Public path, skipping auth");
        return next.run(request).await;
    }

    match auth.authenticate(request.headers()).await {
        Ok(user) => {
            if !auth.check_rate_limit(&user.id) {
                warn!(user = %user.id, path = %path, "Rate limit exceeded");
                return rate_limited_response();
            }
            debug!(user = %user.id, path = %path, "Authenticated request");
            request.extensions_mut().insert(AuthenticatedUser(user));
            next.run(request).await
        }
        // JSON-RPC reports this per method, inside the envelope
        Err(Error::Authentication(reason)) if path == MCP_PATH => {
            debug!(path = %path, reason = %reason, "Unauthenticated JSON-RPC request");
            next.run(request).await
        }
        Err(e @ Error::Authentication(_)) => {
            warn!(path = %path, error = %e, "Rejected request");
            e.into_response()
        }
        Err(e) => {
            warn!(path = %path, error = %e, "User lookup failed");
            e.into_response()
        }
    }
}

/// Create a 429 Rate Limited response
fn rate_limited_response() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", "60")],
        Json(json!({
            "error": {
                "code": crate::error::rpc_codes::RATE_LIMITED,
                "message": "Rate limit exceeded. Try again later."
            }
        })),
    )
        .into_response()
}
