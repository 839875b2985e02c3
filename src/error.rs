//! Error types for the integration gateway

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;

/// Result type alias for the integration gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Why the credential vault could not produce an access token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialFailure {
    /// Token expired and there is nothing to refresh it with
    #[error("token expired and no refresh token is stored")]
    NoRefreshToken,
    /// No OAuth provider registered for the integration
    #[error("no OAuth provider configured")]
    UnsupportedProvider,
    /// Provider rejected or failed the refresh call
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    /// Refreshed token could not be persisted
    #[error("refreshed token could not be stored: {0}")]
    PersistFailed(String),
    /// Stored ciphertext could not be decrypted or parsed
    #[error("stored token is unreadable")]
    Corrupt,
}

/// Integration gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unknown API key
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Tool name is not `slug/tool`
    #[error(transparent)]
    InvalidToolName(#[from] gateway_core::InvalidToolName),

    /// Malformed request parameters
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// User has no enabled connection for the integration
    #[error("Integration '{0}' is not enabled for this user")]
    IntegrationDisabled(String),

    /// Integration slug is unknown to the catalog
    #[error("Integration not found: {0}")]
    IntegrationNotFound(String),

    /// Credential vault failure (never carries token material)
    #[error("Credential error for provider '{provider}': {reason}")]
    Credential {
        /// Integration slug the credential belongs to
        provider: String,
        /// What went wrong
        reason: CredentialFailure,
    },

    /// Integration answered with a non-2xx status
    #[error("Upstream error {status}: {body}")]
    Upstream {
        /// HTTP status returned by the integration
        status: u16,
        /// Upstream body text, preserved verbatim
        body: String,
    },

    /// Integration answered 429
    #[error("Rate limited by integration '{slug}'")]
    RateLimited {
        /// Integration slug
        slug: String,
        /// Rate-limit type hint from the upstream, if any
        limit_type: Option<String>,
        /// `Retry-After` value from the upstream, if any
        retry_after: Option<String>,
        /// Upstream body text
        body: String,
    },

    /// Resource URI matched no enabled integration
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Prompt name is unknown
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Outbound transport error (connect, timeout, body read)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Collaborator store failure
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a credential error for a provider
    pub fn credential(provider: impl Into<String>, reason: CredentialFailure) -> Self {
        Self::Credential {
            provider: provider.into(),
            reason,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Authentication(_) | Self::Transport(_) => rpc_codes::APPLICATION_ERROR,
            Self::InvalidToolName(_) | Self::InvalidParams(_) => rpc_codes::INVALID_PARAMS,
            Self::IntegrationDisabled(_) => rpc_codes::INTEGRATION_DISABLED,
            Self::IntegrationNotFound(_) | Self::ResourceNotFound(_) | Self::PromptNotFound(_) => {
                rpc_codes::NOT_FOUND
            }
            Self::Credential { .. } => rpc_codes::CREDENTIAL_ERROR,
            Self::Upstream { .. } => rpc_codes::UPSTREAM_ERROR,
            Self::RateLimited { .. } => rpc_codes::RATE_LIMITED,
            _ => rpc_codes::INTERNAL_ERROR,
        }
    }

    /// Convert to the REST surface's HTTP status
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Authentication(_) | Self::Credential { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidToolName(_) | Self::InvalidParams(_) => StatusCode::BAD_REQUEST,
            Self::IntegrationDisabled(_) => StatusCode::FORBIDDEN,
            Self::IntegrationNotFound(_) | Self::ResourceNotFound(_) | Self::PromptNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::Upstream { .. } | Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured detail for error envelopes (upstream status, rate-limit hints)
    #[must_use]
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Upstream { status, body } => Some(json!({
                "statusCode": status,
                "details": body,
            })),
            Self::RateLimited {
                limit_type,
                retry_after,
                body,
                ..
            } => Some(json!({
                "statusCode": 429,
                "rateLimitType": limit_type,
                "retryAfter": retry_after,
                "details": body,
            })),
            Self::Credential { provider, .. } => Some(json!({ "provider": provider })),
            _ => None,
        }
    }
}

/// REST error body: `{"error": {"code", "message", "data"?}}`
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.to_rpc_code(),
            "message": self.to_string(),
        });
        if let Some(data) = self.data() {
            error["data"] = data;
        }
        (self.http_status(), Json(json!({ "error": error }))).into_response()
    }
}

/// JSON-RPC error codes
pub mod rpc_codes {
    /// Parse error - Invalid JSON
    pub const PARSE_ERROR: i32 = -32700;
    /// Invalid Request - Not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;
    /// Method not found
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid params
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Generic application error (unauthenticated, transport)
    pub const APPLICATION_ERROR: i32 = -32000;
    /// Integration not enabled for the user
    pub const INTEGRATION_DISABLED: i32 = -32001;
    /// Integration, resource or prompt not found
    pub const NOT_FOUND: i32 = -32002;
    /// Credential vault failure
    pub const CREDENTIAL_ERROR: i32 = -32003;
    /// Integration returned non-2xx
    pub const UPSTREAM_ERROR: i32 = -32004;
    /// Integration returned 429
    pub const RATE_LIMITED: i32 = -32005;
}
