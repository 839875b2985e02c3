//! OAuth token model and expiry rule

use serde::{Deserialize, Serialize};

/// Tokens are treated as expired this long before the provider's deadline
pub const EXPIRY_SKEW_MS: i64 = 5 * 60 * 1000;

/// OAuth2 token as issued by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    /// Access token
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Lifetime in seconds from issue time
    #[serde(default)]
    pub expires_in: Option<u64>,

    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Whether `token` issued at `issued_at_ms` must be refreshed at `now_ms`
///
/// Tokens without `expires_in` never expire.
#[must_use]
pub fn is_expired(token: &OAuthToken, issued_at_ms: i64, now_ms: i64) -> bool {
    let Some(expires_in) = token.expires_in else {
        return false;
    };
    let lifetime_ms = i64::try_from(expires_in)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    let deadline = issued_at_ms
        .saturating_add(lifetime_ms)
        .saturating_sub(EXPIRY_SKEW_MS);
    now_ms >= deadline
}
