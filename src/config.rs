//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::store::{IntegrationDescriptor, User};
use crate::vault::{OAuthProviderConfig, OAuthToken};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// API key authentication
    pub auth: AuthConfig,
    /// Token encryption
    pub vault: VaultConfig,
    /// OAuth provider configs keyed by integration slug
    pub providers: HashMap<String, OAuthProviderConfig>,
    /// Outbound integration calls
    pub invoker: InvokerConfig,
    /// Usage telemetry
    pub telemetry: TelemetryConfig,
    /// Initial contents of the in-memory stores
    pub seed: SeedConfig,
}

/// API key authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Header carrying the API key
    pub api_key_header: String,

    /// Requests per minute per user (0 = unlimited)
    pub rate_limit_per_minute: u32,

    /// Paths that bypass authentication (default: `["/health"]`)
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_header: "x-api-key".to_string(),
            rate_limit_per_minute: 0,
            public_paths: default_public_paths(),
        }
    }
}

/// Token encryption
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Base64 AES-256 key, or `env:VAR_NAME`
    pub encryption_key: String,
}

/// Outbound integration calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Header the access token is sent in
    pub token_header: String,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            token_header: "X-OAuth-Token".to_string(),
        }
    }
}

/// Usage telemetry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Emit anonymized analytics records (usage entries are always logged)
    pub enabled: bool,
    /// Salt mixed into session hashes
    pub session_salt: String,
    /// Calls closer than this in one session form a parallel batch
    #[serde(with = "humantime_serde")]
    pub coalescing_window: Duration,
    /// Repeat calls of one tool within this window count as retries
    #[serde(with = "humantime_serde")]
    pub retry_window: Duration,
    /// Entries per detector before eviction
    pub max_entries: usize,
    /// How often detector state is swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Trusted header carrying a two-letter country code
    pub geo_header: String,
    /// Consecutive failures of one tool before a loop is logged (0 = never)
    pub loop_threshold: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            session_salt: String::new(),
            coalescing_window: Duration::from_millis(50),
            retry_window: Duration::from_secs(60),
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
            geo_header: "cf-ipcountry".to_string(),
            loop_threshold: 5,
        }
    }
}

/// Initial contents of the in-memory stores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// Published integrations
    pub integrations: Vec<IntegrationDescriptor>,
    /// Gateway users
    pub users: Vec<SeedUser>,
    /// User connections
    pub connections: Vec<SeedConnection>,
}

/// Seeded user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    /// User identity
    #[serde(flatten)]
    pub user: User,
    /// Plaintext API key (supports `${VAR}`); hashed at startup
    #[serde(default)]
    pub api_key: Option<String>,
    /// Stored form of the API key, as printed by `hash-key`
    #[serde(default)]
    pub api_key_hash: Option<String>,
}

impl SeedUser {
    /// Stored form of this user's key, if any
    #[must_use]
    pub fn key_hash(&self) -> Option<String> {
        self.api_key_hash
            .clone()
            .or_else(|| self.api_key.as_deref().map(crate::gateway::hash_api_key))
    }
}

/// Seeded connection; a plaintext token is encrypted at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConnection {
    /// Owning user
    pub user_id: String,
    /// Catalog id of the integration
    pub integration_id: String,
    /// Integration slug
    pub slug: String,
    /// Whether the integration is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Initial OAuth token (token strings support `${VAR}`)
    #[serde(default)]
    pub token: Option<OAuthToken>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("INTEGRATION_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // env files first so ${VAR} can see them
        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} in secrets and endpoints
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        for provider in self.providers.values_mut() {
            provider.client_id = Self::expand_string(&re, &provider.client_id);
            provider.client_secret = Self::expand_string(&re, &provider.client_secret);
            provider.token_url = Self::expand_string(&re, &provider.token_url);
        }

        self.vault.encryption_key = Self::expand_string(&re, &self.vault.encryption_key);
        self.telemetry.session_salt = Self::expand_string(&re, &self.telemetry.session_salt);

        for integration in &mut self.seed.integrations {
            integration.function_path = Self::expand_string(&re, &integration.function_path);
        }
        for user in &mut self.seed.users {
            if let Some(key) = user.api_key.as_mut() {
                *key = Self::expand_string(&re, key);
            }
        }
        for token in self.seed.connections.iter_mut().filter_map(|c| c.token.as_mut()) {
            token.access_token = Self::expand_string(&re, &token.access_token);
            if let Some(refresh) = token.refresh_token.as_mut() {
                *refresh = Self::expand_string(&re, refresh);
            }
        }
        Ok(())
    }

    /// Reject endpoints that are not absolute http(s) URLs
    fn validate(&self) -> Result<()> {
        let check = |what: String, value: &str| -> Result<()> {
            let parsed = url::Url::parse(value)
                .map_err(|e| Error::Config(format!("{what}: invalid URL '{value}': {e}")))?;
            match parsed.scheme() {
                "http" | "https" => Ok(()),
                other => Err(Error::Config(format!(
                    "{what}: unsupported scheme '{other}'"
                ))),
            }
        };

        for integration in &self.seed.integrations {
            check(
                format!("integration '{}' function_path", integration.slug),
                &integration.function_path,
            )?;
        }
        for (slug, provider) in &self.providers {
            if !provider.token_url.is_empty() {
                check(format!("provider '{slug}' token_url"), &provider.token_url)?;
            }
        }
        Ok(())
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            request_timeout: Duration::from_secs(60),
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string ("30s", or "50ms" below a second)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
