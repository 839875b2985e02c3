//! Integration Gateway Library
//!
//! Lets AI-agent clients call third-party integration tools (GitHub, Linear,
//! Slack, ...) through one authenticated surface.
//!
//! # Features
//!
//! - **Two front ends**: REST (`/gateway/*`) and JSON-RPC 2.0 (`POST /mcp`) with batching and notifications
//! - **Namespaced tools**: every tool is addressed as `slug/tool`
//! - **Credential vault**: AES-256-GCM token storage with refresh-and-persist on expiry
//! - **Anonymized telemetry**: usage entries plus privacy-preserving analytics, off the request path
//! - **Pluggable collaborators**: users, connections, catalog and sinks are traits

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod invoker;
pub mod protocol;
pub mod store;
pub mod telemetry;
pub mod vault;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
