//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Integration Gateway - REST and MCP access to integration tools with managed OAuth
#[derive(Parser, Debug)]
#[command(name = "integration-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "INTEGRATION_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "INTEGRATION_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "INTEGRATION_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "INTEGRATION_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "INTEGRATION_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Print the stored form of an API key (for `seed.users[].api_key_hash`)
    HashKey {
        /// Plaintext API key
        #[arg(required = true)]
        key: String,
    },

    /// Print a fresh base64 key for `vault.encryption_key`
    GenKey,
}
