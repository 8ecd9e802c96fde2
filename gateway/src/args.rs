//! Command-line arguments for the gateway binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// AWS-EventStream-to-Anthropic/OpenAI bridge.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Path to the gateway's TOML configuration file.
    #[arg(short, long, default_value = "gateway.toml")]
    pub config: PathBuf,

    /// Overrides `server.listen_address` from the configuration file.
    #[arg(long, env = "GATEWAY_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,

    /// Overrides `server.log_filter` from the configuration file.
    #[arg(long, env = "GATEWAY_LOG")]
    pub log_filter: Option<String>,

    /// Overrides `server.client_secret` from the configuration file.
    #[arg(long, env = "GATEWAY_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,
}
