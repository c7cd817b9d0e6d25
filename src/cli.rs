// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "key-relay",
    version,
    about = "Credential pool with priority bindings, failover and backup promotion for upstream LLM provider keys"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "KEY_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server bind address, overrides `server.host`
    #[arg(long, env = "KEY_RELAY_HOST")]
    pub host: Option<String>,

    /// Server port, overrides `server.port` and `PORT`
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Plain-text logs instead of JSON
    #[arg(long)]
    pub no_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Load and validate the configuration, then exit
    CheckConfig,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
