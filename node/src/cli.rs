//! # CLI Interface
//!
//! Defines the command-line argument structure for `custody-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.
//!
//! Flags left unset fall back to the TOML config file, then to built-in
//! defaults. See [`crate::config::NodeConfig::merge`].

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Custody protocol node.
///
/// Hosts the capability store, notary, ledger and a native vault in a
/// single execution context, persists state to disk, and serves an
/// HTTP/WebSocket API plus Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "custody-node",
    about = "Custody protocol node",
    version,
    propagate_version = true
)]
pub struct CustodyNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a data directory: genesis state, registry document and a
    /// default config file.
    Init(InitArgs),
    /// Query the status of a running node via its API.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory.
    #[arg(long, short = 'c', env = "CUSTODY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node data directory holding the state database and registry files.
    #[arg(long, short = 'd', env = "CUSTODY_DATA_DIR", default_value = ".custody")]
    pub data_dir: PathBuf,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "CUSTODY_API_PORT")]
    pub api_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CUSTODY_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "CUSTODY_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// Default log filter when `RUST_LOG` is not set.
    #[arg(long, env = "CUSTODY_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "CUSTODY_DATA_DIR", default_value = ".custody")]
    pub data_dir: PathBuf,

    /// Chain id to configure for. 31337 is the local devnet.
    #[arg(long, default_value_t = custody_protocol::config::CHAIN_ID_DEVNET)]
    pub chain_id: u64,

    /// Label from which component addresses are derived.
    #[arg(long, default_value = custody_protocol::config::DEFAULT_DEPLOYMENT_LABEL)]
    pub deployment: String,

    /// Overwrite an existing genesis state.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    pub api_url: String,
}
