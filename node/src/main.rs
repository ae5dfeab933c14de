// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Node
//!
//! Entry point for the `custody-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores the chain from disk and serves
//! the HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the node
//! - `init`    — create a data directory with genesis state and registry
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod calls;
mod cli;
mod config;
mod logging;
mod metrics;
mod registry;
mod service;
mod store;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use custody_contracts::NativeVault;
use custody_protocol::config::{network_name, PROTOCOL_VERSION};
use custody_protocol::{Address, Chain, Deployment, EventLog, WorldState};

use cli::{Commands, CustodyNodeCli};
use config::{FileConfig, NodeConfig, CONFIG_FILE_NAME};
use logging::{LogFormat, DEFAULT_FILTER};
use metrics::NodeMetrics;
use registry::{code_hash, Registry};
use service::CustodyService;
use store::StateStore;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry alias of the native vault.
const VAULT_ALIAS: &str = "NativeVault";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CustodyNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Address label of the native vault within a deployment.
fn vault_label(deployment: &str) -> String {
    format!("{deployment}/native-vault")
}

/// Starts the node: API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let config = NodeConfig::resolve(&args)?;
    logging::init_logging(&config.log_level, config.log_format);

    tracing::info!(
        chain_id = config.chain_id,
        api_port = config.api_port,
        metrics_port = config.metrics_port,
        data_dir = %config.data_dir.display(),
        "starting custody-node"
    );

    // --- Persistent storage ---
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)
        .with_context(|| format!("failed to open state store at {}", db_path.display()))?;

    let (state, events) = match store.load().context("failed to load state snapshot")? {
        Some((state, events)) => {
            tracing::info!(
                transactions = state.transactions(),
                events = events.len(),
                "state restored"
            );
            (state, events)
        }
        None => {
            let state = WorldState::genesis(Deployment::derive(&config.deployment));
            store.save(&state, &[], None).context("failed to persist genesis state")?;
            tracing::info!(deployment = %config.deployment, "genesis state created");
            (state, EventLog::new())
        }
    };

    // --- Chain and vault ---
    let mut chain = Chain::resume(state, events).context("snapshot cannot be resumed")?;
    let vault = NativeVault::install(&mut chain, &vault_label(&config.deployment))
        .context("failed to install the native vault")?;

    let registry = Registry::open(&config.registry_dir(), config.chain_id)
        .context("failed to load registry document")?;
    if registry.get(VAULT_ALIAS).map(|e| e.address) != Some(vault.address()) {
        tracing::warn!(
            path = %registry.path().display(),
            "registry does not list this node's vault; run `init` to regenerate it"
        );
    }

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let service = CustodyService::new(
        chain,
        vault,
        store,
        Arc::clone(&node_metrics),
        event_tx,
        config.faucet,
    );

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            PROTOCOL_VERSION,
        ),
        network: network_name(config.chain_id),
        chain_id: config.chain_id,
        service: Arc::new(service),
        registry: Arc::new(registry),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", config.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("custody-node stopped");
    Ok(())
}

/// What `init` wrote.
#[derive(Debug)]
struct InitSummary {
    config_path: PathBuf,
    registry_path: PathBuf,
    deployment: Deployment,
    vault: Address,
}

/// Initializes a data directory: genesis state, registry document, config.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(DEFAULT_FILTER, LogFormat::Pretty);

    let summary = initialize(&args.data_dir, args.chain_id, &args.deployment, args.force)?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", args.data_dir.display());
    println!("  Network        : {}", network_name(args.chain_id));
    println!("  Config         : {}", summary.config_path.display());
    println!("  Registry       : {}", summary.registry_path.display());
    for (alias, address) in summary.deployment.components() {
        println!("  {:<15}: {}", alias, address);
    }
    println!("  {:<15}: {}", VAULT_ALIAS, summary.vault);

    Ok(())
}

fn initialize(data_dir: &Path, chain_id: u64, label: &str, force: bool) -> Result<InitSummary> {
    let config = NodeConfig {
        data_dir: data_dir.to_path_buf(),
        chain_id,
        deployment: label.to_string(),
        api_port: config::DEFAULT_API_PORT,
        metrics_port: config::DEFAULT_METRICS_PORT,
        log_format: LogFormat::Pretty,
        log_level: DEFAULT_FILTER.to_string(),
        faucet: custody_protocol::config::is_devnet(chain_id),
    };
    tracing::info!(
        data_dir = %data_dir.display(),
        chain_id,
        deployment = label,
        "initializing node"
    );

    let db_path = config.db_path();
    if db_path.exists() {
        if !force {
            bail!(
                "{} already holds state; pass --force to reinitialize",
                data_dir.display()
            );
        }
        std::fs::remove_dir_all(&db_path)
            .with_context(|| format!("failed to remove {}", db_path.display()))?;
        tracing::warn!(path = %db_path.display(), "existing state discarded");
    }
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    // Genesis state.
    let deployment = Deployment::derive(label);
    let store = StateStore::open(&db_path)
        .with_context(|| format!("failed to open state store at {}", db_path.display()))?;
    store
        .save(&WorldState::genesis(deployment), &[], None)
        .context("failed to persist genesis state")?;

    // Registry document.
    let vault = Address::derive(&vault_label(label));
    let mut registry = Registry::open(&config.registry_dir(), chain_id)?;
    for (alias, address) in deployment.components() {
        registry.record(alias, address, code_hash(alias));
    }
    registry.record(VAULT_ALIAS, vault, code_hash(VAULT_ALIAS));
    registry.save()?;

    // Config file.
    let config_path = data_dir.join(CONFIG_FILE_NAME);
    FileConfig {
        chain_id: Some(chain_id),
        deployment: Some(label.to_string()),
        faucet: Some(config.faucet),
        ..FileConfig::default()
    }
    .save(&config_path)?;

    Ok(InitSummary {
        config_path,
        registry_path: registry.path().to_path_buf(),
        deployment,
        vault,
    })
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.api_url.trim_end_matches('/'));
    let body = http_get(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Minimal HTTP/1.1 GET over a raw tokio TCP stream.
async fn http_get(url: &str) -> Result<String> {
    let parsed: url::Url = url
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;

    let addr = format!("{}:{}", parsed.host(), parsed.port().unwrap_or(80));
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        parsed.path(),
        parsed.host(),
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Everything after the first blank line is the body.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Prints version information to stdout.
fn print_version() {
    println!("custody-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", PROTOCOL_VERSION);
    println!("schema       {}", custody_protocol::config::STATE_SCHEMA_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Just enough URL parsing for `status`: scheme, host, port, path.
mod url {
    #[derive(Debug, PartialEq)]
    pub struct Url {
        host: String,
        port: Option<u16>,
        path: String,
    }

    impl Url {
        pub fn host(&self) -> &str {
            &self.host
        }

        pub fn port(&self) -> Option<u16> {
            self.port
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl std::str::FromStr for Url {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            if s.starts_with("https://") {
                return Err("https is not supported".into());
            }
            let rest = s.strip_prefix("http://").unwrap_or(s);

            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };
            if authority.is_empty() {
                return Err("missing host".into());
            }

            let (host, port) = match authority.rfind(':') {
                Some(i) => {
                    let p = authority[i + 1..]
                        .parse::<u16>()
                        .map_err(|e| format!("bad port: {}", e))?;
                    (authority[..i].to_string(), Some(p))
                }
                None => (authority.to_string(), None),
            };

            Ok(Url {
                host,
                port,
                path: path.to_string(),
            })
        }
    }
}
