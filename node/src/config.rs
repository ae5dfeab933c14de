//! Node configuration.
//!
//! Read from an optional TOML file. Every field is optional in the file;
//! command-line flags override the file, and built-in defaults fill the rest.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use custody_protocol::config::{CHAIN_ID_DEVNET, DEFAULT_DEPLOYMENT_LABEL};

use crate::cli::RunArgs;
use crate::logging::{LogFormat, DEFAULT_FILTER};

/// Default API port.
pub const DEFAULT_API_PORT: u16 = 8545;

/// Default Prometheus port.
pub const DEFAULT_METRICS_PORT: u16 = 9615;

/// Name of the config file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Chain id the data directory was initialized for.
    pub chain_id: Option<u64>,
    /// Deployment label for component addresses.
    pub deployment: Option<String>,
    /// API port.
    pub api_port: Option<u16>,
    /// Metrics port.
    pub metrics_port: Option<u16>,
    /// `pretty` or `json`.
    pub log_format: Option<LogFormat>,
    /// Default `EnvFilter` directives.
    pub log_level: Option<String>,
    /// Whether `POST /tx` accepts faucet calls. Defaults to on for devnet.
    pub faucet: Option<bool>,
}

impl FileConfig {
    /// Loads `path`, or returns the empty config if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Writes the config as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to encode config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write config file {}", path.display()))
    }
}

/// Fully resolved node settings.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub chain_id: u64,
    pub deployment: String,
    pub api_port: u16,
    pub metrics_port: u16,
    pub log_format: LogFormat,
    pub log_level: String,
    pub faucet: bool,
}

impl NodeConfig {
    /// Resolves settings for `run`: flags, then the config file, then defaults.
    pub fn resolve(args: &RunArgs) -> Result<Self> {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| args.data_dir.join(CONFIG_FILE_NAME));
        let file = FileConfig::load(&path)?;
        Ok(Self::merge(args, file))
    }

    /// Layers `args` over `file` over defaults.
    pub fn merge(args: &RunArgs, file: FileConfig) -> Self {
        let chain_id = file.chain_id.unwrap_or(CHAIN_ID_DEVNET);
        Self {
            data_dir: args.data_dir.clone(),
            chain_id,
            deployment: file
                .deployment
                .unwrap_or_else(|| DEFAULT_DEPLOYMENT_LABEL.to_string()),
            api_port: args.api_port.or(file.api_port).unwrap_or(DEFAULT_API_PORT),
            metrics_port: args
                .metrics_port
                .or(file.metrics_port)
                .unwrap_or(DEFAULT_METRICS_PORT),
            log_format: args
                .log_format
                .as_deref()
                .map(LogFormat::from_str_lossy)
                .or(file.log_format)
                .unwrap_or_default(),
            log_level: args
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            faucet: file
                .faucet
                .unwrap_or_else(|| custody_protocol::config::is_devnet(chain_id)),
        }
    }

    /// Directory of the sled database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    /// Directory of the registry documents.
    pub fn registry_dir(&self) -> PathBuf {
        self.data_dir.join("deployments")
    }
}
