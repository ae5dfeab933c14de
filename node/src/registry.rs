//! # Deployment Registry
//!
//! Maps component aliases to `{address, codeHash}` for one chain. Each chain
//! id gets its own JSON document under the registry directory:
//!
//! ```text
//! <data_dir>/deployments/31337.json
//! {
//!   "Ledger":  { "address": "0x…", "code_hash": "0x…" },
//!   "Notary":  { "address": "0x…", "code_hash": "0x…" },
//!   …
//! }
//! ```
//!
//! Saving serializes the whole map to a temporary file and renames it over
//! the target, so readers never observe a half-written document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use custody_protocol::config::PROTOCOL_VERSION;
use custody_protocol::Address;

/// Errors raised while reading or writing registry documents.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry document is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// One deployed component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub address: Address,
    /// Fingerprint of the component implementation.
    pub code_hash: String,
}

/// Fingerprint of a component kind at the current protocol version.
pub fn code_hash(component: &str) -> String {
    let digest = blake3::hash(format!("{component}@{PROTOCOL_VERSION}").as_bytes());
    format!("0x{}", digest.to_hex())
}

/// The registry document of one chain.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
    entries: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    /// Opens the document for `chain_id` in `dir`, or starts an empty one.
    pub fn open(dir: &Path, chain_id: u64) -> RegistryResult<Self> {
        let path = dir.join(format!("{chain_id}.json"));
        let entries = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Location of the document on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records or replaces an alias.
    pub fn record(&mut self, alias: &str, address: Address, code_hash: String) {
        self.entries.insert(
            alias.to_string(),
            RegistryEntry { address, code_hash },
        );
    }

    pub fn get(&self, alias: &str) -> Option<&RegistryEntry> {
        self.entries.get(alias)
    }

    pub fn entries(&self) -> &BTreeMap<String, RegistryEntry> {
        &self.entries
    }

    /// Writes the whole document atomically.
    pub fn save(&self) -> RegistryResult<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.entries)?)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(
            path = %self.path.display(),
            entries = self.entries.len(),
            "registry saved"
        );
        Ok(())
    }
}
