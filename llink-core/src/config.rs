/// Network deployment configuration and on-disk layout

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{Error, Result};

/// Default proxy port
pub const DEFAULT_PORT: u16 = 7420;

/// API key length in bytes (hex-encoded on disk and on the wire)
pub const API_KEY_BYTES: usize = 32;

/// Which role this installation plays on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Owns the database file and serves it to clients
    Server,
    /// Proxies every statement to a server
    Client,
    /// Not configured yet: standalone local database
    #[default]
    Unset,
}

/// Deployment record read once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub mode: DeploymentMode,
    #[serde(default = "default_address")]
    pub server_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: DeploymentMode::Unset,
            server_address: default_address(),
            port: DEFAULT_PORT,
            api_key: None,
        }
    }
}

impl NetworkConfig {
    /// Server-mode config listening on `port`.
    pub fn server(port: u16) -> Self {
        Self {
            mode: DeploymentMode::Server,
            port,
            ..Self::default()
        }
    }

    /// Client-mode config pointing at `address:port` with the server's key.
    pub fn client(address: impl Into<String>, port: u16, api_key: impl Into<String>) -> Self {
        Self {
            mode: DeploymentMode::Client,
            server_address: address.into(),
            port,
            api_key: Some(api_key.into()),
        }
    }

    /// Load from `path`, or an unset-mode default when the file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("serialize config: {}", e)))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Generate and persist the API key if none exists yet.
    ///
    /// The key is created once per installation and never rotated.
    pub fn ensure_api_key(&mut self, path: &Path) -> Result<&str> {
        if self.api_key.as_deref().map_or(true, str::is_empty) {
            self.api_key = Some(generate_api_key());
            self.save(path)?;
            info!(path = %path.display(), "Generated network API key");
        }
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Internal("API key missing after generation".into()))
    }

    /// Base URL clients post to.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.server_address, self.port)
    }

    /// Check the fields the selected mode depends on.
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            DeploymentMode::Client => {
                if self.server_address.trim().is_empty() {
                    return Err(Error::InvalidConfig("client mode needs a server address".into()));
                }
                if self.api_key.as_deref().map_or(true, str::is_empty) {
                    return Err(Error::InvalidConfig("client mode needs an API key".into()));
                }
            }
            DeploymentMode::Server | DeploymentMode::Unset => {}
        }
        if self.port == 0 && self.mode != DeploymentMode::Unset {
            return Err(Error::InvalidConfig("port must be non-zero".into()));
        }
        Ok(())
    }
}

/// 256 random bits, hex encoded.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// File layout of one installation's data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub data_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Plaintext working copy the engine opens
    pub fn database(&self) -> PathBuf {
        self.data_dir.join("ledger.db")
    }

    /// At-rest sibling of [`Paths::database`]
    pub fn encrypted_database(&self) -> PathBuf {
        self.data_dir.join("ledger.db.enc")
    }

    pub fn key_file(&self) -> PathBuf {
        self.data_dir.join(".db-key")
    }

    pub fn network_config(&self) -> PathBuf {
        self.data_dir.join("network-config.json")
    }

    pub fn query_log(&self) -> PathBuf {
        self.data_dir.join("query-log.jsonl")
    }
}
