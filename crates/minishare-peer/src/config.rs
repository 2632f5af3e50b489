//! Peer configuration

use minishare_core::{CipherKind, Codec, SharedKey, CHUNK_SIZE, DISCOVERY_PORT, TRANSFER_PORT};
use minishare_discovery::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name announced to discovery probes
    pub device_name: String,

    /// Key material and cipher selection
    pub security: SecurityConfig,

    /// Ports, discovery and chunking
    pub network: NetworkConfig,

    /// Where received files go
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Shared passphrase; a random per-process key is used when absent
    pub passphrase: Option<String>,
    /// Cipher used by the codec
    pub cipher: CipherKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port the transfer server listens on
    pub transfer_port: u16,
    /// UDP port discovery responders listen on
    pub discovery_port: u16,
    /// Destination of discovery probes
    pub broadcast_addr: IpAddr,
    /// How long a discovery scan collects replies
    pub discovery_timeout_ms: u64,
    /// Transport chunk size in bytes
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Receive directory path
    pub receive_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            security: SecurityConfig::default(),
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            passphrase: None,
            cipher: CipherKind::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transfer_port: TRANSFER_PORT,
            discovery_port: DISCOVERY_PORT,
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            discovery_timeout_ms: 2000,
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            receive_dir: "~/MiniShare/received".to_string(),
        }
    }
}

/// Host name from the environment, or a generic placeholder
pub fn default_device_name() -> String {
    ["COMPUTERNAME", "HOSTNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "MyDevice".to_string())
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Expand ~ in receive_dir path
    pub fn receive_dir(&self) -> PathBuf {
        expand_path(&self.storage.receive_dir)
    }

    /// Key for this process: derived from the passphrase, or freshly generated
    pub fn shared_key(&self) -> anyhow::Result<SharedKey> {
        match &self.security.passphrase {
            Some(passphrase) if !passphrase.is_empty() => {
                Ok(SharedKey::from_passphrase(passphrase)?)
            }
            _ => {
                tracing::warn!(
                    "No passphrase configured; using a random key that no other peer knows"
                );
                Ok(SharedKey::generate()?)
            }
        }
    }

    pub fn codec(&self) -> anyhow::Result<Codec> {
        Ok(Codec::with_key(self.security.cipher, &self.shared_key()?))
    }

    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.network.discovery_port,
            broadcast_addr: self.network.broadcast_addr,
            timeout: Duration::from_millis(self.network.discovery_timeout_ms),
            default_transfer_port: self.network.transfer_port,
        }
    }
}

/// Expand a leading ~/ to the home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
