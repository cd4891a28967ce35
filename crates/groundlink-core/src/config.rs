//! Configuration system for groundlink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GROUNDLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/groundlink/config.toml
//!   3. ~/.config/groundlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundlinkConfig {
    pub node: NodeConfig,
    /// The node directory. Every node this one may exchange files with.
    pub nodes: Vec<NodeEntry>,
    pub link: LinkConfig,
    pub transfer: TransferConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's name. Must appear in `nodes`.
    pub name: String,
    /// Parent of every peer's staging root.
    pub data_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: String,
    pub id: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// UDP address the link binds to.
    pub bind_addr: String,
    /// Static peer addresses. Others are learned from incoming packets.
    pub peers: Vec<PeerAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub name: String,
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Max DATA payload bytes.
    pub packet_size: usize,
    pub incoming_waittime_secs: u64,
    pub outgoing_waittime_secs: u64,
    /// Minimum gap between checkpoint writes of one transaction.
    pub checkpoint_interval_secs: u64,
    pub harvest_interval_ms: u64,
    pub scan_interval_secs: u64,
    /// Cap on REQUEST-DATA packets emitted per response.
    pub max_holes_per_response: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Local API port, bound on 127.0.0.1.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "ground".to_string(),
            data_root: data_dir(),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            peers: Vec::new(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            packet_size: 200,
            incoming_waittime_secs: 5,
            outgoing_waittime_secs: 5,
            checkpoint_interval_secs: 5,
            harvest_interval_ms: 1000,
            scan_interval_secs: 10,
            max_holes_per_response: 32,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 9101 }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("groundlink")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("groundlink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GroundlinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, then apply env overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            GroundlinkConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GROUNDLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GroundlinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply GROUNDLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GROUNDLINK_NODE__NAME") {
            self.node.name = v;
        }
        if let Ok(v) = std::env::var("GROUNDLINK_NODE__DATA_ROOT") {
            self.node.data_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GROUNDLINK_LINK__BIND_ADDR") {
            self.link.bind_addr = v;
        }
        if let Ok(v) = std::env::var("GROUNDLINK_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
        if let Ok(v) = std::env::var("GROUNDLINK_TRANSFER__PACKET_SIZE") {
            if let Ok(n) = v.parse() {
                self.transfer.packet_size = n;
            }
        }
    }
}
