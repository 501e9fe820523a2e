//! Core configuration types and loading.

use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::defaults::{default_bind_address, default_data_dir, default_server_name};
use super::listen::PortsConfig;
use super::security::BlockingConfig;
use super::services::{BinkpConfig, ServiceConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Daemon identity and filesystem layout.
    #[serde(default)]
    pub server: ServerConfig,
    /// Listening ports per protocol.
    #[serde(default)]
    pub ports: PortsConfig,
    /// Admission policy (allow/deny lists, auto-block, concurrency).
    #[serde(default)]
    pub blocking: BlockingConfig,
    /// Services offered to telnet and SSH callers, in menu order.
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
    /// Optional binkp mailer configuration.
    pub binkp: Option<BinkpConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve a path relative to the data directory (absolute paths are kept).
    pub fn data_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.server.data_dir.join(path)
        }
    }
}

/// How a dispatched connection is handed to the worker process.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// The socket itself becomes the worker's stdin/stdout.
    #[default]
    Inherit,
    /// The worker talks to pipes; the daemon relays bytes to the socket.
    Pipe,
}

/// Daemon identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Daemon name, recorded in deny-list comments (default: "nodegate").
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Directory for semaphore files and ban state (default: "data").
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Address every listener binds to (default: 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    /// Socket handoff strategy (default: inherit).
    #[serde(default)]
    pub launch_mode: LaunchMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            data_dir: default_data_dir(),
            bind_address: default_bind_address(),
            launch_mode: LaunchMode::default(),
        }
    }
}
