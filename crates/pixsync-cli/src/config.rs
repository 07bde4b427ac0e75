//! The `.pixsync/config.json` settings file.

use pixsync_server::ServerConfig;
use pixsync_watcher::{AttachPolicy, BridgeConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{AddrParseError, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_DIR: &str = ".pixsync";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid listen address '{addr}': {source}")]
    Addr {
        addr: String,
        #[source]
        source: AddrParseError,
    },
}

/// Persisted settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: String,
    pub host: String,
    pub port: u16,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub max_message_size: usize,
    pub uv_interval_ms: u64,
    pub inventory_interval_ms: u64,
    pub drain_interval_ms: u64,
    pub attach_policy: AttachPolicy,
    pub autostart: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8765,
            ping_interval_secs: 20,
            pong_timeout_secs: 10,
            max_message_size: 10_000_000,
            uv_interval_ms: 500,
            inventory_interval_ms: 500,
            drain_interval_ms: 100,
            attach_policy: AttachPolicy::Silent,
            autostart: true,
        }
    }
}

impl Settings {
    pub fn path(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Reads settings under `root`, or defaults when there is no file.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn save(&self, root: &Path) -> Result<PathBuf, ConfigError> {
        let path = Self::path(root);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, text).map_err(io_err)?;
        Ok(path)
    }

    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        let addr: SocketAddr = addr
            .parse()
            .map_err(|source| ConfigError::Addr { addr, source })?;

        Ok(ServerConfig {
            addr,
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs),
            max_message_size: self.max_message_size,
            ..ServerConfig::default()
        })
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            uv_interval: Duration::from_millis(self.uv_interval_ms),
            inventory_interval: Duration::from_millis(self.inventory_interval_ms),
            drain_interval: Duration::from_millis(self.drain_interval_ms),
            attach_policy: self.attach_policy,
        }
    }
}
