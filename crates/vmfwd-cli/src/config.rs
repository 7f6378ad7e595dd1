//! CLI configuration at `~/.vmfwd/config.toml`.
//!
//! Provides the API server, default namespace and forwarding settings.
//! CLI flags always override config file values.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;
use vmfwd_tunnel::DEFAULT_UDP_BUFFER_SIZE;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub forward: ForwardSection,
}

/// Where streams are opened.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// API server base URL (`http`, `https`, `ws` or `wss`).
    #[serde(default = "default_server")]
    pub server: String,

    /// Namespace for targets that do not name one.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            namespace: default_namespace(),
        }
    }
}

/// Local side of the forwarding.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardSection {
    /// IP address or hostname to bind.
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_udp_buffer_size")]
    pub udp_buffer_size: usize,

    /// Seconds; 0 disables.
    #[serde(default)]
    pub udp_idle_timeout: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ForwardSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            udp_buffer_size: default_udp_buffer_size(),
            udp_idle_timeout: 0,
            log_level: default_log_level(),
        }
    }
}

/// `kubectl proxy` listens here by default.
fn default_server() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_udp_buffer_size() -> usize {
    DEFAULT_UDP_BUFFER_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// `~/.vmfwd/config.toml`.
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".vmfwd").join("config.toml")
    }

    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}
