//! Configuration management for the chat server
//!
//! Values come from an optional `config.toml` with `CHAT_SERVER_*`
//! environment overrides on top. Any key missing from both falls back to
//! the defaults in [`ServerConfig::default`].

use config::{Config, ConfigError, Environment, File};
use log::{info, warn};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations searched for the configuration file, without the `.toml` extension.
const CONFIG_PATHS: [&str; 2] = ["simple-chat-server/config", "config"];

const ENV_PREFIX: &str = "CHAT_SERVER";

/// Complete server configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address the chat listener binds to
    pub bind_address: String,

    /// Listener port; 0 picks an ephemeral port
    pub port: u16,

    /// Flat directory holding shared files
    pub files_dir: String,

    /// Account store file (`username:password` per line)
    pub accounts_file: String,

    /// Maximum simultaneously open connections (chat and file)
    pub max_connections: usize,

    /// Longest protocol line accepted, terminator excluded
    pub max_line_length: usize,

    /// Bytes moved per readiness event during a file transfer
    pub chunk_size: usize,

    /// Largest accepted upload in MB
    pub max_upload_size_mb: u64,

    /// Idle connections are closed after this many seconds; 0 disables
    pub idle_timeout_secs: u64,

    /// A transfer not finished within this many seconds is aborted
    pub transfer_timeout_secs: u64,

    /// How often deadlines are checked
    pub sweep_interval_ms: u64,

    /// Connections whose unsent output exceeds this are dropped
    pub max_outbound_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 4444,
            files_dir: "./files".to_string(),
            accounts_file: "./accounts.txt".to_string(),
            max_connections: 64,
            max_line_length: 4096,
            chunk_size: 1024 * 1024,
            max_upload_size_mb: 100,
            idle_timeout_secs: 900,
            transfer_timeout_secs: 600,
            sweep_interval_ms: 1000,
            max_outbound_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from config.toml with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        match CONFIG_PATHS
            .iter()
            .find(|path| Path::new(&format!("{path}.toml")).is_file())
        {
            Some(path) => {
                info!("Loading configuration from {path}.toml");
                builder = builder.add_source(File::with_name(path));
            }
            None => warn!(
                "No config.toml found (tried {CONFIG_PATHS:?}), using defaults and environment"
            ),
        }

        let settings = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Message(format!(
                "bind_address is not an IP address: {}",
                self.bind_address
            )));
        }

        if self.files_dir.is_empty() {
            return Err(ConfigError::Message("files_dir cannot be empty".into()));
        }

        if self.accounts_file.is_empty() {
            return Err(ConfigError::Message("accounts_file cannot be empty".into()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::Message(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.max_line_length == 0 {
            return Err(ConfigError::Message(
                "max_line_length must be greater than 0".into(),
            ));
        }

        if self.chunk_size == 0 {
            return Err(ConfigError::Message(
                "chunk_size must be greater than 0".into(),
            ));
        }

        if self.transfer_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "transfer_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Message(
                "sweep_interval_ms must be greater than 0".into(),
            ));
        }

        if self.max_outbound_bytes < self.max_line_length {
            return Err(ConfigError::Message(
                "max_outbound_bytes must be at least max_line_length".into(),
            ));
        }

        Ok(())
    }

    /// Listener address built from bind address and port
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| ConfigError::Message(format!("invalid listen address: {e}")))
    }

    pub fn files_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.files_dir)
    }

    pub fn accounts_file_path(&self) -> PathBuf {
        PathBuf::from(&self.accounts_file)
    }

    /// Get maximum upload size in bytes
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }

    /// `None` when idle connections are never reaped
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
