//! Daemon configuration.
//!
//! Loaded from `--config <path>` or `<config_dir>/beacon/config.json`.
//! A missing file means defaults; every field is optional.

use beacon_core::{EngineConfig, InterfaceSpec};
use beacon_util::LogLevel;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Invalid JSON syntax or field types.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Config validation failed.
    #[error("config validation failed: {message}")]
    Validation { message: String },

    /// No host name configured and the system one is unusable.
    #[error("cannot determine host name: {0}")]
    HostName(String),
}

/// Daemon configuration file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Log level when `--verbose` and `RUST_LOG` are absent.
    pub log_level: LogLevel,
    /// Static hosts file. Defaults to `hosts` next to the config file.
    pub hosts_file: Option<PathBuf>,
    /// Seconds between interface sweeps.
    pub sweep_interval_secs: u64,
    /// Interfaces to announce on.
    pub interfaces: Vec<InterfaceSpec>,
    /// Host name to claim. Defaults to the system host name in `.local`.
    pub host_name: Option<String>,
    /// Addresses published for the host name.
    pub addresses: Vec<IpAddr>,
    /// Renames tried after host name collisions before giving up.
    pub max_rename_attempts: u32,
    /// Announcement timing.
    pub engine: EngineConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            hosts_file: None,
            sweep_interval_secs: 10,
            interfaces: Vec::new(),
            host_name: None,
            addresses: Vec::new(),
            max_rename_attempts: 15,
            engine: EngineConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load the configuration.
    ///
    /// With an explicit path the file must exist. Otherwise the global
    /// config file is used when present. Returns the file actually read.
    pub async fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::global_config_dir().map(|dir| dir.join("config.json")) {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("no config file found, using defaults");
                    return Ok((Self::default(), None));
                }
            },
        };

        let config = Self::load_file(&path).await?;
        Ok((config, Some(path)))
    }

    /// Load and validate one config file.
    pub async fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let config = Self::parse(&content, &path.display().to_string())?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Parse and validate config JSON. `source` names it in errors.
    pub fn parse(content: &str, source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "sweep_interval_secs must be at least 1".to_string(),
            });
        }
        self.engine
            .validate()
            .map_err(|e| ConfigError::Validation {
                message: e.to_string(),
            })
    }

    /// The global config directory, `<config_dir>/beacon`.
    pub fn global_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("beacon"))
    }

    /// The static hosts file to read, if any can be determined.
    pub fn hosts_path(&self) -> Option<PathBuf> {
        self.hosts_file
            .clone()
            .or_else(|| Self::global_config_dir().map(|dir| dir.join("hosts")))
    }

    /// The host name to claim, always in `.local`.
    pub fn resolved_host_name(&self) -> Result<String, ConfigError> {
        let name = match &self.host_name {
            Some(name) => name.clone(),
            None => hostname::get()
                .map_err(|e| ConfigError::HostName(e.to_string()))?
                .into_string()
                .map_err(|raw| ConfigError::HostName(format!("not UTF-8: {raw:?}")))?,
        };

        // Only the first label of the system name is used.
        let label = name.split('.').next().unwrap_or_default().trim();
        if label.is_empty() {
            return Err(ConfigError::HostName(format!("empty host name {name:?}")));
        }
        Ok(format!("{label}.local"))
    }
}
