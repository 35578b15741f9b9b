use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain_forge::DEFAULT_DEVICE_ID;
use crate::keybox_cache::DEFAULT_BACKUP_DIRECTORY;
use crate::revocation::{DEFAULT_FETCH_TIMEOUT, DEFAULT_REVOCATION_URL};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub revocation: RevocationConfig,
    #[serde(default)]
    pub forge: ForgeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_backup_directory_name")]
    pub backup_directory_name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
            backup_directory_name: default_backup_directory_name(),
        }
    }
}

fn default_cache_directory() -> PathBuf {
    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".config").join("keybox-chain").join("keyboxes")
}

fn default_backup_directory_name() -> String {
    DEFAULT_BACKUP_DIRECTORY.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RevocationConfig {
    #[serde(default = "default_revocation_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            url: default_revocation_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RevocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_revocation_url() -> String {
    DEFAULT_REVOCATION_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForgeConfig {
    /// DeviceID written into forged keyboxes
    #[serde(default = "default_device_id")]
    pub device_id: String,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
        }
    }
}

fn default_device_id() -> String {
    DEFAULT_DEVICE_ID.to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise use built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}
