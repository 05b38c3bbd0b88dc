//! Configuration
//!
//! Loaded from:
//! - Default values
//! - Config file (~/.config/cogcommit/config.toml)
//! - Environment variables (`COGCOMMIT_TOKEN`, `COGCOMMIT_REMOTE_URL`)

use crate::error::{Error, Result};
use crate::sync::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const TOKEN_ENV: &str = "COGCOMMIT_TOKEN";
pub const REMOTE_URL_ENV: &str = "COGCOMMIT_REMOTE_URL";

const DB_FILE: &str = "data.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the local store
    pub storage_dir: PathBuf,

    /// Root of the transcript tree to import
    pub transcripts_dir: PathBuf,

    pub remote: RemoteConfig,

    pub sync: SyncSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    /// Bearer token; absent means logged out
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub conflict_policy: ConflictPolicy,
    /// Sync after every import
    pub continuous_sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data_dir = dirs::data_dir().unwrap_or_else(|| home.join(".local/share"));

        Self {
            storage_dir: data_dir.join("cogcommit"),
            transcripts_dir: home.join(".claude/projects"),
            remote: RemoteConfig::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "https://api.cogcommit.com".to_string(),
            token: None,
            user_id: None,
            timeout_secs: 30,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::LastWriterWins,
            continuous_sync: false,
        }
    }
}

impl Config {
    /// Default config file location
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("cogcommit/config.toml"))
            .unwrap_or_else(|| PathBuf::from("cogcommit.toml"))
    }

    /// Load from the default location with environment overrides applied
    pub fn load() -> Self {
        let mut config = Self::load_from(&Self::config_path());
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load from `path`, falling back to defaults if it is missing or invalid
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Ignoring invalid config {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read config {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from an environment lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.remote.token = Some(token);
        }
        if let Some(url) = lookup(REMOTE_URL_ENV).filter(|u| !u.is_empty()) {
            self.remote.url = url;
        }
    }

    /// Path of the local store file
    pub fn db_path(&self) -> PathBuf {
        self.storage_dir.join(DB_FILE)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }
}
