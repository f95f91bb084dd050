use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::tracker::{DEFAULT_LIMIT, DEFAULT_WINDOW_SECS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server settings
///
/// Every field has a default, so a config file only needs to list what it
/// changes.
///
/// ```toml
/// bind_address = "0.0.0.0:8080"
/// download_limit = 20
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bind_address: String,
    /// SQLite file holding the market-data tables
    pub database_path: String,
    /// CSV downloads allowed per window and session
    pub download_limit: usize,
    pub download_window_secs: i64,
    pub max_preview_rows: u32,
    pub max_download_rows: u32,
    pub session_ttl_secs: u64,
    /// Print each preview's SQL under its table
    pub show_query_text: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            database_path: "database/ovs.sqlite3".to_string(),
            download_limit: DEFAULT_LIMIT,
            download_window_secs: DEFAULT_WINDOW_SECS,
            max_preview_rows: 100,
            max_download_rows: 5000,
            session_ttl_secs: crate::session::SESSION_DURATION,
            show_query_text: false,
        }
    }
}

impl AppConfig {
    /// Load settings from a TOML file. A file that does not exist yields
    /// the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}
