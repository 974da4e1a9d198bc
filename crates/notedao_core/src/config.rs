//! Session configuration loaded from TOML.
//!
//! # Invariants
//! - Every field has a default, so an empty document is a valid config.
//! - An absent `database_path` selects an in-memory database.

use crate::session::FlushMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub database_path: Option<PathBuf>,
    pub flush_mode: FlushMode,
    pub busy_timeout_ms: u64,
    /// One of `trace|debug|info|warn|error`; logging stays off when unset.
    pub log_level: Option<String>,
    /// Absolute directory for rolling log files.
    pub log_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            flush_mode: FlushMode::Commit,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            log_level: None,
            log_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
