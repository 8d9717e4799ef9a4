//! Pipeline tuning.
//!
//! Loaded from `~/.config/execpipe/config.toml` when present. Every field is
//! optional; missing fields take the defaults below.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::DEFAULT_CAPACITY;
use crate::debug::DebugLevel;

/// Errors loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tuning knobs for the driver loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// Initial capacity of each link buffer.
    pub buffer_capacity: usize,

    /// Upper bound on bytes read from a descriptor per readiness event.
    pub read_chunk_size: usize,

    /// Buffered bytes at which a link stops pulling from its upstream.
    ///
    /// Upstream processes then block on their own stdout, which is the
    /// backpressure that keeps a slow consumer from exhausting memory.
    pub high_water: usize,

    /// Poll timeout in milliseconds. Only a liveness safeguard; nothing is
    /// cancelled when it expires.
    pub poll_timeout_ms: u16,

    /// Initial debug verbosity for pipelines built with this config.
    pub debug_level: DebugLevel,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            read_chunk_size: 64 * 1024,
            high_water: 1024 * 1024,
            poll_timeout_ms: 1000,
            debug_level: DebugLevel::None,
        }
    }
}

impl PipeConfig {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location, if a home directory is known.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "execpipe").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid("read_chunk_size must be non-zero".into()));
        }
        if self.high_water == 0 {
            return Err(ConfigError::Invalid("high_water must be non-zero".into()));
        }
        Ok(())
    }
}
