//! Playground configuration.

use std::fs;
use std::path::{Path, PathBuf};

use playground_core::{HighlightConfig, SyncConfig};
use playground_runtime::RunConfig;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// All tunables, grouped by subsystem. Missing sections and fields fall
/// back to their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct PlaygroundConfig {
    pub sync: SyncConfig,
    pub highlight: HighlightConfig,
    pub run: RunConfig,
}

impl PlaygroundConfig {
    /// Parses a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Loads a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }
}
