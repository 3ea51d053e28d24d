//! CLI configuration.
//!
//! Loads settings from a YAML file or environment variables.

use muse_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a muse-explore run.
///
/// Example YAML:
/// ```yaml
/// engine:
///   dimension: 512
///   cache:
///     ttl_secs: 300
/// data_file: "artworks.ndjson"
/// checkpoint: "muse.ckpt"
/// walk_steps: 5
/// k: 8
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine parameters.
    #[serde(default)]
    pub engine: EngineConfig,

    /// NDJSON file of artwork vectors to ingest on startup.
    #[serde(default)]
    pub data_file: Option<PathBuf>,

    /// Checkpoint file: restored from on startup when present, written on
    /// shutdown.
    #[serde(default)]
    pub checkpoint: Option<PathBuf>,

    /// Steps in the demo similarity walk.
    #[serde(default = "default_walk_steps")]
    pub walk_steps: usize,

    /// Neighbors requested per step.
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_walk_steps() -> usize {
    5
}

fn default_k() -> usize {
    8
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("failed to read config file: {}", e)))?;

        let config: AppConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("failed to parse YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported variables:
    /// - MUSE_DIMENSION (required)
    /// - MUSE_DATA_FILE
    /// - MUSE_CHECKPOINT
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let dimension = std::env::var("MUSE_DIMENSION")
            .map_err(|_| ConfigError::MissingField("MUSE_DIMENSION".to_string()))?
            .parse::<usize>()
            .map_err(|e| ConfigError::InvalidField(format!("MUSE_DIMENSION: {}", e)))?;

        let config = AppConfig {
            engine: EngineConfig::new(dimension),
            data_file: std::env::var("MUSE_DATA_FILE").ok().map(PathBuf::from),
            checkpoint: std::env::var("MUSE_CHECKPOINT").ok().map(PathBuf::from),
            walk_steps: default_walk_steps(),
            k: default_k(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .validate()
            .map_err(|e| ConfigError::InvalidField(e.to_string()))?;

        if self.k == 0 {
            return Err(ConfigError::InvalidField("k must be > 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid field: {0}")]
    InvalidField(String),
}
