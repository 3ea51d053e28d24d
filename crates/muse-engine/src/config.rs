//! Engine configuration.

use crate::{EngineError, Result};
use muse_cache::CacheConfig;
use muse_hnsw::HnswConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration.
///
/// Example YAML:
/// ```yaml
/// dimension: 512
/// index:
///   m: 16
///   ef_search: 100
/// cache:
///   capacity: 4096
///   ttl_secs: 300
/// sampler:
///   history: 50
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Embedding dimension, fixed system-wide.
    pub dimension: usize,

    /// ANN index parameters.
    #[serde(default)]
    pub index: HnswConfig,

    /// Result cache parameters.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Seed sampler parameters.
    #[serde(default)]
    pub sampler: SamplerSettings,

    /// Over-fetch multiplier applied before tag post-filtering, to
    /// compensate for filter attrition.
    #[serde(default = "default_filter_overfetch")]
    pub filter_overfetch: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum cached query results.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Seconds before a cached result reads as a miss.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Background sweep interval in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerSettings {
    /// Size of the recent-seed window excluded from sampling.
    #[serde(default = "default_sampler_history")]
    pub history: usize,
}

fn default_filter_overfetch() -> usize {
    3
}
fn default_cache_capacity() -> usize {
    4096
}
fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_sampler_history() -> usize {
    50
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            history: default_sampler_history(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(512)
    }
}

impl CacheSettings {
    pub(crate) fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.capacity,
            ttl: Duration::from_secs(self.ttl_secs),
        }
    }

    pub(crate) fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl EngineConfig {
    /// Configuration with defaults for the given embedding dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            index: HnswConfig::default(),
            cache: CacheSettings::default(),
            sampler: SamplerSettings::default(),
            filter_overfetch: default_filter_overfetch(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(EngineError::Config("dimension must be > 0".to_string()));
        }

        if self.index.m < 2 {
            return Err(EngineError::Config("index.m must be >= 2".to_string()));
        }

        if self.index.m_max0 < self.index.m {
            return Err(EngineError::Config(format!(
                "index.m_max0 ({}) must be >= index.m ({})",
                self.index.m_max0, self.index.m
            )));
        }

        if self.index.ef_construction < self.index.m {
            return Err(EngineError::Config(
                "index.ef_construction must be >= index.m".to_string(),
            ));
        }

        if self.index.ef_search == 0 {
            return Err(EngineError::Config("index.ef_search must be > 0".to_string()));
        }

        if self.index.max_layers == 0 || self.index.max_layers > 32 {
            return Err(EngineError::Config(
                "index.max_layers must be in range [1, 32]".to_string(),
            ));
        }

        if self.index.compaction_threshold <= 0.0 || self.index.compaction_threshold > 1.0 {
            return Err(EngineError::Config(
                "index.compaction_threshold must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.cache.capacity == 0 {
            return Err(EngineError::Config("cache.capacity must be > 0".to_string()));
        }

        if self.cache.ttl_secs == 0 {
            return Err(EngineError::Config("cache.ttl_secs must be > 0".to_string()));
        }

        if self.filter_overfetch == 0 {
            return Err(EngineError::Config(
                "filter_overfetch must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}
