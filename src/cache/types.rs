use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one
    pub default_ttl_secs: u64,
    /// Interval of the background expiry sweep
    pub sweep_interval_secs: u64,
    /// Enables the distributed tier when built with `redis-tier`
    pub redis_url: Option<String>,
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            sweep_interval_secs: 60,
            redis_url: None,
            key_prefix: "modelprobe:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Observable cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub promotions: u64,
    pub distributed_errors: u64,
    pub items: usize,
    pub distributed_tier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("TTL must be greater than zero and representable")]
    InvalidTtl,
    #[error("Serialization failed: {0}")]
    Serialization(String),
    #[error("Distributed tier error: {0}")]
    Distributed(String),
}
