//! Configuration for the Pulse daemon
//!
//! CLI arguments and environment variable handling using clap.

use std::time::Duration;

use clap::Parser;

use crate::discovery::DiscoveryConfig;
use crate::score::{RefreshConfig, SweepConfig};

/// Pulse - engagement ranking and geospatial discovery engine
#[derive(Parser, Debug, Clone)]
#[command(name = "pulse")]
#[command(about = "Trending score sweeper for nightlife plans and venues")]
pub struct Args {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "pulse")]
    pub mongodb_db: String,

    /// Enable development mode (tolerates a missing MongoDB by falling back
    /// to in-memory stores)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Seconds between scheduled trending sweeps
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value = "86400")]
    pub sweep_interval_secs: u64,

    /// Entities recomputed per sweep batch
    #[arg(long, env = "SWEEP_BATCH_SIZE", default_value = "100")]
    pub sweep_batch_size: u64,

    /// Concurrent recomputes within a sweep batch
    #[arg(long, env = "SWEEP_PARALLELISM", default_value = "8")]
    pub sweep_parallelism: usize,

    /// Run a sweep immediately at startup instead of waiting one interval
    #[arg(long, env = "SWEEP_ON_START", default_value = "false")]
    pub sweep_on_start: bool,

    /// TTL for cached trending scores, in seconds
    #[arg(long, env = "SCORE_CACHE_TTL_SECS", default_value = "3600")]
    pub score_cache_ttl_secs: u64,

    /// Seconds between score cache cleanup passes
    #[arg(long, env = "CACHE_CLEANUP_INTERVAL_SECS", default_value = "300")]
    pub cache_cleanup_interval_secs: u64,

    /// Deadline for a single entity recompute, in milliseconds
    #[arg(long, env = "ENTITY_TIMEOUT_MS", default_value = "5000")]
    pub entity_timeout_ms: u64,

    /// Default page size for discovery queries
    #[arg(long, env = "DISCOVERY_DEFAULT_LIMIT", default_value = "20")]
    pub discovery_default_limit: u64,

    /// Maximum page size for discovery queries
    #[arg(long, env = "DISCOVERY_MAX_LIMIT", default_value = "100")]
    pub discovery_max_limit: u64,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_batch_size == 0 {
            return Err("SWEEP_BATCH_SIZE must be at least 1".to_string());
        }
        if self.sweep_parallelism == 0 {
            return Err("SWEEP_PARALLELISM must be at least 1".to_string());
        }
        if self.score_cache_ttl_secs == 0 {
            return Err("SCORE_CACHE_TTL_SECS must be at least 1".to_string());
        }
        if self.entity_timeout_ms == 0 {
            return Err("ENTITY_TIMEOUT_MS must be at least 1".to_string());
        }
        if self.discovery_default_limit == 0
            || self.discovery_default_limit > self.discovery_max_limit
        {
            return Err(
                "DISCOVERY_DEFAULT_LIMIT must be between 1 and DISCOVERY_MAX_LIMIT".to_string(),
            );
        }
        Ok(())
    }

    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            cache_ttl: Duration::from_secs(self.score_cache_ttl_secs),
            entity_timeout: Duration::from_millis(self.entity_timeout_ms),
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            batch_size: self.sweep_batch_size,
            parallelism: self.sweep_parallelism,
            interval: Duration::from_secs(self.sweep_interval_secs),
            sweep_on_start: self.sweep_on_start,
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            default_limit: self.discovery_default_limit,
            max_limit: self.discovery_max_limit,
            ..DiscoveryConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            mongodb_uri: "mongodb://localhost:27017".into(),
            mongodb_db: "pulse".into(),
            dev_mode: true,
            log_level: "info".into(),
            sweep_interval_secs: 86_400,
            sweep_batch_size: 100,
            sweep_parallelism: 8,
            sweep_on_start: false,
            score_cache_ttl_secs: 3_600,
            cache_cleanup_interval_secs: 300,
            entity_timeout_ms: 5_000,
            discovery_default_limit: 20,
            discovery_max_limit: 100,
        }
    }

    #[test]
    fn test_valid_defaults_pass() {
        assert!(base_args().validate().is_ok());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut args = base_args();
        args.sweep_batch_size = 0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut args = base_args();
        args.sweep_parallelism = 0;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_default_limit_cannot_exceed_max() {
        let mut args = base_args();
        args.discovery_default_limit = 500;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_configs_carry_durations() {
        let args = base_args();
        assert_eq!(args.refresh_config().cache_ttl, Duration::from_secs(3_600));
        assert_eq!(
            args.sweep_config().interval,
            Duration::from_secs(86_400)
        );
        assert_eq!(args.discovery_config().default_limit, 20);
    }
}
