//! Flow cache configuration

use crate::error::{FlowTableError, FlowTableResult};
use crate::{DEFAULT_BUCKETS, DEFAULT_MAX_FLOWS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Flow cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowTableConfig {
    /// Master switch
    pub enabled: bool,
    /// Number of shards (0 = one per available core)
    pub shards: usize,
    /// Buckets per shard in the IPv4 table (rounded up to a power of two)
    pub ipv4_buckets: usize,
    /// Buckets per shard in the IPv6 table (rounded up to a power of two)
    pub ipv6_buckets: usize,
    /// Soft cap on live entries across both tables
    pub max_flows: usize,
    /// Key TCP/UDP/SCTP flows by port pair as well as addresses
    pub hash_ports: bool,
    /// Idle time before eviction (seconds)
    pub idle_timeout_secs: u64,
    /// Idle time before eviction under pool pressure (seconds)
    pub pressure_idle_timeout_secs: u64,
    /// Pause between reaper passes (seconds)
    pub sweep_interval_secs: u64,
    /// Pause between reaper passes under pool pressure (seconds)
    pub pressure_sweep_interval_secs: u64,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shards: 0,
            ipv4_buckets: DEFAULT_BUCKETS,
            ipv6_buckets: DEFAULT_BUCKETS,
            max_flows: DEFAULT_MAX_FLOWS,
            hash_ports: true,
            idle_timeout_secs: 30,
            pressure_idle_timeout_secs: 5,
            sweep_interval_secs: 20,
            pressure_sweep_interval_secs: 4,
        }
    }
}

impl FlowTableConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> FlowTableResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> FlowTableResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the cache cannot run with
    pub fn validate(&self) -> FlowTableResult<()> {
        if self.ipv4_buckets == 0 || self.ipv6_buckets == 0 {
            return Err(FlowTableError::ConfigError(
                "bucket counts must be non-zero".into(),
            ));
        }
        if self.max_flows == 0 {
            return Err(FlowTableError::ConfigError("max_flows must be non-zero".into()));
        }
        if self.idle_timeout_secs == 0 || self.pressure_idle_timeout_secs == 0 {
            return Err(FlowTableError::ConfigError(
                "idle timeouts must be non-zero".into(),
            ));
        }
        if self.pressure_idle_timeout_secs > self.idle_timeout_secs {
            return Err(FlowTableError::ConfigError(format!(
                "pressure_idle_timeout_secs ({}) exceeds idle_timeout_secs ({})",
                self.pressure_idle_timeout_secs, self.idle_timeout_secs
            )));
        }
        if self.sweep_interval_secs == 0 || self.pressure_sweep_interval_secs == 0 {
            return Err(FlowTableError::ConfigError(
                "sweep intervals must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Resolved shard count
    pub fn shard_count(&self) -> usize {
        if self.shards == 0 {
            num_cpus()
        } else {
            self.shards
        }
    }

    /// Entry count at which the reaper turns aggressive (7/8 of `max_flows`)
    pub fn pressure_threshold(&self) -> usize {
        self.max_flows - self.max_flows / 8
    }

    /// Idle limit for the given pool state
    pub fn max_idle(&self, under_pressure: bool) -> Duration {
        if under_pressure {
            Duration::from_secs(self.pressure_idle_timeout_secs)
        } else {
            Duration::from_secs(self.idle_timeout_secs)
        }
    }

    /// Reaper pause for the given pool state
    pub fn sweep_interval(&self, under_pressure: bool) -> Duration {
        if under_pressure {
            Duration::from_secs(self.pressure_sweep_interval_secs)
        } else {
            Duration::from_secs(self.sweep_interval_secs)
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FlowTableConfig::default();
        config.validate().unwrap();

        assert!(config.shard_count() >= 1);
        assert_eq!(config.max_idle(false), Duration::from_secs(30));
        assert_eq!(config.max_idle(true), Duration::from_secs(5));
        assert_eq!(config.sweep_interval(true), Duration::from_secs(4));
    }

    #[test]
    fn test_pressure_threshold_is_seven_eighths() {
        let config = FlowTableConfig {
            max_flows: 1024,
            ..Default::default()
        };
        assert_eq!(config.pressure_threshold(), 896);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FlowTableConfig::from_toml_str(
            r#"
            shards = 4
            max_flows = 4096
            hash_ports = false
            "#,
        )
        .unwrap();

        assert_eq!(config.shard_count(), 4);
        assert_eq!(config.max_flows, 4096);
        assert!(!config.hash_ports);
        assert_eq!(config.ipv4_buckets, DEFAULT_BUCKETS);
        assert_eq!(config.idle_timeout_secs, 30);
    }

    #[test]
    fn test_rejects_bad_settings() {
        let err = FlowTableConfig::from_toml_str("max_flows = 0").unwrap_err();
        assert!(matches!(err, FlowTableError::ConfigError(_)));

        let err = FlowTableConfig::from_toml_str(
            "idle_timeout_secs = 5\npressure_idle_timeout_secs = 10",
        )
        .unwrap_err();
        assert!(err.to_string().contains("pressure_idle_timeout_secs"));

        let err = FlowTableConfig::from_toml_str("shards = \"many\"").unwrap_err();
        assert!(matches!(err, FlowTableError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FlowTableConfig::load("/nonexistent/flowtable.toml").unwrap_err();
        assert!(matches!(err, FlowTableError::Io(_)));
    }
}
