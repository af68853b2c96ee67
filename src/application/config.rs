//! File-based engine configuration.
//!
//! ```toml
//! store_timeout_secs = 5
//! broadcast_capacity = 64
//! sink_capacity = 256
//! sweep_interval_secs = 3600
//!
//! [aggregation]
//! low = "calendar_day"
//! medium = { rolling = { seconds = 3600 } }
//! high = "disabled"
//! urgent = "disabled"
//!
//! [expiry]
//! low_days = 7
//!
//! [rules]
//! budget_thresholds = [80, 100]
//! currency_symbol = "₱"
//! ```
//!
//! Every key is optional; missing keys take their defaults.

use crate::domain::policy::{AggregationPolicy, ExpiryPolicy, PolicyError, RulePolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Failure to load or validate an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid rule policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("{0} must be greater than 0")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store_timeout_secs: u64,
    pub broadcast_capacity: usize,
    /// Set to false to run without live fan-out.
    pub broadcast_enabled: bool,
    /// Queue length in front of each delivery sink.
    pub sink_capacity: usize,
    pub sweep_interval_secs: u64,
    pub sweep_lease_secs: u64,
    /// Name used for the sweep lease. Random when absent.
    pub instance_id: Option<String>,
    pub aggregation: AggregationPolicy,
    pub expiry: ExpiryPolicy,
    pub rules: RulePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout_secs: 5,
            broadcast_capacity: 64,
            broadcast_enabled: true,
            sink_capacity: 256,
            sweep_interval_secs: 3600,
            sweep_lease_secs: 300,
            instance_id: None,
            aggregation: AggregationPolicy::default(),
            expiry: ExpiryPolicy::default(),
            rules: RulePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout_secs == 0 {
            return Err(ConfigError::Zero("store_timeout_secs"));
        }
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Zero("broadcast_capacity"));
        }
        if self.sink_capacity == 0 {
            return Err(ConfigError::Zero("sink_capacity"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Zero("sweep_interval_secs"));
        }
        if self.sweep_lease_secs == 0 {
            return Err(ConfigError::Zero("sweep_lease_secs"));
        }
        self.rules.validate()?;
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn sweep_lease(&self) -> Duration {
        Duration::from_secs(self.sweep_lease_secs)
    }
}
