//! Engine configuration.

use crate::fingerprint::ClientIpStrategy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be > 0")]
    Zero { field: &'static str },
    #[error("admin_path_prefix must be empty or a path below '/', got '{0}'")]
    AdminPrefix(String),
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings for [`Turnstile`](crate::Turnstile). Every field has a default, so an empty JSON
/// object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnstileConfig {
    /// Requests under this path are never limited. Empty disables the exemption.
    pub admin_path_prefix: String,
    pub rule_cache_capacity: u64,
    pub rule_cache_idle_secs: u64,
    pub admission_cache_capacity: u64,
    /// Unbanned fingerprints idle this long are forgotten.
    pub admission_cache_idle_secs: u64,
    pub flush_interval_secs: u64,
    /// `None` disables slow-response alerts.
    pub slow_response_threshold_ms: Option<u64>,
    pub client_ip_strategy: ClientIpStrategy,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            admin_path_prefix: crate::admission::engine::DEFAULT_ADMIN_PREFIX.to_string(),
            rule_cache_capacity: 10_000,
            rule_cache_idle_secs: 600,
            admission_cache_capacity: 100_000,
            admission_cache_idle_secs: 3_600,
            flush_interval_secs: 10,
            slow_response_threshold_ms: None,
            client_ip_strategy: ClientIpStrategy::default(),
        }
    }
}

impl TurnstileConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = self.admin_path_prefix.as_str();
        if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.trim_end_matches('/').is_empty()) {
            return Err(ConfigError::AdminPrefix(prefix.to_string()));
        }
        let positive = [
            ("rule_cache_capacity", self.rule_cache_capacity),
            ("rule_cache_idle_secs", self.rule_cache_idle_secs),
            ("admission_cache_capacity", self.admission_cache_capacity),
            ("admission_cache_idle_secs", self.admission_cache_idle_secs),
            ("flush_interval_secs", self.flush_interval_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.slow_response_threshold_ms == Some(0) {
            return Err(ConfigError::Zero { field: "slow_response_threshold_ms" });
        }
        Ok(())
    }

    pub fn with_admin_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.admin_path_prefix = prefix.into();
        self
    }

    pub fn with_rule_cache(mut self, capacity: u64, idle: Duration) -> Self {
        self.rule_cache_capacity = capacity;
        self.rule_cache_idle_secs = idle.as_secs();
        self
    }

    pub fn with_admission_cache(mut self, capacity: u64, idle: Duration) -> Self {
        self.admission_cache_capacity = capacity;
        self.admission_cache_idle_secs = idle.as_secs();
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_secs = interval.as_secs();
        self
    }

    pub fn with_slow_response_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.slow_response_threshold_ms =
            threshold.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_client_ip_strategy(mut self, strategy: ClientIpStrategy) -> Self {
        self.client_ip_strategy = strategy;
        self
    }

    pub fn rule_cache_idle(&self) -> Duration {
        Duration::from_secs(self.rule_cache_idle_secs)
    }

    pub fn admission_cache_idle(&self) -> Duration {
        Duration::from_secs(self.admission_cache_idle_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn slow_response_threshold(&self) -> Option<Duration> {
        self.slow_response_threshold_ms.map(Duration::from_millis)
    }
}
