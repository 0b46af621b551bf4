//! Configuration for the ops-mesh runtime
//!
//! Loaded from TOML with serde defaults so a partial file (or no file at all)
//! yields a working configuration. Durations are stored as integer fields and
//! exposed through typed accessors.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level mesh configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    #[serde(default)]
    pub discovery: DiscoverySection,
    #[serde(default)]
    pub tasks: TaskSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub agents: AgentsSection,
}

/// Discovery service timing windows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoverySection {
    /// Seconds of heartbeat silence before an agent is marked unreachable
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,
    /// Seconds of heartbeat silence before an unreachable agent is evicted
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,
    /// Interval between registry sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_liveness_window_secs() -> u64 {
    15
}

fn default_grace_window_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    5
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            liveness_window_secs: default_liveness_window_secs(),
            grace_window_secs: default_grace_window_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl DiscoverySection {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_secs(self.grace_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Task protocol engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSection {
    /// Default per-attempt timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Maximum retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Cap on backoff delay in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Inbound dedup ledger capacity (completed task responses cached)
    #[serde(default = "default_inbound_cache_size")]
    pub inbound_cache_size: usize,
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_cap_ms() -> u64 {
    5000
}

fn default_inbound_cache_size() -> usize {
    1024
}

impl Default for TaskSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            inbound_cache_size: default_inbound_cache_size(),
        }
    }
}

impl TaskSection {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    /// Backoff delay before retry attempt `attempt` (1-based), doubling from
    /// the base and capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay_ms = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.backoff_cap_ms))
    }
}

/// Workflow orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSection {
    /// Hard ceiling on a whole workflow instance in seconds
    #[serde(default = "default_overall_ceiling_secs")]
    pub overall_ceiling_secs: u64,
}

fn default_overall_ceiling_secs() -> u64 {
    300
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            overall_ceiling_secs: default_overall_ceiling_secs(),
        }
    }
}

impl WorkflowSection {
    pub fn overall_ceiling(&self) -> Duration {
        Duration::from_secs(self.overall_ceiling_secs)
    }
}

/// Queue manager settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    /// Floor for wait estimates in minutes
    #[serde(default = "default_min_wait_floor_mins")]
    pub min_wait_floor_mins: u64,
    /// Number of completed services kept for the rolling average
    #[serde(default = "default_service_window")]
    pub service_window: usize,
    /// Seed service duration for appointment entries in minutes
    #[serde(default = "default_appointment_service_mins")]
    pub appointment_service_mins: u64,
    /// Seed service duration for walk-in entries in minutes
    #[serde(default = "default_walkin_service_mins")]
    pub walkin_service_mins: u64,
    /// Seed service duration for emergency entries in minutes
    #[serde(default = "default_emergency_service_mins")]
    pub emergency_service_mins: u64,
}

fn default_min_wait_floor_mins() -> u64 {
    5
}

fn default_service_window() -> usize {
    32
}

fn default_appointment_service_mins() -> u64 {
    30
}

fn default_walkin_service_mins() -> u64 {
    20
}

fn default_emergency_service_mins() -> u64 {
    10
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            min_wait_floor_mins: default_min_wait_floor_mins(),
            service_window: default_service_window(),
            appointment_service_mins: default_appointment_service_mins(),
            walkin_service_mins: default_walkin_service_mins(),
            emergency_service_mins: default_emergency_service_mins(),
        }
    }
}

impl QueueSection {
    pub fn min_wait_floor(&self) -> Duration {
        Duration::from_secs(self.min_wait_floor_mins * 60)
    }
}

/// Per-agent runtime settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentsSection {
    /// Heartbeat publication interval in seconds
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

impl Default for AgentsSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl AgentsSection {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl MeshConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: MeshConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discovery.liveness_window_secs == 0 {
            return Err(ConfigError::Validation(
                "discovery.liveness_window_secs must be positive".to_string(),
            ));
        }
        if self.discovery.grace_window_secs < self.discovery.liveness_window_secs {
            return Err(ConfigError::Validation(
                "discovery.grace_window_secs must be at least the liveness window".to_string(),
            ));
        }
        if self.discovery.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "discovery.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.tasks.default_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "tasks.default_timeout_ms must be positive".to_string(),
            ));
        }
        if self.tasks.backoff_cap_ms < self.tasks.backoff_base_ms {
            return Err(ConfigError::Validation(
                "tasks.backoff_cap_ms must be at least the backoff base".to_string(),
            ));
        }
        if self.workflow.overall_ceiling_secs == 0 {
            return Err(ConfigError::Validation(
                "workflow.overall_ceiling_secs must be positive".to_string(),
            ));
        }
        if self.queue.service_window == 0 {
            return Err(ConfigError::Validation(
                "queue.service_window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_windows() {
        let config = MeshConfig::default();
        assert_eq!(config.discovery.liveness_window(), Duration::from_secs(15));
        assert_eq!(config.discovery.grace_window(), Duration::from_secs(60));
        assert_eq!(config.tasks.default_timeout(), Duration::from_millis(3000));
        assert_eq!(config.queue.min_wait_floor(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: MeshConfig = toml::from_str(
            r#"
            [discovery]
            liveness_window_secs = 10
        "#,
        )
        .unwrap();

        assert_eq!(config.discovery.liveness_window_secs, 10);
        assert_eq!(config.discovery.grace_window_secs, 60);
        assert_eq!(config.tasks.max_retries, 3);
        assert_eq!(config.queue.walkin_service_mins, 20);
    }

    #[test]
    fn test_grace_window_must_cover_liveness() {
        let config: MeshConfig = toml::from_str(
            r#"
            [discovery]
            liveness_window_secs = 30
            grace_window_secs = 10
        "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("grace_window_secs"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let tasks = TaskSection {
            backoff_base_ms: 100,
            backoff_cap_ms: 500,
            ..Default::default()
        };

        assert_eq!(tasks.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(tasks.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(tasks.backoff_delay(3), Duration::from_millis(400));
        // Capped from here on
        assert_eq!(tasks.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(tasks.backoff_delay(10), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config: MeshConfig = toml::from_str(
            r#"
            [tasks]
            default_timeout_ms = 0
        "#,
        )
        .unwrap();

        assert!(config.validate().is_err());
    }
}
