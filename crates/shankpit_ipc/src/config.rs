//! # Node Configuration
//!
//! Loaded once at startup from TOML. Every field has a default, so an empty
//! file is a valid config.
//!
//! ```toml
//! socket_path = "/tmp/shankpit_miner.sock"
//! idle_timeout_ms = 3000
//! max_auth_failures = 0
//!
//! [policy]
//! min_fps = 24
//!
//! [detector]
//! history_capacity = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use shankpit_security::DetectorConfig;

use crate::error::{NodeError, NodeResult};
use crate::policy::PolicyConfig;
use crate::{DEFAULT_SOCKET_PATH, IDLE_TIMEOUT, MAX_FRAME_SIZE};

/// Node configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Path of the control socket.
    pub socket_path: PathBuf,
    /// Idle deadline for every socket read, in milliseconds.
    pub idle_timeout_ms: u64,
    /// Largest accepted frame, header included.
    pub max_frame_len: usize,
    /// Consecutive forged frames tolerated before disconnecting. 0 disables.
    pub max_auth_failures: u32,
    /// Capacity of the controller command channel.
    pub command_buffer: usize,
    /// Intensity policy constants.
    pub policy: PolicyConfig,
    /// Anomaly detector thresholds.
    pub detector: DetectorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            idle_timeout_ms: u64::try_from(IDLE_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            max_frame_len: MAX_FRAME_SIZE,
            max_auth_failures: 0,
            command_buffer: 1024,
            policy: PolicyConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> NodeResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a config file.
    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| NodeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Sets a custom socket path.
    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Sets the idle deadline.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enables disconnect after `limit` consecutive authentication failures.
    #[must_use]
    pub fn with_max_auth_failures(mut self, limit: u32) -> Self {
        self.max_auth_failures = limit;
        self
    }

    /// Idle deadline as a duration.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();

        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.idle_timeout(), Duration::from_secs(3));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/shankpit_miner.sock"));
        assert_eq!(config.policy.min_fps, 24);
        assert_eq!(config.detector.history_capacity, 60);
    }

    #[test]
    fn test_partial_sections_override() {
        let config = NodeConfig::from_toml_str(
            r#"
            socket_path = "/run/shankpit/node.sock"
            max_auth_failures = 3

            [policy]
            min_fps = 30
            bonus_multiplier = 1.5

            [detector]
            periodic_ratio = 0.9
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/run/shankpit/node.sock"));
        assert_eq!(config.max_auth_failures, 3);
        assert_eq!(config.policy.min_fps, 30);
        assert_eq!(config.policy.throttle_intensity, 0.2);
        assert_eq!(config.policy.bonus_multiplier, 1.5);
        assert_eq!(config.detector.periodic_ratio, 0.9);
        assert_eq!(config.detector.min_samples, 10);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = NodeConfig::from_toml_str("idle_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, NodeError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = NodeConfig::load("/nonexistent/shankpit.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/shankpit.toml"));
    }
}
