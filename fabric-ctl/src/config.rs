//! Controller configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Forwarding priority {forward} must be above table-miss priority {miss}")]
    PriorityOrder { miss: u16, forward: u16 },
}

/// Controller settings. Every field has a default, so an empty JSON object
/// is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Priority of the match-all rule that sends misses to the controller.
    pub miss_priority: u16,
    /// Priority of per-destination forwarding rules.
    pub forward_priority: u16,
    /// Idle timeout of forwarding rules in seconds (0 = permanent).
    pub idle_timeout: u16,
    /// Hard timeout of forwarding rules in seconds (0 = permanent).
    pub hard_timeout: u16,
    /// Edge-broadcast IPv4 packets whose destination is not yet known.
    pub broadcast_unknown_ipv4: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            miss_priority: 0,
            forward_priority: 1,
            idle_timeout: 0,
            hard_timeout: 0,
            broadcast_unknown_ipv4: true,
        }
    }
}

impl ControllerConfig {
    /// Load and validate a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forward_priority <= self.miss_priority {
            return Err(ConfigError::PriorityOrder {
                miss: self.miss_priority,
                forward: self.forward_priority,
            });
        }
        Ok(())
    }
}
