//! Configuration types for the discovery session manager

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the discovery session manager and its mDNS backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Domain suffix reported as `domain` and stripped from service types
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,

    /// Pause between consecutive resolves on one watch (milliseconds)
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Maximum pending resolves per watch; oldest is dropped when full
    #[serde(default)]
    pub resolve_queue_capacity: Option<usize>,

    /// How long the mDNS backend waits for a resolution (seconds)
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,

    /// Buffer size for platform browse events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            domain_suffix: default_domain_suffix(),
            settle_delay_ms: default_settle_delay(),
            resolve_queue_capacity: None,
            resolve_timeout_secs: default_resolve_timeout(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl DiscoveryConfig {
    /// Returns the settling delay as a Duration
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Returns the resolve timeout as a Duration
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.domain_suffix.is_empty() {
            return Err("domain_suffix cannot be empty".to_string());
        }

        if !self.domain_suffix.ends_with('.') {
            return Err(format!(
                "domain_suffix '{}' must end with '.'",
                self.domain_suffix
            ));
        }

        if self.resolve_queue_capacity == Some(0) {
            return Err("resolve_queue_capacity cannot be 0".to_string());
        }

        if self.resolve_timeout_secs == 0 {
            return Err("resolve_timeout_secs cannot be 0".to_string());
        }

        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity cannot be 0".to_string());
        }

        Ok(())
    }
}

// Default configuration values
fn default_domain_suffix() -> String {
    "local.".to_string()
}

fn default_settle_delay() -> u64 {
    1000
}

fn default_resolve_timeout() -> u64 {
    5
}

fn default_event_channel_capacity() -> usize {
    256
}
