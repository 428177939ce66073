//! Engine timing configuration.
//!
//! Defaults follow the usual multicast-DNS pacing: three probes 250 ms apart,
//! a 250 ms grace period for late conflicting probes, then three
//! announcements spaced one, then two seconds apart.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Timing and repetition constants for the announcement state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Probes sent before a name is considered free.
    pub probe_count: u32,
    /// Spacing between probes, in milliseconds.
    pub probe_interval_ms: u64,
    /// Grace period after the last probe, in milliseconds.
    pub waiting_grace_ms: u64,
    /// Announcements sent before a record is established.
    pub announce_count: u32,
    /// Delay after the first announcement, in milliseconds.
    pub announce_initial_delay_ms: u64,
    /// Upper bound for the doubling announcement delay, in milliseconds.
    pub announce_max_delay_ms: u64,
    /// Percentage of the TTL after which an established record is re-sent
    /// by the interface sweep.
    pub refresh_percent: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            probe_count: 3,
            probe_interval_ms: 250,
            waiting_grace_ms: 250,
            announce_count: 3,
            announce_initial_delay_ms: 1000,
            announce_max_delay_ms: 8000,
            refresh_percent: 80,
        }
    }
}

impl EngineConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn waiting_grace(&self) -> Duration {
        Duration::from_millis(self.waiting_grace_ms)
    }

    pub fn announce_initial_delay(&self) -> Duration {
        Duration::from_millis(self.announce_initial_delay_ms)
    }

    pub fn announce_max_delay(&self) -> Duration {
        Duration::from_millis(self.announce_max_delay_ms)
    }

    /// Age after which a record with `ttl` seconds is refreshed.
    pub fn refresh_after(&self, ttl: u32) -> Duration {
        Duration::from_millis(u64::from(ttl) * 10 * u64::from(self.refresh_percent))
    }

    /// Reject configurations the state machine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.probe_count == 0 {
            return Err(CoreError::InvalidConfig(
                "probe_count must be at least 1".to_string(),
            ));
        }
        if self.announce_count == 0 {
            return Err(CoreError::InvalidConfig(
                "announce_count must be at least 1".to_string(),
            ));
        }
        if self.announce_max_delay_ms < self.announce_initial_delay_ms {
            return Err(CoreError::InvalidConfig(format!(
                "announce_max_delay_ms ({}) is below announce_initial_delay_ms ({})",
                self.announce_max_delay_ms, self.announce_initial_delay_ms
            )));
        }
        if self.refresh_percent == 0 || self.refresh_percent > 100 {
            return Err(CoreError::InvalidConfig(format!(
                "refresh_percent must be within 1..=100, got {}",
                self.refresh_percent
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.probe_interval(), Duration::from_millis(250));
        assert_eq!(config.announce_initial_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_refresh_after_is_percentage_of_ttl() {
        let config = EngineConfig::default();
        assert_eq!(config.refresh_after(120), Duration::from_secs(96));
        assert_eq!(config.refresh_after(0), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_zero_probes() {
        let config = EngineConfig {
            probe_count: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let config = EngineConfig {
            announce_initial_delay_ms: 5000,
            announce_max_delay_ms: 1000,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"probe_count": 5}"#).unwrap();
        assert_eq!(config.probe_count, 5);
        assert_eq!(config.announce_count, 3);
    }
}
