//! Configuration
//!
//! Timing and retry parameters for every component. Values come from
//! `Default` (production), [`ResilienceConfig::test_profile`], a flat
//! key/value map, or `RELIC_*` environment variables.
//!
//! | Key                          | Default  |
//! |------------------------------|----------|
//! | `heartbeat.interval_ms`      | 30000    |
//! | `heartbeat.sweep_interval_ms`| 10000    |
//! | `heartbeat.timeout_ms`       | 60000    |
//! | `retry.initial_delay_ms`     | 1000     |
//! | `retry.multiplier`           | 2.0      |
//! | `retry.max_delay_ms`         | 30000    |
//! | `retry.max_attempts`         | 3        |
//! | `reconnect.initial_delay_ms` | 1000     |
//! | `reconnect.multiplier`       | 2.0      |
//! | `reconnect.max_delay_ms`     | 30000    |
//! | `reconnect.jitter`           | 0.1      |
//! | `reconnect.max_attempts`     | 5        |
//! | `resync.max_attempts`        | 2        |
//! | `resync.delay_ms`            | 500      |
//! | `snapshot.max_age_ms`        | 300000   |
//! | `connection.history_limit`   | 256      |
//! | `codec`                      | `json`   |

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

use crate::network::{HeartbeatConfig, ReconnectSettings, WireCodec, DEFAULT_HISTORY_LIMIT};
use crate::recovery::BackoffPolicy;

/// Every recognised settings key.
pub const SETTINGS_KEYS: [&str; 17] = [
    "heartbeat.interval_ms",
    "heartbeat.sweep_interval_ms",
    "heartbeat.timeout_ms",
    "retry.initial_delay_ms",
    "retry.multiplier",
    "retry.max_delay_ms",
    "retry.max_attempts",
    "reconnect.initial_delay_ms",
    "reconnect.multiplier",
    "reconnect.max_delay_ms",
    "reconnect.jitter",
    "reconnect.max_attempts",
    "resync.max_attempts",
    "resync.delay_ms",
    "snapshot.max_age_ms",
    "connection.history_limit",
    "codec",
];

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Key is not recognised.
    #[error("unknown setting: {0}")]
    UnknownKey(String),
    /// Value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Setting key.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Values are individually valid but inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Resilience layer configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ResilienceConfig {
    /// Probe and timeout timing.
    pub heartbeat: HeartbeatConfig,
    /// Backoff for the retry strategy.
    pub retry: BackoffPolicy,
    /// Retry strategy attempts.
    pub retry_max_attempts: u32,
    /// Backoff shape for reconnection.
    pub reconnect: BackoffPolicy,
    /// Reconnection attempt cap.
    pub reconnect_max_attempts: u32,
    /// Resync attempts (clamped to 2 by the strategy).
    pub resync_max_attempts: u32,
    /// Delay between resync attempts.
    pub resync_delay: Duration,
    /// Oldest recovery snapshot still compared after reconnecting.
    pub snapshot_max_age: Duration,
    /// Transitions kept per participant.
    pub history_limit: usize,
    /// Snapshot codec.
    pub codec: WireCodec,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            retry: BackoffPolicy::default(),
            retry_max_attempts: 3,
            reconnect: BackoffPolicy::default().with_jitter(0.1),
            reconnect_max_attempts: 5,
            resync_max_attempts: 2,
            resync_delay: Duration::from_millis(500),
            snapshot_max_age: Duration::from_secs(300),
            history_limit: DEFAULT_HISTORY_LIMIT,
            codec: WireCodec::Json,
        }
    }
}

impl ResilienceConfig {
    /// Short intervals and no jitter, for tests and local play.
    pub fn test_profile() -> Self {
        Self {
            heartbeat: HeartbeatConfig::test_profile(),
            reconnect: BackoffPolicy::default(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `settings`.
    pub fn from_settings(settings: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (key, value) in settings {
            config.apply(key, value)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `RELIC_*` environment variables
    /// (`heartbeat.timeout_ms` → `RELIC_HEARTBEAT_TIMEOUT_MS`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings: BTreeMap<String, String> = SETTINGS_KEYS
            .iter()
            .filter_map(|key| std::env::var(env_name(key)).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self::from_settings(&settings)
    }

    /// Apply one setting.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "heartbeat.interval_ms" => self.heartbeat.interval = millis(key, value)?,
            "heartbeat.sweep_interval_ms" => self.heartbeat.sweep_interval = millis(key, value)?,
            "heartbeat.timeout_ms" => self.heartbeat.timeout = millis(key, value)?,
            "retry.initial_delay_ms" => self.retry.initial_delay = millis(key, value)?,
            "retry.multiplier" => self.retry.multiplier = parse(key, value)?,
            "retry.max_delay_ms" => self.retry.max_delay = millis(key, value)?,
            "retry.max_attempts" => self.retry_max_attempts = parse(key, value)?,
            "reconnect.initial_delay_ms" => self.reconnect.initial_delay = millis(key, value)?,
            "reconnect.multiplier" => self.reconnect.multiplier = parse(key, value)?,
            "reconnect.max_delay_ms" => self.reconnect.max_delay = millis(key, value)?,
            "reconnect.jitter" => self.reconnect.jitter = parse(key, value)?,
            "reconnect.max_attempts" => self.reconnect_max_attempts = parse(key, value)?,
            "resync.max_attempts" => self.resync_max_attempts = parse(key, value)?,
            "resync.delay_ms" => self.resync_delay = millis(key, value)?,
            "snapshot.max_age_ms" => self.snapshot_max_age = millis(key, value)?,
            "connection.history_limit" => self.history_limit = parse(key, value)?,
            "codec" => self.codec = parse(key, value)?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat.interval.is_zero() || self.heartbeat.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid("heartbeat intervals must be positive".into()));
        }
        if self.heartbeat.timeout <= self.heartbeat.interval {
            return Err(ConfigError::Invalid(
                "heartbeat timeout must exceed the probe interval".into(),
            ));
        }
        for (name, policy) in [("retry", &self.retry), ("reconnect", &self.reconnect)] {
            if !(policy.multiplier >= 1.0) {
                return Err(ConfigError::Invalid(format!("{name}.multiplier must be at least 1")));
            }
            if !(0.0..=1.0).contains(&policy.jitter) {
                return Err(ConfigError::Invalid(format!("{name}.jitter must be within [0, 1]")));
            }
            if policy.max_delay < policy.initial_delay {
                return Err(ConfigError::Invalid(format!(
                    "{name}.max_delay_ms must not be below {name}.initial_delay_ms"
                )));
            }
        }
        if self.retry_max_attempts == 0 || self.reconnect_max_attempts == 0 || self.resync_max_attempts == 0 {
            return Err(ConfigError::Invalid("attempt limits must be at least 1".into()));
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid("connection.history_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Settings for the reconnection coordinator.
    pub fn reconnect_settings(&self) -> ReconnectSettings {
        ReconnectSettings {
            backoff: self.reconnect,
            max_attempts: self.reconnect_max_attempts,
            codec: self.codec,
            snapshot_max_age: self.snapshot_max_age,
        }
    }
}

fn env_name(key: &str) -> String {
    format!("RELIC_{}", key.replace('.', "_").to_ascii_uppercase())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn millis(key: &str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(key, value).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ResilienceConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.heartbeat.timeout, Duration::from_secs(60));
        assert_eq!(config.reconnect.jitter, 0.1);
        assert_eq!(ResilienceConfig::test_profile().validate(), Ok(()));
    }

    #[test]
    fn test_from_settings_overrides() {
        let config = ResilienceConfig::from_settings(&settings(&[
            ("heartbeat.interval_ms", "200"),
            ("heartbeat.timeout_ms", "900"),
            ("reconnect.max_attempts", "7"),
            ("codec", "bincode"),
        ]))
        .unwrap();
        assert_eq!(config.heartbeat.interval, Duration::from_millis(200));
        assert_eq!(config.reconnect_max_attempts, 7);
        assert_eq!(config.codec, WireCodec::Bincode);
        assert_eq!(config.reconnect_settings().max_attempts, 7);
    }

    #[test]
    fn test_bad_settings_rejected() {
        assert_eq!(
            ResilienceConfig::from_settings(&settings(&[("heartbeat.colour", "1")])),
            Err(ConfigError::UnknownKey("heartbeat.colour".into()))
        );
        assert!(matches!(
            ResilienceConfig::from_settings(&settings(&[("retry.max_attempts", "many")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ResilienceConfig::from_settings(&settings(&[("heartbeat.timeout_ms", "1000")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ResilienceConfig::from_settings(&settings(&[("reconnect.jitter", "1.5")])),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ResilienceConfig::from_settings(&settings(&[("retry.multiplier", "0.5")])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_env_names() {
        assert_eq!(env_name("heartbeat.timeout_ms"), "RELIC_HEARTBEAT_TIMEOUT_MS");
        assert_eq!(env_name("codec"), "RELIC_CODEC");
    }
}
