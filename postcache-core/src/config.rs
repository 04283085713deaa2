//! Configuration types

use crate::constants::*;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the eviction sweeper background task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Whether the sweeper runs at all (default: true)
    pub enabled: bool,

    /// Interval between sweeps (default: 3 seconds)
    pub period: Duration,

    /// Delay before the first sweep (default: 1 second)
    pub initial_delay: Duration,

    /// Whether each eviction is logged at info level rather than debug
    /// (default: true)
    pub log_evictions: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: DEFAULT_SWEEPER_ENABLED,
            period: Duration::from_secs(DEFAULT_SWEEPER_PERIOD_SECS),
            initial_delay: Duration::from_millis(DEFAULT_SWEEPER_INITIAL_DELAY_MS),
            log_evictions: DEFAULT_SWEEPER_LOG_EVICTIONS,
        }
    }
}

impl SweeperConfig {
    /// Create a sweeper config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A config with the sweeper switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Short intervals for local development and tests.
    pub fn development() -> Self {
        Self {
            enabled: true,
            period: Duration::from_millis(200),
            initial_delay: Duration::from_millis(50),
            log_evictions: true,
        }
    }

    /// Set the interval between sweeps.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Enable or disable the sweeper.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the delay before the first sweep.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Choose whether evictions are logged at info level.
    pub fn with_log_evictions(mut self, log: bool) -> Self {
        self.log_evictions = log;
        self
    }

    /// Create SweeperConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `POSTCACHE_SWEEPER_ENABLED`: `false`/`0`/`off` disables the sweeper (default: true)
    /// - `POSTCACHE_SWEEPER_PERIOD_SECS`: Interval between sweeps (default: 3)
    /// - `POSTCACHE_SWEEPER_INITIAL_DELAY_MS`: Delay before the first sweep (default: 1000)
    /// - `POSTCACHE_SWEEPER_LOG_EVICTIONS`: Whether to log evictions at info (default: true)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup(ENV_SWEEPER_ENABLED)
            .map(|s| parse_flag(&s))
            .unwrap_or(DEFAULT_SWEEPER_ENABLED);

        let period = Duration::from_secs(
            lookup(ENV_SWEEPER_PERIOD_SECS)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_SWEEPER_PERIOD_SECS),
        );

        let initial_delay = Duration::from_millis(
            lookup(ENV_SWEEPER_INITIAL_DELAY_MS)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_SWEEPER_INITIAL_DELAY_MS),
        );

        let log_evictions = lookup(ENV_SWEEPER_LOG_EVICTIONS)
            .map(|s| parse_flag(&s))
            .unwrap_or(DEFAULT_SWEEPER_LOG_EVICTIONS);

        Self {
            enabled,
            period,
            initial_delay,
            log_evictions,
        }
    }

    /// Check the config can drive a sweeper.
    ///
    /// A disabled sweeper accepts any period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.period.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "period".to_string(),
                value: format!("{:?}", self.period),
                reason: "sweep period must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration for a post repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub sweeper: SweeperConfig,
}

impl RepositoryConfig {
    pub fn new(sweeper: SweeperConfig) -> Self {
        Self { sweeper }
    }

    /// Repository without a background sweeper; entries leave only by reclamation.
    pub fn without_sweeper() -> Self {
        Self::new(SweeperConfig::disabled())
    }

    pub fn from_env() -> Self {
        Self::new(SweeperConfig::from_env())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sweeper.validate()
    }
}

fn parse_flag(raw: &str) -> bool {
    !matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}
