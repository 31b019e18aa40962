//! Configuration Module
//!
//! Handles loading and managing resilience configuration from environment variables.

use std::env;
use std::time::Duration;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::error::{ResilienceError, Result};

/// Resilience layer configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
/// Durations are given in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of entries the cache can hold
    pub max_entries: usize,
    /// Default TTL in milliseconds for entries without explicit TTL
    pub default_ttl_ms: u64,
    /// Background cleanup task interval in milliseconds
    pub cleanup_interval_ms: u64,
    /// Consecutive failures before a circuit opens
    pub breaker_max_failures: u32,
    /// How long an open circuit stays open
    pub breaker_reset_timeout_ms: u64,
    /// Deadline applied to operations run through the breaker
    pub breaker_deadline_ms: u64,
    /// Budget for complex sections
    pub budget_complex_ms: u64,
    /// Budget for moderate sections
    pub budget_moderate_ms: u64,
    /// Budget for every other section
    pub budget_default_ms: u64,
    /// Delay before an automatic retry of a transient failure
    pub auto_retry_delay_ms: u64,
    /// Automatic retries allowed per failure streak
    pub auto_retry_max_attempts: u32,
    /// Whether a success arriving after its timeout upgrades the section to ready
    pub accept_late_completions: bool,
    /// Quiet period of the load scheduler
    pub debounce_delay_ms: u64,
    /// Ceiling of the load scheduler
    pub debounce_max_wait_ms: u64,
    /// Diagnostics HTTP server port
    pub server_port: u16,
}

/// Reads `name` and parses it, falling back to `default` when unset or malformed.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `DEFAULT_TTL_MS` - Default TTL (default: 300000)
    /// - `CLEANUP_INTERVAL_MS` - Cleanup frequency (default: 1000)
    /// - `BREAKER_MAX_FAILURES` - Failures before opening (default: 3)
    /// - `BREAKER_RESET_TIMEOUT_MS` - Open window (default: 60000)
    /// - `BREAKER_DEADLINE_MS` - Breaker operation deadline (default: 5000)
    /// - `BUDGET_COMPLEX_MS` / `BUDGET_MODERATE_MS` / `BUDGET_DEFAULT_MS` -
    ///   Section budgets (defaults: 8000 / 5000 / 3000)
    /// - `AUTO_RETRY_DELAY_MS` - Auto-recovery delay (default: 2000)
    /// - `AUTO_RETRY_MAX_ATTEMPTS` - Auto-recovery cap (default: 3)
    /// - `ACCEPT_LATE_COMPLETIONS` - Late success after timeout wins (default: false)
    /// - `DEBOUNCE_DELAY_MS` / `DEBOUNCE_MAX_WAIT_MS` - Scheduler timing
    ///   (defaults: 250 / 1000)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", d.max_entries),
            default_ttl_ms: env_or("DEFAULT_TTL_MS", d.default_ttl_ms),
            cleanup_interval_ms: env_or("CLEANUP_INTERVAL_MS", d.cleanup_interval_ms),
            breaker_max_failures: env_or("BREAKER_MAX_FAILURES", d.breaker_max_failures),
            breaker_reset_timeout_ms: env_or(
                "BREAKER_RESET_TIMEOUT_MS",
                d.breaker_reset_timeout_ms,
            ),
            breaker_deadline_ms: env_or("BREAKER_DEADLINE_MS", d.breaker_deadline_ms),
            budget_complex_ms: env_or("BUDGET_COMPLEX_MS", d.budget_complex_ms),
            budget_moderate_ms: env_or("BUDGET_MODERATE_MS", d.budget_moderate_ms),
            budget_default_ms: env_or("BUDGET_DEFAULT_MS", d.budget_default_ms),
            auto_retry_delay_ms: env_or("AUTO_RETRY_DELAY_MS", d.auto_retry_delay_ms),
            auto_retry_max_attempts: env_or(
                "AUTO_RETRY_MAX_ATTEMPTS",
                d.auto_retry_max_attempts,
            ),
            accept_late_completions: env_or(
                "ACCEPT_LATE_COMPLETIONS",
                d.accept_late_completions,
            ),
            debounce_delay_ms: env_or("DEBOUNCE_DELAY_MS", d.debounce_delay_ms),
            debounce_max_wait_ms: env_or("DEBOUNCE_MAX_WAIT_MS", d.debounce_max_wait_ms),
            server_port: env_or("SERVER_PORT", d.server_port),
        }
    }

    // == Validate ==
    /// Rejects settings the layer cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(ResilienceError::Configuration(
                "MAX_ENTRIES must be at least 1".to_string(),
            ));
        }
        if self.breaker_max_failures == 0 {
            return Err(ResilienceError::Configuration(
                "BREAKER_MAX_FAILURES must be at least 1".to_string(),
            ));
        }
        let deadlines = [
            ("BREAKER_DEADLINE_MS", self.breaker_deadline_ms),
            ("BUDGET_COMPLEX_MS", self.budget_complex_ms),
            ("BUDGET_MODERATE_MS", self.budget_moderate_ms),
            ("BUDGET_DEFAULT_MS", self.budget_default_ms),
            ("DEBOUNCE_DELAY_MS", self.debounce_delay_ms),
            ("CLEANUP_INTERVAL_MS", self.cleanup_interval_ms),
        ];
        if let Some((name, _)) = deadlines.iter().find(|(_, v)| *v == 0) {
            return Err(ResilienceError::Configuration(format!(
                "{} must be greater than zero",
                name
            )));
        }
        if self.debounce_max_wait_ms < self.debounce_delay_ms {
            return Err(ResilienceError::Configuration(
                "DEBOUNCE_MAX_WAIT_MS must not be shorter than DEBOUNCE_DELAY_MS".to_string(),
            ));
        }
        Ok(())
    }

    // == Duration Accessors ==
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn auto_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auto_retry_delay_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn debounce_max_wait(&self) -> Duration {
        Duration::from_millis(self.debounce_max_wait_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            default_ttl_ms: 300_000,
            cleanup_interval_ms: 1000,
            breaker_max_failures: 3,
            breaker_reset_timeout_ms: 60_000,
            breaker_deadline_ms: 5000,
            budget_complex_ms: 8000,
            budget_moderate_ms: 5000,
            budget_default_ms: 3000,
            auto_retry_delay_ms: 2000,
            auto_retry_max_attempts: 3,
            accept_late_completions: false,
            debounce_delay_ms: 250,
            debounce_max_wait_ms: 1000,
            server_port: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.breaker_max_failures, 3);
        assert_eq!(config.breaker_reset_timeout_ms, 60_000);
        assert_eq!(config.breaker_deadline_ms, 5000);
        assert_eq!(config.budget_complex_ms, 8000);
        assert_eq!(config.budget_moderate_ms, 5000);
        assert_eq!(config.budget_default_ms, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("MAX_ENTRIES");
        env::remove_var("BREAKER_MAX_FAILURES");
        env::remove_var("BUDGET_COMPLEX_MS");
        env::remove_var("SERVER_PORT");
        env::remove_var("ACCEPT_LATE_COMPLETIONS");

        let config = Config::from_env();
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.breaker_max_failures, 3);
        assert_eq!(config.budget_complex_ms, 8000);
        assert_eq!(config.server_port, 3000);
        assert!(!config.accept_late_completions);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = Config {
            max_entries: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ResilienceError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_deadline() {
        let config = Config {
            budget_moderate_ms: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("BUDGET_MODERATE_MS"));
    }

    #[test]
    fn test_validate_rejects_short_max_wait() {
        let config = Config {
            debounce_delay_ms: 500,
            debounce_max_wait_ms: 100,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
