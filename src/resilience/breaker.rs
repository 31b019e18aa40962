//! Per-key circuit breaker
//!
//! # States
//! - Closed: calls run under a deadline; failures are counted
//! - Open: `failures >= max_failures`; calls are rejected without running
//!
//! # Transitions
//! ```text
//! Closed -> Open:   the failure that reaches max_failures
//! Open -> Closed:   reset_timeout after the trip, counter wiped
//! Closed -> Closed: any success wipes the key's counter
//! ```
//!
//! Each key keeps its own window. A window starts at the first failure and
//! restarts when the circuit trips, so an open circuit stays open for the full
//! `reset_timeout`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ResilienceError, Result};
use crate::resilience::Deadline;

// == Breaker Policy ==
/// Thresholds applied to one `execute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive failures that open the circuit
    pub max_failures: u32,
    /// How long an open circuit rejects calls
    pub reset_timeout: Duration,
    /// Deadline for each attempted call
    pub deadline: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reset_timeout: Duration::from_millis(60_000),
            deadline: Duration::from_millis(5000),
        }
    }
}

impl BreakerPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_failures: config.breaker_max_failures.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            deadline: Duration::from_millis(config.breaker_deadline_ms),
        }
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

// == Failure Record ==
#[derive(Debug, Clone)]
struct FailureRecord {
    failure_count: u32,
    window_started_at: Instant,
    /// Threshold in force at the last failure
    max_failures: u32,
    reset_timeout: Duration,
}

impl FailureRecord {
    fn window_elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_started_at) > self.reset_timeout
    }

    fn is_open(&self) -> bool {
        self.failure_count >= self.max_failures
    }
}

// == Circuit State ==
/// Derived state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Public view of one key's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub failures: u32,
    pub is_open: bool,
}

impl BreakerStatus {
    pub fn state(&self) -> CircuitState {
        if self.is_open {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }
}

// == Circuit Breaker Registry ==
/// A scope of circuit breakers keyed by string.
///
/// Cloning yields another handle to the same scope. Separate registries are
/// fully independent.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerRegistry {
    records: Arc<Mutex<HashMap<String, FailureRecord>>>,
    policy: BreakerPolicy,
}

impl CircuitBreakerRegistry {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            records: Arc::default(),
            policy,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(BreakerPolicy::from_config(config))
    }

    pub fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    // == Execute ==
    /// Runs `operation` for `key` under the registry's default policy.
    pub async fn execute<T, E, F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ResilienceError>,
    {
        self.execute_with(key, self.policy, operation).await
    }

    /// Runs `operation` for `key` under an explicit policy.
    ///
    /// Rejects with [`ResilienceError::CircuitOpen`] without invoking the
    /// operation while the key is open. Otherwise runs it under the policy's
    /// deadline; success clears the key, failure (timeouts included) counts.
    pub async fn execute_with<T, E, F, Fut>(
        &self,
        key: &str,
        policy: BreakerPolicy,
        operation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ResilienceError>,
    {
        self.admit(key)?;

        let outcome = Deadline::new(policy.deadline).run(operation()).await;
        match &outcome {
            Ok(_) => self.record_success(key),
            Err(err) => self.record_failure(key, &policy, err),
        }
        outcome
    }

    // == Admission ==
    /// Fails fast if `key` is open; wipes the key once its window elapsed.
    fn admit(&self, key: &str) -> Result<()> {
        let now = Instant::now();
        let mut records = self.records.lock();

        let Some(record) = records.get(key) else {
            return Ok(());
        };
        if record.window_elapsed(now) {
            let was_open = record.is_open();
            records.remove(key);
            if was_open {
                info!(key, "circuit closed after reset window");
            }
            return Ok(());
        }
        if record.is_open() {
            debug!(key, failures = record.failure_count, "circuit open, failing fast");
            return Err(ResilienceError::CircuitOpen {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn record_success(&self, key: &str) {
        if self.records.lock().remove(key).is_some() {
            debug!(key, "failure count cleared after success");
        }
    }

    fn record_failure(&self, key: &str, policy: &BreakerPolicy, err: &ResilienceError) {
        let now = Instant::now();
        let mut records = self.records.lock();

        let record = records.entry(key.to_string()).or_insert(FailureRecord {
            failure_count: 0,
            window_started_at: now,
            max_failures: policy.max_failures,
            reset_timeout: policy.reset_timeout,
        });
        if record.window_elapsed(now) {
            record.failure_count = 0;
            record.window_started_at = now;
        }
        record.max_failures = policy.max_failures;
        record.reset_timeout = policy.reset_timeout;
        record.failure_count += 1;

        if record.failure_count == policy.max_failures {
            record.window_started_at = now;
            warn!(
                key,
                failures = record.failure_count,
                reset_ms = policy.reset_timeout.as_millis() as u64,
                error = %err,
                "circuit opened"
            );
        } else {
            debug!(key, failures = record.failure_count, error = %err, "failure recorded");
        }
    }

    // == Status ==
    /// Current bookkeeping for `key`; an elapsed window reads as closed.
    pub fn status(&self, key: &str) -> BreakerStatus {
        let now = Instant::now();
        match self.records.lock().get(key) {
            Some(record) if !record.window_elapsed(now) => BreakerStatus {
                failures: record.failure_count,
                is_open: record.is_open(),
            },
            _ => BreakerStatus {
                failures: 0,
                is_open: false,
            },
        }
    }

    /// Status of every key with live bookkeeping, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, BreakerStatus)> {
        let now = Instant::now();
        let mut all: Vec<(String, BreakerStatus)> = self
            .records
            .lock()
            .iter()
            .filter(|(_, record)| !record.window_elapsed(now))
            .map(|(key, record)| {
                (
                    key.clone(),
                    BreakerStatus {
                        failures: record.failure_count,
                        is_open: record.is_open(),
                    },
                )
            })
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    // == Reset ==
    /// Clears every key immediately.
    pub fn reset(&self) {
        let cleared = {
            let mut records = self.records.lock();
            let n = records.len();
            records.clear();
            n
        };
        info!(cleared, "circuit breakers reset");
    }

    /// Clears one key immediately.
    pub fn reset_key(&self, key: &str) {
        if self.records.lock().remove(key).is_some() {
            info!(key, "circuit breaker reset");
        }
    }
}
