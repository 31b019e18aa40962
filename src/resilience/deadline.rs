//! Deadline supervisor
//!
//! Bounds how long a caller waits on a future. The wrapped work is not
//! cancelled by the supervisor itself: when the deadline fires the future is
//! dropped, and work that was spawned elsewhere keeps running with its result
//! discarded. Callers that need real cancellation pass a future that observes
//! its own cancellation signal.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ResilienceError, Result};

type DeadlineHook = Box<dyn FnOnce() + Send>;
type ErrorHook = Box<dyn FnOnce(&ResilienceError) + Send>;

// == Deadline ==
/// A deadline with optional side-effect hooks.
///
/// ```ignore
/// let value = Deadline::new(Duration::from_secs(5))
///     .on_deadline(|| warn!("gave up"))
///     .run(fetch_dashboard())
///     .await?;
/// ```
pub struct Deadline {
    duration: Duration,
    on_deadline: Option<DeadlineHook>,
    on_error: Option<ErrorHook>,
}

impl Deadline {
    /// A zero duration is raised to one millisecond.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: duration.max(Duration::from_millis(1)),
            on_deadline: None,
            on_error: None,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Called once if the deadline wins the race.
    pub fn on_deadline(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_deadline = Some(Box::new(hook));
        self
    }

    /// Called with the timeout error if the deadline wins the race.
    pub fn on_error(mut self, hook: impl FnOnce(&ResilienceError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    // == Run ==
    /// Races `operation` against the deadline.
    ///
    /// The operation is polled before the timer, so a future that fails on its
    /// first poll propagates immediately. Exactly one side wins; the hooks run
    /// only when the deadline does.
    pub async fn run<T, E, Fut>(self, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ResilienceError>,
    {
        match tokio::time::timeout(self.duration, operation).await {
            Ok(settled) => settled.map_err(Into::into),
            Err(_elapsed) => {
                let err = ResilienceError::Timeout {
                    deadline: self.duration,
                };
                warn!(deadline_ms = self.duration.as_millis() as u64, "deadline fired");
                if let Some(hook) = self.on_deadline {
                    hook();
                }
                if let Some(hook) = self.on_error {
                    hook(&err);
                }
                Err(err)
            }
        }
    }
}

// == With Deadline ==
/// Runs the future produced by `operation` under `deadline`.
pub async fn with_deadline<T, E, F, Fut>(operation: F, deadline: Duration) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Into<ResilienceError>,
{
    debug!(deadline_ms = deadline.as_millis() as u64, "supervising operation");
    Deadline::new(deadline).run(operation()).await
}
