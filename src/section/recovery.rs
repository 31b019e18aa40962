//! Automatic recovery
//!
//! Watches a guard's state and calls retry after a fixed delay when the
//! failure is transient. Generic failures wait for the user.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::section::{LoadStatus, SectionLoadState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoRecovery {
    pub delay: Duration,
    /// Retries per failure streak; a `Ready` state ends the streak
    pub max_attempts: u32,
}

impl Default for AutoRecovery {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            max_attempts: 3,
        }
    }
}

impl AutoRecovery {
    pub fn from_config(config: &Config) -> Self {
        Self {
            delay: config.auto_retry_delay(),
            max_attempts: config.auto_retry_max_attempts,
        }
    }
}

/// Spawns the recovery loop. It exits when the guard is gone.
pub fn spawn_auto_recovery<F, Fut>(
    mut states: watch::Receiver<SectionLoadState>,
    policy: AutoRecovery,
    retry: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut streak = 0u32;
        let mut handled_attempt = 0u64;

        loop {
            let (attempt, transient, status, section) = {
                let state = states.borrow_and_update();
                (
                    state.attempt,
                    state.is_transient_failure(),
                    state.status,
                    state.section.clone(),
                )
            };

            if status == LoadStatus::Ready {
                streak = 0;
            } else if transient && attempt != handled_attempt {
                handled_attempt = attempt;
                if streak >= policy.max_attempts {
                    debug!(section = %section, streak, "auto-recovery exhausted");
                } else {
                    tokio::time::sleep(policy.delay).await;
                    // the user may have retried or reset meanwhile
                    let still_failed = {
                        let state = states.borrow();
                        state.attempt == attempt && state.is_transient_failure()
                    };
                    if still_failed {
                        streak += 1;
                        info!(section = %section, attempt, streak, "auto-retrying section");
                        retry().await;
                    }
                    continue;
                }
            }

            if states.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResilienceError;
    use crate::section::{ErrorBus, SectionLoadGuard};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn policy() -> AutoRecovery {
        AutoRecovery {
            delay: ms(500),
            max_attempts: 2,
        }
    }

    fn spawn_for(guard: &SectionLoadGuard, retries: &Arc<AtomicUsize>) -> JoinHandle<()> {
        let handle = guard.clone();
        let retries = Arc::clone(retries);
        spawn_auto_recovery(guard.subscribe(), policy(), move || {
            retries.fetch_add(1, Ordering::SeqCst);
            handle.retry();
            async {}
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retried_after_delay() {
        let bus = ErrorBus::new();
        let guard = SectionLoadGuard::mount("tasks".into(), ms(100), &bus);
        let retries = Arc::new(AtomicUsize::new(0));
        let task = spawn_for(&guard, &retries);

        sleep(ms(150)).await;
        assert_eq!(guard.status(), LoadStatus::TimedOut);
        assert_eq!(retries.load(Ordering::SeqCst), 0);

        sleep(ms(500)).await;
        assert_eq!(retries.load(Ordering::SeqCst), 1);
        assert_eq!(guard.status(), LoadStatus::Recovering);

        guard.attempt().succeed();
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_capped_per_streak() {
        let bus = ErrorBus::new();
        let guard = SectionLoadGuard::mount("tasks".into(), ms(100), &bus);
        let retries = Arc::new(AtomicUsize::new(0));
        let task = spawn_for(&guard, &retries);

        // every attempt times out; only two retries happen
        sleep(ms(5_000)).await;
        assert_eq!(retries.load(Ordering::SeqCst), 2);
        assert_eq!(guard.status(), LoadStatus::TimedOut);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_failure_is_not_retried() {
        let bus = ErrorBus::new();
        let guard = SectionLoadGuard::mount("journal".into(), ms(5000), &bus);
        let retries = Arc::new(AtomicUsize::new(0));
        let task = spawn_for(&guard, &retries);

        guard.attempt().fail(&ResilienceError::operation("schema mismatch"));
        sleep(ms(2_000)).await;
        assert_eq!(retries.load(Ordering::SeqCst), 0);
        assert_eq!(guard.status(), LoadStatus::Errored);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_retry_during_delay_cancels_auto_retry() {
        let bus = ErrorBus::new();
        let guard = SectionLoadGuard::mount("tasks".into(), ms(100), &bus);
        let retries = Arc::new(AtomicUsize::new(0));
        let task = spawn_for(&guard, &retries);

        sleep(ms(150)).await;
        guard.retry().succeed();
        sleep(ms(1_000)).await;

        assert_eq!(retries.load(Ordering::SeqCst), 0);
        assert_eq!(guard.status(), LoadStatus::Ready);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_exits_with_guard() {
        let bus = ErrorBus::new();
        let guard = SectionLoadGuard::mount("tasks".into(), ms(100), &bus);
        let task = spawn_auto_recovery(guard.subscribe(), policy(), || async {});

        drop(guard);
        sleep(ms(1)).await;
        assert!(task.is_finished());
    }
}
