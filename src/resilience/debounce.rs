//! Debounced, bounded scheduler
//!
//! Coalesces bursts of requests into one execution. A burst ends after
//! `delay` of quiet, or at the latest `max_wait` after its first request, so a
//! steady stream of requests still executes periodically.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

// == Debounced ==
/// Handle to a debounced function. Calls never block and never fail.
///
/// Dropping every handle flushes a pending burst and stops the scheduler.
pub struct Debounced<A> {
    tx: mpsc::UnboundedSender<A>,
}

impl<A> Clone for Debounced<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A: Send + 'static> Debounced<A> {
    /// Requests an execution with `args`; the latest args of a burst win.
    pub fn call(&self, args: A) {
        if self.tx.send(args).is_err() {
            debug!("debounced scheduler already stopped");
        }
    }
}

// == Debounce Bounded ==
/// Wraps `f` so bursts of calls run it at most once per quiet `delay`, and
/// at least once per `max_wait` of continuous activity.
///
/// Errors and panics raised by `f` are logged, never surfaced to callers.
/// Must be called from within a tokio runtime.
pub fn debounce_bounded<A, F, Fut>(f: F, delay: Duration, max_wait: Duration) -> Debounced<A>
where
    A: Send + 'static,
    F: Fn(A) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let max_wait = max_wait.max(delay);
    let (tx, mut rx) = mpsc::unbounded_channel::<A>();

    tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let ceiling = Instant::now() + max_wait;
            let mut quiet_at = Instant::now() + delay;
            let mut latest = first;
            let mut coalesced = 1u32;
            let mut closed = false;

            loop {
                tokio::select! {
                    biased;
                    next = rx.recv() => match next {
                        Some(args) => {
                            latest = args;
                            coalesced += 1;
                            quiet_at = Instant::now() + delay;
                        }
                        None => {
                            closed = true;
                            break;
                        }
                    },
                    _ = sleep_until(quiet_at.min(ceiling)) => break,
                }
            }

            debug!(coalesced, forced = Instant::now() >= ceiling, "debounced call firing");
            match panic::catch_unwind(AssertUnwindSafe(|| f(latest))) {
                Ok(fut) => {
                    tokio::spawn(async move {
                        match AssertUnwindSafe(fut).catch_unwind().await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                let error = format!("{:#}", err);
                                warn!(%error, "debounced call failed");
                            }
                            Err(_) => warn!("debounced call panicked"),
                        }
                    });
                }
                Err(_) => warn!("debounced call panicked before starting"),
            }

            if closed {
                break;
            }
        }
        debug!("debounced scheduler stopped");
    });

    Debounced { tx }
}
