//! Section load guard
//!
//! Per-section state machine:
//!
//! ```text
//! Pending | Recovering --readiness--------------> Ready
//! Pending | Recovering --budget elapsed---------> TimedOut
//! Pending | Recovering --timeout-class failure--> TimedOut
//! Pending | Recovering --other failure / event--> Errored
//! any                  --retry()----------------> Recovering
//! any                  --reset()----------------> Pending
//! ```
//!
//! Every attempt carries a generation number. Completions, timer firings and
//! failures from an older generation are dropped, so exactly one of
//! {readiness, deadline} is observed per attempt. The guard never interrupts
//! the underlying work; it only stops waiting on it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FailureKind, FailureReport, ResilienceError};
use crate::section::{select_fallback, ErrorBus, FailureEvent, Presentation, SectionId};

// == Load Status ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Pending,
    Ready,
    TimedOut,
    Errored,
    Recovering,
}

impl LoadStatus {
    /// Still waiting on the current attempt.
    pub fn is_loading(self) -> bool {
        matches!(self, LoadStatus::Pending | LoadStatus::Recovering)
    }
}

// == Section Load State ==
/// Snapshot of one guard, as shown to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionLoadState {
    pub section: SectionId,
    pub status: LoadStatus,
    /// Wall-clock start of the current attempt
    pub started_at: DateTime<Utc>,
    pub timeout_budget_ms: u64,
    pub last_error: Option<FailureReport>,
    pub is_timeout_classified: bool,
    /// Generation of the current attempt, starting at 1
    pub attempt: u64,
}

impl SectionLoadState {
    /// Whether the current failure may be retried without user action.
    pub fn is_transient_failure(&self) -> bool {
        match self.status {
            LoadStatus::TimedOut => true,
            LoadStatus::Errored => self
                .last_error
                .as_ref()
                .map_or(false, |e| e.kind.is_transient()),
            _ => false,
        }
    }
}

// == Late Completion ==
/// What a same-generation success does after the guard already timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LateCompletion {
    /// Keep showing the timeout presentation
    #[default]
    Ignore,
    /// Upgrade `TimedOut` to `Ready`
    Accept,
}

impl LateCompletion {
    pub fn from_config(config: &Config) -> Self {
        if config.accept_late_completions {
            LateCompletion::Accept
        } else {
            LateCompletion::Ignore
        }
    }
}

/// Mount-time settings of a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardOptions {
    pub budget: Duration,
    pub late_completion: LateCompletion,
}

impl GuardOptions {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            late_completion: LateCompletion::default(),
        }
    }

    pub fn late_completion(mut self, policy: LateCompletion) -> Self {
        self.late_completion = policy;
        self
    }
}

// == Guard Internals ==
struct GuardInner {
    state: SectionLoadState,
    timer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

struct GuardShared {
    section: SectionId,
    options: GuardOptions,
    inner: Mutex<GuardInner>,
    status_tx: watch::Sender<SectionLoadState>,
}

impl Drop for GuardShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        if let Some(listener) = inner.listener.take() {
            listener.abort();
        }
        debug!(section = %self.section, "section guard unmounted");
    }
}

impl GuardShared {
    /// Applies `f` to the state under the lock and publishes the result.
    /// Returns whatever `f` returns.
    fn transition<R>(&self, f: impl FnOnce(&mut GuardInner) -> R) -> R {
        let mut inner = self.inner.lock();
        let before = inner.state.clone();
        let out = f(&mut inner);
        if inner.state != before {
            self.status_tx.send_replace(inner.state.clone());
        }
        out
    }

    fn on_budget_elapsed(&self, generation: u64) {
        let budget = self.options.budget;
        self.transition(|inner| {
            if inner.state.attempt != generation || !inner.state.status.is_loading() {
                return;
            }
            let err = ResilienceError::Timeout { deadline: budget };
            inner.state.status = LoadStatus::TimedOut;
            inner.state.is_timeout_classified = true;
            inner.state.last_error = Some(FailureReport::from_error(&err, Some(&self.section)));
            inner.timer = None;
            warn!(
                section = %self.section,
                budget_ms = budget.as_millis() as u64,
                "section timed out"
            );
        });
    }

    fn on_event(&self, event: &FailureEvent) {
        if !event.attributed_to(&self.section) {
            return;
        }
        self.transition(|inner| {
            if !inner.state.status.is_loading() {
                debug!(section = %self.section, status = ?inner.state.status, "late failure event ignored");
                return;
            }
            let report = event.report(&self.section);
            inner.state.is_timeout_classified = report.kind == FailureKind::Timeout;
            inner.state.status = LoadStatus::Errored;
            inner.state.last_error = Some(report);
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            warn!(section = %self.section, message = %event.message, "failure event attributed to section");
        });
    }

    fn complete(&self, generation: u64, outcome: Result<(), &ResilienceError>) -> bool {
        let late = self.options.late_completion;
        self.transition(|inner| {
            if inner.state.attempt != generation {
                debug!(section = %self.section, generation, current = inner.state.attempt, "stale completion dropped");
                return false;
            }
            let status = inner.state.status;
            match outcome {
                Ok(()) => {
                    let accepts = status.is_loading()
                        || (status == LoadStatus::TimedOut && late == LateCompletion::Accept);
                    if !accepts {
                        debug!(section = %self.section, ?status, "late readiness ignored");
                        return false;
                    }
                    inner.state.status = LoadStatus::Ready;
                    inner.state.last_error = None;
                    inner.state.is_timeout_classified = false;
                }
                Err(err) => {
                    if !status.is_loading() {
                        debug!(section = %self.section, ?status, "late failure ignored");
                        return false;
                    }
                    let report = FailureReport::from_error(err, Some(&self.section));
                    inner.state.is_timeout_classified = report.kind == FailureKind::Timeout;
                    inner.state.status = if report.kind == FailureKind::Timeout {
                        LoadStatus::TimedOut
                    } else {
                        LoadStatus::Errored
                    };
                    inner.state.last_error = Some(report);
                }
            }
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            true
        })
    }
}

// == Attempt Handle ==
/// Ties a readiness or failure signal to the attempt that produced it.
#[derive(Clone)]
pub struct AttemptHandle {
    guard: Weak<GuardShared>,
    generation: u64,
}

impl AttemptHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Signals readiness. Returns whether the guard accepted it.
    pub fn succeed(&self) -> bool {
        self.guard
            .upgrade()
            .map_or(false, |g| g.complete(self.generation, Ok(())))
    }

    /// Signals failure. Returns whether the guard accepted it.
    pub fn fail(&self, err: &ResilienceError) -> bool {
        self.guard
            .upgrade()
            .map_or(false, |g| g.complete(self.generation, Err(err)))
    }

    fn belongs_to(&self, shared: &Arc<GuardShared>) -> bool {
        std::ptr::eq(self.guard.as_ptr(), Arc::as_ptr(shared))
    }

    /// Applies a settled result.
    pub fn settle<T>(&self, outcome: &Result<T, ResilienceError>) -> bool {
        match outcome {
            Ok(_) => self.succeed(),
            Err(err) => self.fail(err),
        }
    }
}

// == Section Load Guard ==
/// Supervises the loading of one section. Cloning yields another handle to
/// the same guard; the guard unmounts when the last handle drops.
#[derive(Clone)]
pub struct SectionLoadGuard {
    shared: Arc<GuardShared>,
}

impl SectionLoadGuard {
    /// Mounts with the given budget and default options.
    pub fn mount(section: SectionId, budget: Duration, bus: &ErrorBus) -> Self {
        Self::mount_with(section, GuardOptions::new(budget), bus)
    }

    /// Mounts: starts attempt 1 in `Pending`, arms the budget timer and
    /// subscribes to the error bus. Must be called within a tokio runtime.
    pub fn mount_with(section: SectionId, options: GuardOptions, bus: &ErrorBus) -> Self {
        let state = SectionLoadState {
            section: section.clone(),
            status: LoadStatus::Pending,
            started_at: Utc::now(),
            timeout_budget_ms: options.budget.as_millis() as u64,
            last_error: None,
            is_timeout_classified: false,
            attempt: 1,
        };
        let (status_tx, _) = watch::channel(state.clone());

        let shared = Arc::new(GuardShared {
            section,
            options,
            inner: Mutex::new(GuardInner {
                state,
                timer: None,
                listener: None,
            }),
            status_tx,
        });

        let listener = spawn_listener(Arc::downgrade(&shared), bus);
        {
            let mut inner = shared.inner.lock();
            inner.timer = Some(arm_timer(&shared, 1));
            inner.listener = Some(listener);
        }

        info!(
            section = %shared.section,
            budget_ms = options.budget.as_millis() as u64,
            "section guard mounted"
        );
        Self { shared }
    }

    pub fn section(&self) -> &SectionId {
        &self.shared.section
    }

    pub fn budget(&self) -> Duration {
        self.shared.options.budget
    }

    /// Handle for the current attempt.
    pub fn attempt(&self) -> AttemptHandle {
        AttemptHandle {
            guard: Arc::downgrade(&self.shared),
            generation: self.shared.inner.lock().state.attempt,
        }
    }

    /// Restarts the budget of `attempt` from now, when work for it is only
    /// starting. No-op once the attempt settled or was superseded.
    pub fn restart_clock(&self, attempt: &AttemptHandle) -> bool {
        if !attempt.belongs_to(&self.shared) {
            return false;
        }
        let generation = attempt.generation;
        let restarted = self.shared.transition(|inner| {
            if inner.state.attempt != generation || !inner.state.status.is_loading() {
                return false;
            }
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.state.started_at = Utc::now();
            inner.timer = Some(arm_timer(&self.shared, generation));
            true
        });
        if restarted {
            debug!(section = %self.shared.section, attempt = generation, "section budget restarted");
        }
        restarted
    }

    // == Retry / Reset ==
    /// Clears the failure, starts a new attempt in `Recovering` and re-arms
    /// the timer.
    pub fn retry(&self) -> AttemptHandle {
        self.restart(LoadStatus::Recovering)
    }

    /// Starts over in `Pending`, as if freshly mounted.
    pub fn reset(&self) -> AttemptHandle {
        self.restart(LoadStatus::Pending)
    }

    fn restart(&self, status: LoadStatus) -> AttemptHandle {
        let generation = self.shared.transition(|inner| {
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.state.attempt += 1;
            inner.state.status = status;
            inner.state.started_at = Utc::now();
            inner.state.last_error = None;
            inner.state.is_timeout_classified = false;
            inner.timer = Some(arm_timer(&self.shared, inner.state.attempt));
            inner.state.attempt
        });
        info!(section = %self.shared.section, attempt = generation, ?status, "section attempt restarted");
        AttemptHandle {
            guard: Arc::downgrade(&self.shared),
            generation,
        }
    }

    // == Observers ==
    pub fn state(&self) -> SectionLoadState {
        self.shared.inner.lock().state.clone()
    }

    pub fn status(&self) -> LoadStatus {
        self.shared.inner.lock().state.status
    }

    /// Receives every state change.
    pub fn subscribe(&self) -> watch::Receiver<SectionLoadState> {
        self.shared.status_tx.subscribe()
    }

    /// Rendering decision for the current state.
    pub fn presentation(&self) -> Presentation {
        let state = self.state();
        match state.status {
            LoadStatus::Ready => Presentation::Ready {
                section: state.section,
            },
            LoadStatus::Pending | LoadStatus::Recovering => Presentation::Loading {
                section: state.section,
            },
            LoadStatus::TimedOut | LoadStatus::Errored => match select_fallback(&state) {
                Some(fallback) => Presentation::Fallback(fallback),
                None => Presentation::Loading {
                    section: state.section,
                },
            },
        }
    }
}

fn arm_timer(shared: &Arc<GuardShared>, generation: u64) -> JoinHandle<()> {
    let weak = Arc::downgrade(shared);
    let budget = shared.options.budget;
    tokio::spawn(async move {
        tokio::time::sleep(budget).await;
        if let Some(shared) = weak.upgrade() {
            shared.on_budget_elapsed(generation);
        }
    })
}

fn spawn_listener(weak: Weak<GuardShared>, bus: &ErrorBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match weak.upgrade() {
                    Some(shared) => shared.on_event(&event),
                    None => break,
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "section guard lagged behind error bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
