//! Section loader
//!
//! Composes the primitives into the load path of one section:
//!
//! ```text
//! load(id)
//!     -> guard      (budget timer per attempt)
//!     -> breaker    (fail fast while the section's circuit is open)
//!     -> deadline   (budget of the section's tier)
//!     -> cache      (write on success / serve last good value on failure)
//!     -> guard      (settle the attempt)
//! ```
//!
//! Each section gets its guard, a debounced request handle and an
//! auto-recovery task the first time it is touched. An attempt runs its
//! renderer once: its budget starts when that run starts, and concurrent
//! loads of the same attempt share the run.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{self, CacheKey, CacheStore, SharedCache};
use crate::config::Config;
use crate::error::{FailureReport, ResilienceError, Result};
use crate::resilience::{debounce_bounded, CircuitBreakerRegistry, Debounced};
use crate::section::{
    spawn_auto_recovery, AttemptHandle, AutoRecovery, ErrorBus, GuardOptions, LateCompletion,
    Presentation, SectionId, SectionLoadGuard, SectionLoadState, SectionRegistry, TierTable,
    TimeoutBudgets,
};

// == Load Outcome ==
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Produced by this attempt
    Fresh { value: Value },
    /// The attempt failed; this is the last good value from the cache
    Degraded { value: Value, failure: FailureReport },
}

impl LoadOutcome {
    pub fn value(&self) -> &Value {
        match self {
            LoadOutcome::Fresh { value } | LoadOutcome::Degraded { value, .. } => value,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, LoadOutcome::Degraded { .. })
    }
}

type SharedLoad = Shared<BoxFuture<'static, Result<LoadOutcome>>>;

struct InFlight {
    generation: u64,
    load: SharedLoad,
}

struct SectionSlot {
    guard: SectionLoadGuard,
    requests: Debounced<()>,
    recovery: JoinHandle<()>,
    inflight: Mutex<Option<InFlight>>,
}

impl Drop for SectionSlot {
    fn drop(&mut self) {
        self.recovery.abort();
    }
}

// == Section Loader ==
pub struct SectionLoader {
    me: Weak<SectionLoader>,
    registry: SectionRegistry,
    tiers: TierTable,
    budgets: TimeoutBudgets,
    cache: SharedCache<Value>,
    breaker: CircuitBreakerRegistry,
    bus: ErrorBus,
    recovery: AutoRecovery,
    late_completion: LateCompletion,
    debounce_delay: Duration,
    debounce_max_wait: Duration,
    sections: Mutex<HashMap<SectionId, SectionSlot>>,
}

impl SectionLoader {
    /// Builds a loader. Fails when a registered section has no tier.
    pub fn new(
        config: &Config,
        registry: SectionRegistry,
        tiers: TierTable,
        cache: SharedCache<Value>,
        breaker: CircuitBreakerRegistry,
        bus: ErrorBus,
    ) -> Result<Arc<Self>> {
        registry.validate(&tiers)?;
        info!(sections = registry.len(), "section loader ready");

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            registry,
            tiers,
            budgets: TimeoutBudgets::from_config(config),
            cache,
            breaker,
            bus,
            recovery: AutoRecovery::from_config(config),
            late_completion: LateCompletion::from_config(config),
            debounce_delay: config.debounce_delay(),
            debounce_max_wait: config.debounce_max_wait(),
            sections: Mutex::new(HashMap::new()),
        }))
    }

    /// Builds a loader with the standard tier table and fresh shared state.
    pub fn from_config(config: &Config, registry: SectionRegistry) -> Result<Arc<Self>> {
        Self::new(
            config,
            registry,
            TierTable::standard(),
            cache::shared(CacheStore::new(config.max_entries, config.default_ttl())),
            CircuitBreakerRegistry::from_config(config),
            ErrorBus::new(),
        )
    }

    // == Accessors ==
    pub fn cache(&self) -> &SharedCache<Value> {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreakerRegistry {
        &self.breaker
    }

    pub fn bus(&self) -> &ErrorBus {
        &self.bus
    }

    pub fn registry(&self) -> &SectionRegistry {
        &self.registry
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    pub fn budget(&self, id: &SectionId) -> Duration {
        self.tiers.budget(id, &self.budgets)
    }

    // == Loading ==
    /// Loads `id`. While the current attempt is still loading it is reused,
    /// joining its run when one is already in flight.
    pub async fn load(&self, id: &SectionId) -> Result<LoadOutcome> {
        let guard = self.guard(id)?;
        let attempt = if guard.status().is_loading() {
            guard.attempt()
        } else {
            guard.reset()
        };
        self.launch(id, attempt)?.await
    }

    /// User-triggered retry: closes the section's circuit, then loads again.
    pub async fn retry(&self, id: &SectionId) -> Result<LoadOutcome> {
        let guard = self.guard(id)?;
        self.breaker.reset_key(id.as_str());
        let attempt = guard.retry();
        self.launch(id, attempt)?.await
    }

    /// Starts the section over in `Pending` and loads it.
    pub async fn reset(&self, id: &SectionId) -> Result<LoadOutcome> {
        let guard = self.guard(id)?;
        self.breaker.reset_key(id.as_str());
        let attempt = guard.reset();
        self.launch(id, attempt)?.await
    }

    /// Retry issued by auto-recovery; leaves the breaker alone.
    async fn auto_retry(&self, id: &SectionId) -> Result<LoadOutcome> {
        let guard = self.guard(id)?;
        let attempt = guard.retry();
        self.launch(id, attempt)?.await
    }

    /// Schedules a load; bursts of requests collapse into one. Dropped if
    /// the section is unmounted before the burst fires.
    pub fn request(&self, id: &SectionId) -> Result<()> {
        self.with_slot(id, |slot| slot.requests.call(()))
    }

    /// Run of `attempt`: the one in flight, or a new one.
    fn launch(&self, id: &SectionId, attempt: AttemptHandle) -> Result<SharedLoad> {
        let loader = self
            .me
            .upgrade()
            .ok_or_else(|| ResilienceError::NotFound(format!("section '{}'", id)))?;

        self.with_slot(id, move |slot| {
            let mut inflight = slot.inflight.lock();
            if let Some(run) = inflight
                .as_ref()
                .filter(|run| run.generation == attempt.generation())
            {
                debug!(section = %id, attempt = run.generation, "joining in-flight load");
                return run.load.clone();
            }

            // the budget covers the run, not the time spent queued before it
            slot.guard.restart_clock(&attempt);
            let generation = attempt.generation();
            let section = id.clone();
            let task = tokio::spawn(async move { loader.run(&section, attempt).await });
            let load = task
                .map(|joined| {
                    joined.unwrap_or_else(|err| {
                        Err(ResilienceError::operation(format!(
                            "section load aborted: {}",
                            err
                        )))
                    })
                })
                .boxed()
                .shared();
            *inflight = Some(InFlight {
                generation,
                load: load.clone(),
            });
            load
        })
    }

    async fn run(&self, id: &SectionId, attempt: AttemptHandle) -> Result<LoadOutcome> {
        let render = self
            .registry
            .get(id)
            .ok_or_else(|| ResilienceError::NotFound(format!("section '{}'", id)))?;
        let policy = self.breaker.policy().with_deadline(self.budget(id));
        debug!(section = %id, attempt = attempt.generation(), "loading section");

        let outcome = self
            .breaker
            .execute_with(id.as_str(), policy, || render())
            .await
            .map_err(|err| err.for_section(id));
        attempt.settle(&outcome);

        let key = section_cache_key(id);
        match outcome {
            Ok(value) => {
                if let Err(err) = self.cache.write().await.set(key, value.clone(), None) {
                    warn!(section = %id, error = %err, "section result not cached");
                }
                Ok(LoadOutcome::Fresh { value })
            }
            Err(err) => {
                let last_good = self.cache.write().await.get(&key);
                match last_good {
                    Some(value) => {
                        info!(section = %id, error = %err, "serving cached section");
                        Ok(LoadOutcome::Degraded {
                            value,
                            failure: FailureReport::from_error(&err, Some(id)),
                        })
                    }
                    None => Err(err),
                }
            }
        }
    }

    // == Guards ==
    /// The guard of `id`, mounting it on first use.
    pub fn guard(&self, id: &SectionId) -> Result<SectionLoadGuard> {
        self.with_slot(id, |slot| slot.guard.clone())
    }

    pub fn state(&self, id: &SectionId) -> Option<SectionLoadState> {
        self.sections.lock().get(id).map(|slot| slot.guard.state())
    }

    /// States of every mounted section, sorted by id.
    pub fn states(&self) -> Vec<SectionLoadState> {
        let mut states: Vec<SectionLoadState> = self
            .sections
            .lock()
            .values()
            .map(|slot| slot.guard.state())
            .collect();
        states.sort_by(|a, b| a.section.cmp(&b.section));
        states
    }

    pub fn is_mounted(&self, id: &SectionId) -> bool {
        self.sections.lock().contains_key(id)
    }

    pub fn presentation(&self, id: &SectionId) -> Option<Presentation> {
        self.sections.lock().get(id).map(|slot| slot.guard.presentation())
    }

    /// Last good value of `id`, if still live.
    pub async fn cached(&self, id: &SectionId) -> Option<Value> {
        self.cache.write().await.get(&section_cache_key(id))
    }

    /// Drops the guard of `id` along with its pending requests. Returns
    /// whether one was mounted.
    pub fn unmount(&self, id: &SectionId) -> bool {
        let slot = self.sections.lock().remove(id);
        slot.is_some()
    }

    fn with_slot<R>(&self, id: &SectionId, f: impl FnOnce(&SectionSlot) -> R) -> Result<R> {
        if !self.registry.contains(id) {
            return Err(ResilienceError::NotFound(format!("section '{}'", id)));
        }
        let mut sections = self.sections.lock();
        let slot = match sections.entry(id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.mount(id)),
        };
        Ok(f(slot))
    }

    fn mount(&self, id: &SectionId) -> SectionSlot {
        let options = GuardOptions::new(self.budget(id)).late_completion(self.late_completion);
        let guard = SectionLoadGuard::mount_with(id.clone(), options, &self.bus);

        let recovery = {
            let me = self.me.clone();
            let section = id.clone();
            spawn_auto_recovery(guard.subscribe(), self.recovery, move || {
                let me = me.clone();
                let section = section.clone();
                async move {
                    if let Some(loader) = me.upgrade() {
                        if let Err(err) = loader.auto_retry(&section).await {
                            debug!(section = %section, error = %err, "auto-retry failed");
                        }
                    }
                }
            })
        };

        let requests = {
            let me = self.me.clone();
            let section = id.clone();
            debounce_bounded(
                move |()| {
                    let me = me.clone();
                    let section = section.clone();
                    async move {
                        match me.upgrade() {
                            Some(loader) if loader.is_mounted(&section) => {
                                loader.load(&section).await?;
                            }
                            _ => debug!(section = %section, "section unmounted, request dropped"),
                        }
                        anyhow::Ok(())
                    }
                },
                self.debounce_delay,
                self.debounce_max_wait,
            )
        };

        SectionSlot {
            guard,
            requests,
            recovery,
            inflight: Mutex::new(None),
        }
    }
}

fn section_cache_key(id: &SectionId) -> String {
    CacheKey::new("section").param("id", id).build()
}
