//! End-to-end timing scenarios
//!
//! Every test runs on paused tokio time, so budgets of several seconds
//! complete instantly and deterministically.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tokio_test::{assert_err, assert_ok};

use section_guard::cache::{self, CacheKey, CacheStore};
use section_guard::error::{FailureKind, ResilienceError};
use section_guard::resilience::{debounce_bounded, BreakerPolicy, Deadline};
use section_guard::section::{
    ErrorBus, FailureEvent, LoadStatus, Presentation, SectionId, SectionLoadGuard,
    SectionRegistry, TierTable, TimeoutBudgets,
};
use section_guard::{with_deadline, CircuitBreakerRegistry, Config, SectionLoader};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn mount(id: &str, bus: &ErrorBus) -> SectionLoadGuard {
    let id = SectionId::from(id);
    let budget = TierTable::standard().budget(&id, &TimeoutBudgets::default());
    SectionLoadGuard::mount(id, budget, bus)
}

// == Deadline ==

#[tokio::test(start_paused = true)]
async fn deadline_bounds_a_never_settling_operation() {
    for deadline in [1, 50, 5000] {
        let started = Instant::now();
        let err = with_deadline(
            || futures::future::pending::<Result<(), ResilienceError>>(),
            ms(deadline),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), FailureKind::Timeout);
        assert!(started.elapsed() <= ms(deadline + 50));
    }
}

#[tokio::test(start_paused = true)]
async fn operation_that_wins_fires_no_deadline_hooks() {
    let fired = Arc::new(AtomicBool::new(false));
    let hook = Arc::clone(&fired);

    let value = Deadline::new(ms(1000))
        .on_deadline(move || hook.store(true, Ordering::SeqCst))
        .run(async {
            sleep(ms(400)).await;
            Ok::<_, ResilienceError>(7)
        })
        .await;

    assert_eq!(assert_ok!(value), 7);
    sleep(ms(2000)).await;
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn immediate_failure_is_not_delayed() {
    let started = Instant::now();
    let result = with_deadline(
        || async { Err::<(), _>(ResilienceError::operation("bad input")) },
        ms(5000),
    )
    .await;

    let err = assert_err!(result);
    assert_eq!(err.kind(), FailureKind::Generic);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

// == Circuit Breaker ==

#[tokio::test(start_paused = true)]
async fn fourth_call_fails_fast_without_running() {
    let breaker = CircuitBreakerRegistry::new(BreakerPolicy::default());
    let counter = AtomicUsize::new(0);
    let calls = &counter;
    let failing = move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(ResilienceError::operation("down"))
    };

    for _ in 0..3 {
        assert_err!(breaker.execute("projects", failing).await);
    }
    let err = assert_err!(breaker.execute("projects", failing).await);

    assert_eq!(err.kind(), FailureKind::CircuitOpen);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn circuit_attempts_again_after_reset_window() {
    let breaker = CircuitBreakerRegistry::default();
    let counter = AtomicUsize::new(0);
    let calls = &counter;
    let failing = move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(ResilienceError::operation("down"))
    };

    for _ in 0..3 {
        let _ = breaker.execute("areas", failing).await;
    }
    sleep(ms(60_001)).await;

    let err = assert_err!(breaker.execute("areas", failing).await);
    assert_eq!(err.kind(), FailureKind::Generic);
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

// == Cache ==

#[tokio::test(start_paused = true)]
async fn cache_entry_expires_after_ttl() {
    let mut store = CacheStore::new(10, ms(300_000));
    store.set("k", "v", Some(ms(100))).unwrap();

    sleep(ms(150)).await;
    assert_eq!(store.get("k"), None);
}

#[test]
fn cache_evicts_the_single_untouched_key() {
    let capacity = 5;
    let mut store = CacheStore::new(capacity, ms(300_000));
    for i in 0..capacity {
        store.set(format!("k{}", i), i, None).unwrap();
    }
    for i in (0..capacity).filter(|i| *i != 2) {
        assert_eq!(store.get(&format!("k{}", i)), Some(i));
    }

    store.set("extra", 99, None).unwrap();

    assert_eq!(store.get("k2"), None);
    for i in (0..capacity).filter(|i| *i != 2) {
        assert_eq!(store.get(&format!("k{}", i)), Some(i));
    }
    assert_eq!(store.stats().evictions, 1);
}

#[tokio::test(start_paused = true)]
async fn read_through_runs_operation_once() {
    let cache = cache::shared(CacheStore::new(10, ms(60_000)));
    let key = CacheKey::user_data("tasks", "42").param("page", 1).build();
    let counter = AtomicUsize::new(0);
    let calls = &counter;

    for _ in 0..3 {
        let value = cache::cached(&cache, &key, None, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ResilienceError>(json!(["a", "b"]))
        })
        .await
        .unwrap();
        assert_eq!(value, json!(["a", "b"]));
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    assert_eq!(cache.write().await.invalidate_user("42", Some("tasks")).unwrap(), 1);
}

// == Debounce ==

#[tokio::test(start_paused = true)]
async fn steady_stream_still_executes_periodically() {
    let delay = ms(100);
    let max_wait = ms(400);
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let debounced = debounce_bounded(
        move |_: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { anyhow::Ok(()) }
        },
        delay,
        max_wait,
    );

    // every delay/2 for 3 * max_wait
    let mut elapsed = Duration::ZERO;
    let mut n = 0;
    while elapsed < max_wait * 3 {
        debounced.call(n);
        n += 1;
        sleep(delay / 2).await;
        elapsed += delay / 2;
    }
    // flush the trailing burst
    sleep(max_wait).await;

    let fired = runs.load(Ordering::SeqCst);
    assert!(fired >= 3, "fired {} times", fired);
    assert!(fired <= 4, "fired {} times", fired);
}

// == Section Load Guard ==

#[tokio::test(start_paused = true)]
async fn tasks_ready_after_200ms() {
    let bus = ErrorBus::new();
    let guard = mount("tasks", &bus);
    assert_eq!(guard.budget(), ms(5000));
    let attempt = guard.attempt();

    sleep(ms(200)).await;
    attempt.succeed();

    assert_eq!(guard.status(), LoadStatus::Ready);
    assert!(matches!(guard.presentation(), Presentation::Ready { .. }));
}

#[tokio::test(start_paused = true)]
async fn dashboard_times_out_with_its_own_fallback() {
    let bus = ErrorBus::new();
    let guard = mount("dashboard", &bus);

    sleep(ms(7999)).await;
    assert_eq!(guard.status(), LoadStatus::Pending);
    sleep(ms(2)).await;

    assert_eq!(guard.status(), LoadStatus::TimedOut);
    let presentation = guard.presentation();
    let fallback = presentation.fallback().unwrap();
    let labels: Vec<&str> = fallback.actions.iter().map(|a| a.label.as_str()).collect();
    assert_eq!(labels, vec!["Reload Dashboard", "Refresh Page"]);
}

#[tokio::test(start_paused = true)]
async fn global_error_lands_on_pillars_only() {
    let bus = ErrorBus::new();
    let pillars = mount("pillars", &bus);
    let tasks = mount("tasks", &bus);
    let journal = mount("journal", &bus);

    bus.publish(FailureEvent::untagged("pillars getPage failed"));
    sleep(ms(1)).await;

    assert_eq!(pillars.status(), LoadStatus::Errored);
    assert_eq!(tasks.status(), LoadStatus::Pending);
    assert_eq!(journal.status(), LoadStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn late_success_after_timeout_is_ignored() {
    let bus = ErrorBus::new();
    let guard = mount("settings", &bus);
    let attempt = guard.attempt();

    sleep(ms(3500)).await;
    assert_eq!(guard.status(), LoadStatus::TimedOut);

    assert!(!attempt.succeed());
    assert_eq!(guard.status(), LoadStatus::TimedOut);
}

// == Loader ==

#[tokio::test(start_paused = true)]
async fn loader_serves_cached_value_when_section_starts_failing() {
    let healthy = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&healthy);
    let mut registry = SectionRegistry::new();
    registry.register("insights", move || {
        let ok = flag.load(Ordering::SeqCst);
        async move {
            if ok {
                Ok(json!({ "focus_hours": 11 }))
            } else {
                futures::future::pending::<anyhow::Result<Value>>().await
            }
        }
    });
    let config = Config {
        auto_retry_max_attempts: 0,
        ..Config::default()
    };
    let loader = SectionLoader::from_config(&config, registry).unwrap();
    let id = SectionId::from("insights");

    assert!(!loader.load(&id).await.unwrap().is_degraded());
    healthy.store(false, Ordering::SeqCst);

    let outcome = loader.retry(&id).await.unwrap();
    assert!(outcome.is_degraded());
    assert_eq!(outcome.value(), &json!({ "focus_hours": 11 }));
    assert_eq!(loader.state(&id).unwrap().status, LoadStatus::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn loader_bus_event_fails_only_the_named_section() {
    let mut registry = SectionRegistry::new();
    registry
        .register("pillars", || futures::future::pending::<anyhow::Result<Value>>())
        .register("tasks", || futures::future::pending::<anyhow::Result<Value>>());
    let config = Config {
        auto_retry_max_attempts: 0,
        ..Config::default()
    };
    let loader = SectionLoader::from_config(&config, registry).unwrap();
    for id in ["pillars", "tasks"] {
        loader.request(&SectionId::from(id)).unwrap();
    }
    sleep(ms(300)).await;

    loader
        .bus()
        .publish(FailureEvent::untagged("pillars getPage failed"));
    sleep(ms(1)).await;

    let states = loader.states();
    let statuses: Vec<(&str, LoadStatus)> = states
        .iter()
        .map(|state| (state.section.as_str(), state.status))
        .collect();
    assert_eq!(
        statuses,
        vec![("pillars", LoadStatus::Errored), ("tasks", LoadStatus::Pending)]
    );
}
