//! Section Guard - client-side resilience layer
//!
//! Keeps a page of lazily loaded sections responsive when the services behind
//! them are slow or failing: deadlines, a debounced scheduler, a TTL/LRU
//! cache, per-key circuit breakers and per-section load guards.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod resilience;
pub mod section;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use error::{FailureKind, ResilienceError};
pub use resilience::{with_deadline, CircuitBreakerRegistry};
pub use section::{SectionId, SectionLoadGuard, SectionLoader};
pub use tasks::spawn_cleanup_task;
