//! Section Module
//!
//! Guards the asynchronous loading of UI sections: per-section timeout
//! budgets, failure attribution, fallback selection and recovery.
//!
//! # Components
//! - `tier` - static complexity table and timeout budgets
//! - `events` - bus standing in for global error/rejection events
//! - `guard` - per-section load state machine
//! - `fallback` - rendering decision for a guard state
//! - `registry` - section id -> renderer factory
//! - `recovery` - automatic retry of transient failures
//! - `loader` - composes breaker, deadline, cache and guards

mod events;
mod fallback;
mod guard;
mod loader;
mod recovery;
mod registry;
mod tier;

use std::fmt;

use serde::Serialize;

pub use events::{ErrorBus, FailureEvent};
pub use fallback::{select_fallback, ActionButton, Fallback, FallbackAction, Presentation};
pub use guard::{AttemptHandle, GuardOptions, LateCompletion, LoadStatus, SectionLoadGuard, SectionLoadState};
pub use loader::{LoadOutcome, SectionLoader};
pub use recovery::{spawn_auto_recovery, AutoRecovery};
pub use registry::{Renderer, SectionRegistry};
pub use tier::{Complexity, TierTable, TimeoutBudgets};

// == Section Id ==
/// Identifier of a lazily loaded UI section, e.g. `"dashboard"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SectionId(String);

impl SectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable title: `"ai-coach"` -> `"Ai Coach"`.
    pub fn title(&self) -> String {
        self.0
            .split(|c| c == '-' || c == '_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for SectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title() {
        assert_eq!(SectionId::from("dashboard").title(), "Dashboard");
        assert_eq!(SectionId::from("ai-coach").title(), "Ai Coach");
        assert_eq!(SectionId::from("sleep_reflections").title(), "Sleep Reflections");
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&SectionId::from("tasks")).unwrap();
        assert_eq!(json, "\"tasks\"");
    }
}
