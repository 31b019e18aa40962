//! Section complexity tiers and their timeout budgets.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::config::Config;
use crate::section::SectionId;

// == Complexity ==
/// Static classification of how heavy a section is to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Complex,
    Moderate,
    Simple,
}

// == Timeout Budgets ==
/// Budget per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudgets {
    pub complex: Duration,
    pub moderate: Duration,
    pub default: Duration,
}

impl Default for TimeoutBudgets {
    fn default() -> Self {
        Self {
            complex: Duration::from_millis(8000),
            moderate: Duration::from_millis(5000),
            default: Duration::from_millis(3000),
        }
    }
}

impl TimeoutBudgets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            complex: Duration::from_millis(config.budget_complex_ms),
            moderate: Duration::from_millis(config.budget_moderate_ms),
            default: Duration::from_millis(config.budget_default_ms),
        }
    }

    pub fn for_tier(&self, tier: Complexity) -> Duration {
        match tier {
            Complexity::Complex => self.complex,
            Complexity::Moderate => self.moderate,
            Complexity::Simple => self.default,
        }
    }
}

// == Tier Table ==
/// Section id -> complexity. Unlisted sections are `Simple`.
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    tiers: HashMap<SectionId, Complexity>,
}

impl TierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table used by the productivity app's sections.
    pub fn standard() -> Self {
        let mut table = Self::new();
        for id in ["dashboard", "insights", "analytics", "ai-coach"] {
            table.insert(id, Complexity::Complex);
        }
        for id in ["tasks", "projects", "areas", "pillars", "journal", "today"] {
            table.insert(id, Complexity::Moderate);
        }
        for id in ["settings", "profile", "notifications"] {
            table.insert(id, Complexity::Simple);
        }
        table
    }

    pub fn insert(&mut self, id: impl Into<SectionId>, tier: Complexity) -> &mut Self {
        self.tiers.insert(id.into(), tier);
        self
    }

    /// Whether `id` has an explicit entry.
    pub fn contains(&self, id: &SectionId) -> bool {
        self.tiers.contains_key(id)
    }

    pub fn classify(&self, id: &SectionId) -> Complexity {
        self.tiers.get(id).copied().unwrap_or(Complexity::Simple)
    }

    /// Budget for `id`, recomputed on every call.
    pub fn budget(&self, id: &SectionId, budgets: &TimeoutBudgets) -> Duration {
        budgets.for_tier(self.classify(id))
    }
}
