//! Response DTOs for the diagnostics API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::resilience::{BreakerStatus, CircuitState};
use crate::section::{Complexity, LoadOutcome, Presentation, SectionId, SectionLoadState};

/// Response body for `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    pub capacity: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    pub fn new(stats: &CacheStats, capacity: usize) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            sets: stats.sets,
            deletes: stats.deletes,
            evictions: stats.evictions,
            expirations: stats.expirations,
            total_entries: stats.total_entries,
            capacity,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for `DELETE /cache`
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub message: String,
    pub removed: usize,
}

impl InvalidateResponse {
    pub fn new(removed: usize) -> Self {
        Self {
            message: format!("Invalidated {} entries", removed),
            removed,
        }
    }
}

/// One breaker key
#[derive(Debug, Clone, Serialize)]
pub struct BreakerResponse {
    pub key: String,
    pub failures: u32,
    pub is_open: bool,
    pub state: CircuitState,
}

impl BreakerResponse {
    pub fn new(key: impl Into<String>, status: &BreakerStatus) -> Self {
        Self {
            key: key.into(),
            failures: status.failures,
            is_open: status.is_open,
            state: status.state(),
        }
    }
}

/// Response body for `GET /breakers`
#[derive(Debug, Clone, Serialize)]
pub struct BreakersResponse {
    pub breakers: Vec<BreakerResponse>,
}

/// Response body for `POST /breakers/reset`
#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub message: String,
}

impl ResetResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A registered section and, once mounted, its guard state
#[derive(Debug, Clone, Serialize)]
pub struct SectionView {
    pub id: SectionId,
    pub complexity: Complexity,
    pub timeout_budget_ms: u64,
    pub state: Option<SectionLoadState>,
    pub presentation: Option<Presentation>,
}

/// Response body for `GET /sections`
#[derive(Debug, Clone, Serialize)]
pub struct SectionsResponse {
    pub sections: Vec<SectionView>,
}

/// Response body for `POST /sections/:id/load` and `/retry`
#[derive(Debug, Clone, Serialize)]
pub struct LoadResponse {
    pub outcome: LoadOutcome,
    pub state: Option<SectionLoadState>,
}

/// Response body for `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    pub open_circuits: usize,
}

impl HealthResponse {
    /// "healthy" with no open circuit, "degraded" otherwise.
    pub fn new(open_circuits: usize) -> Self {
        let status = if open_circuits == 0 { "healthy" } else { "degraded" };
        Self {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            open_circuits,
        }
    }
}
