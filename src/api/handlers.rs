//! API Handlers
//!
//! HTTP request handlers for each diagnostics endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::Value;

use crate::cache::SharedCache;
use crate::error::{ResilienceError, Result};
use crate::models::{
    BreakerResponse, BreakersResponse, HealthResponse, InvalidateQuery, InvalidateResponse,
    LoadResponse, ResetResponse, SectionView, SectionsResponse, StatsResponse,
};
use crate::section::{SectionId, SectionLoader};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub loader: Arc<SectionLoader>,
    /// Same store the loader writes to
    pub cache: SharedCache<Value>,
}

impl AppState {
    pub fn new(loader: Arc<SectionLoader>) -> Self {
        let cache = loader.cache().clone();
        Self { loader, cache }
    }

    fn section_view(&self, id: SectionId) -> SectionView {
        let loader = &self.loader;
        SectionView {
            complexity: loader.tiers().classify(&id),
            timeout_budget_ms: loader.budget(&id).as_millis() as u64,
            state: loader.state(&id),
            presentation: loader.presentation(&id),
            id,
        }
    }
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let open = state
        .loader
        .breaker()
        .snapshot()
        .iter()
        .filter(|(_, status)| status.is_open)
        .count();
    Json(HealthResponse::new(open))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache = state.cache.read().await;
    Json(StatsResponse::new(&cache.stats(), cache.capacity()))
}

/// Handler for DELETE /cache
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Query(query): Query<InvalidateQuery>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = query.validate() {
        return Err(ResilienceError::InvalidRequest(error_msg));
    }

    let mut cache = state.cache.write().await;
    let removed = match &query.user {
        Some(user) => cache.invalidate_user(user, query.data_type.as_deref())?,
        None => cache.invalidate(query.pattern.as_deref())?,
    };

    Ok(Json(InvalidateResponse::new(removed)))
}

/// Handler for GET /breakers
pub async fn breakers_handler(State(state): State<AppState>) -> Json<BreakersResponse> {
    let breakers = state
        .loader
        .breaker()
        .snapshot()
        .iter()
        .map(|(key, status)| BreakerResponse::new(key.as_str(), status))
        .collect();
    Json(BreakersResponse { breakers })
}

/// Handler for GET /breakers/:key
pub async fn breaker_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<BreakerResponse> {
    let status = state.loader.breaker().status(&key);
    Json(BreakerResponse::new(key, &status))
}

/// Handler for POST /breakers/reset
pub async fn reset_breakers_handler(State(state): State<AppState>) -> Json<ResetResponse> {
    state.loader.breaker().reset();
    Json(ResetResponse::new("All circuit breakers reset"))
}

/// Handler for GET /sections
pub async fn sections_handler(State(state): State<AppState>) -> Json<SectionsResponse> {
    let ids: Vec<SectionId> = state.loader.registry().ids().cloned().collect();
    let sections = ids.into_iter().map(|id| state.section_view(id)).collect();
    Json(SectionsResponse { sections })
}

/// Handler for GET /sections/:id
pub async fn section_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SectionView>> {
    let id = registered(&state, id)?;
    Ok(Json(state.section_view(id)))
}

/// Handler for POST /sections/:id/load
///
/// Waits for the attempt to settle; a failure with no cached fallback is
/// returned as an error status.
pub async fn load_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LoadResponse>> {
    let id = registered(&state, id)?;
    let outcome = state.loader.load(&id).await?;
    Ok(Json(LoadResponse {
        outcome,
        state: state.loader.state(&id),
    }))
}

/// Handler for POST /sections/:id/retry
pub async fn retry_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LoadResponse>> {
    let id = registered(&state, id)?;
    let outcome = state.loader.retry(&id).await?;
    Ok(Json(LoadResponse {
        outcome,
        state: state.loader.state(&id),
    }))
}

fn registered(state: &AppState, id: String) -> Result<SectionId> {
    let id = SectionId::from(id);
    if state.loader.registry().contains(&id) {
        Ok(id)
    } else {
        Err(ResilienceError::NotFound(format!("section '{}'", id)))
    }
}
