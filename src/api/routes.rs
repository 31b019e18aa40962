//! API Routes
//!
//! Configures the Axum router with every diagnostics endpoint.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    breaker_handler, breakers_handler, health_handler, invalidate_handler, load_handler,
    reset_breakers_handler, retry_handler, section_handler, sections_handler, stats_handler,
    AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/cache", delete(invalidate_handler))
        .route("/breakers", get(breakers_handler))
        .route("/breakers/reset", post(reset_breakers_handler))
        .route("/breakers/:key", get(breaker_handler))
        .route("/sections", get(sections_handler))
        .route("/sections/:id", get(section_handler))
        .route("/sections/:id/load", post(load_handler))
        .route("/sections/:id/retry", post(retry_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
