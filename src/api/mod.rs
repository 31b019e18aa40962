//! API Module
//!
//! HTTP handlers and routing for the diagnostics API of the host binary.
//!
//! # Endpoints
//! - `GET /health` - Health check, degraded while any circuit is open
//! - `GET /stats` - Cache statistics
//! - `DELETE /cache` - Invalidate by pattern or user
//! - `GET /breakers`, `GET /breakers/:key`, `POST /breakers/reset`
//! - `GET /sections`, `GET /sections/:id`
//! - `POST /sections/:id/load`, `POST /sections/:id/retry`

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
