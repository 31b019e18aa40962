//! Section Guard host
//!
//! Registers demo sections with simulated latency and serves the diagnostics
//! API over the resilience layer.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use section_guard::api::create_router;
use section_guard::section::SectionRegistry;
use section_guard::{spawn_cleanup_task, AppState, Config, SectionLoader};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Register sections and build the loader
/// 4. Start background TTL cleanup task
/// 5. Serve the diagnostics API on the configured port
/// 6. Handle graceful shutdown on SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "section_guard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Section Guard");

    let config = Config::from_env();
    config.validate()?;
    info!(
        max_entries = config.max_entries,
        default_ttl_ms = config.default_ttl_ms,
        breaker_max_failures = config.breaker_max_failures,
        port = config.server_port,
        "Configuration loaded"
    );

    let loader = SectionLoader::from_config(&config, demo_sections())?;
    let state = AppState::new(loader);

    let cleanup_handle = spawn_cleanup_task(state.cache.clone(), config.cleanup_interval());

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cleanup_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Sections with canned latencies. `analytics` never answers in time and
/// `journal` fails, so every fallback path can be exercised by hand.
fn demo_sections() -> SectionRegistry {
    let mut registry = SectionRegistry::new();
    registry
        .register("dashboard", || async {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            Ok(json!({ "tasks_due": 4, "streak_days": 12 }))
        })
        .register("tasks", || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!([{ "title": "Write weekly review", "done": false }]))
        })
        .register("analytics", || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({ "completion_rate": 0.72 }))
        })
        .register("journal", || async {
            Err(anyhow::anyhow!("journal getPage failed: upstream returned 502"))
        })
        .register("settings", || async { Ok(json!({ "theme": "dark" })) });
    registry
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the cleanup task.
async fn shutdown_signal(cleanup_handle: tokio::task::JoinHandle<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    cleanup_handle.abort();
    warn!("Cleanup task aborted");
}
