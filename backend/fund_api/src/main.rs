//! QRKot charity fund service: entry point.
//!
//! Stores charity projects and donations in SQLite and allocates every new
//! one against the open backlog of the opposite kind. Exposes a small Axum
//! REST API for the frontend and administrators.

mod allocation;
mod api;
mod config;
mod db;
mod errors;
mod models;
mod validators;

#[cfg(test)]
mod test_api;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use allocation::Allocator;
use api::ApiState;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url, config.max_connections).await?;

    let allocator = Allocator::new(pool, config.allocation_max_attempts);

    // ─── Recovery ─────────────────────────────────────────
    // Anything created but never allocated (e.g. a crash between the two
    // steps) is allocated now, oldest first.
    allocator.allocate_pending().await?;

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(ApiState {
        allocator,
        title: config.app_title.clone(),
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("{} API listening on http://{addr}", config.app_title);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
