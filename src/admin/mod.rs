//! Admin API: Axum server exposing provider triggers.
//!
//! Authentication and the CRUD surface live elsewhere; this router only
//! carries the ingestion triggers and a provider listing.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::{AdminState, AppState};

/// Serve the admin API on `port` until `cancel` fires.
pub async fn serve(state: AppState, port: u16, cancel: CancellationToken) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind admin port {port}"))?;
    info!(port, "Admin API listening on http://localhost:{port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("Admin server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/providers", get(routes::list_providers))
        .route("/api/providers/:name/run", post(routes::run_provider))
        .route("/api/providers/:name/fetch", post(routes::trigger_bulk_fetch))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
