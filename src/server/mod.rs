//! HTTP surface.

pub mod auth;
pub mod error;
pub mod funds;
pub mod market;
pub mod records;
pub mod response;

use crate::AppContext;
use anyhow::{Context, Result};
use axum::{Json, Router, http::StatusCode, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub type AppState = Arc<AppContext>;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);
    Router::new()
        .route("/health", get(health))
        .nest(
            "/api/currencies",
            market::router().merge(funds::router()),
        )
        .nest("/api/records", records::router())
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .with_state(state)
}

/// Serves until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!("Listening on {}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")
}
