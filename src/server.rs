//! # HTTP Server
//!
//! Two small `axum` servers: one exposing `/metrics` for Prometheus scraping,
//! the other exposing `/healthz` (liveness, always 200) and `/readyz`
//! (readiness, gated on [`ServerState::is_ready`]) for Kubernetes probes.
//! Run on separate bind addresses so a metrics-scraping NetworkPolicy doesn't
//! also have to open the probe port.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
}

/// Serve `/metrics` on `bind_address` until the process exits.
///
/// # Errors
///
/// Returns an error if `bind_address` cannot be bound.
pub async fn serve_metrics(bind_address: &str) -> anyhow::Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = TcpListener::bind(bind_address).await?;
    info!(bind_address, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Serve `/healthz` and `/readyz` on `bind_address` until the process exits.
///
/// # Errors
///
/// Returns an error if `bind_address` cannot be bound.
pub async fn serve_health(bind_address: &str, state: Arc<ServerState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state);
    let listener = TcpListener::bind(bind_address).await?;
    info!(bind_address, "health probe server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = crate::observability::metrics::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(std::sync::atomic::Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
