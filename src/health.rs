// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Health and metrics endpoints.
//!
//! `/healthz` answers 200 while the proxy backend passes its own check and 500
//! otherwise. `/metrics` exposes the Prometheus registry in text format.

use crate::backend::ProxyBackend;
use crate::constants::{HEALTHZ_PATH, METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PATH};
use crate::metrics;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Clone)]
struct HealthState {
    backend: Arc<dyn ProxyBackend>,
}

async fn healthz(State(state): State<HealthState>) -> (StatusCode, String) {
    match state.backend.check().await {
        Ok(()) => (StatusCode::OK, "ok".to_string()),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
        }
    }
}

async fn metrics_text() -> (StatusCode, String) {
    match metrics::gather_metrics() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn router(backend: Arc<dyn ProxyBackend>) -> Router {
    Router::new()
        .route(HEALTHZ_PATH, get(healthz))
        .route(METRICS_SERVER_PATH, get(metrics_text))
        .with_state(HealthState { backend })
}

/// Serves health and metrics on `port` until `shutdown` flips.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(
    port: u16,
    backend: Arc<dyn ProxyBackend>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let address = format!("{METRICS_SERVER_BIND_ADDRESS}:{port}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind health server on {address}"))?;
    info!(address = %address, "Health and metrics server listening");

    axum::serve(listener, router(backend))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("Health server failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::JsonFileBackend;

    #[tokio::test]
    async fn test_healthz_follows_backend_check() {
        let dir = tempfile::tempdir().unwrap();
        let healthy = HealthState {
            backend: Arc::new(JsonFileBackend::new(dir.path().join("out.json"))),
        };
        assert_eq!(healthz(State(healthy)).await.0, StatusCode::OK);

        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        let broken = HealthState {
            backend: Arc::new(JsonFileBackend::new(file.join("out.json"))),
        };
        assert_eq!(
            healthz(State(broken)).await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_registry() {
        metrics::record_reload("reloaded");
        let (status, body) = metrics_text().await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("reload"));
    }
}
