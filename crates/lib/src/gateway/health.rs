//! Liveness endpoint: `GET /` answers with a small JSON status.

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct HealthState {
    pub bot_name: String,
    /// Dispatches still producing a reply.
    pub in_flight: Arc<AtomicUsize>,
}

async fn health_http(State(state): State<HealthState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "bot": state.bot_name,
        "inFlight": state.in_flight.load(Ordering::SeqCst),
    }))
}

/// Serve the health endpoint on `bind:port` until `shutdown` flips to true.
pub async fn serve_health(
    bind: &str,
    port: u16,
    state: HealthState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = Router::new()
        .route("/", get(health_http))
        .with_state(state);
    let bind_addr = format!("{}:{}", bind.trim(), port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding health endpoint to {}", bind_addr))?;
    log::info!("health endpoint listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("health endpoint exited")?;
    Ok(())
}
