//! HTTP surface: the webhook Telegram pushes updates to, and a liveness probe.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use teloxide::types::Update;
use tracing::{info, warn};

use crate::bot::IngestionController;

pub const WEBHOOK_PATH: &str = "/api/update/update";
pub const HEALTH_PATH: &str = "/api/update/hello";

pub fn router(ingestion: Arc<IngestionController>) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(hello))
        .route(WEBHOOK_PATH, post(receive_update))
        .with_state(ingestion)
}

async fn hello() -> &'static str {
    "world"
}

/// Acknowledge as soon as the update is queued; Telegram redelivers on non-2xx.
async fn receive_update(
    State(ingestion): State<Arc<IngestionController>>,
    Json(update): Json<Update>,
) -> StatusCode {
    let update_id = update.id.0;
    match ingestion.accept(update) {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            warn!(update_id, "Rejected webhook update: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    addr: std::net::SocketAddr,
    ingestion: Arc<IngestionController>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Listening on http://{} (webhook at {})", addr, WEBHOOK_PATH);

    axum::serve(listener, router(ingestion))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    Ok(())
}
