//! Health check
//!
//! Open route; answers 200 only when the store answers a ping.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::response::{error_reply, ApiError};
use crate::service::VaultService;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub fn health_routes(service: Arc<VaultService>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(service)
}

async fn health_handler(
    State(service): State<Arc<VaultService>>,
) -> Result<Json<HealthResponse>, ApiError> {
    service.health().await.map_err(error_reply)?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}
