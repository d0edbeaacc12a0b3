//! Health check endpoints

use axum::{http::StatusCode, Json};
use serde::Serialize;

/// Basic health response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Simple health check endpoint (for load balancers)
///
/// Collaborators are not probed: each event reaches them on its own.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Liveness probe (for Kubernetes)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
