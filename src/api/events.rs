//! Lifecycle event ingress

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::utils::error::{LifecycleError, LifecycleResult};
use crate::AppState;

/// Response for events that complete without returning a certificate
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: String,
}

/// POST /api/v1/events - Handle one lifecycle event
///
/// The body is the raw event object, e.g.:
/// ```json
/// { "deviceId": "dev1", "csrPem": "-----BEGIN CERTIFICATE REQUEST-----...", "manual": true }
/// ```
///
/// A manual signing request answers `200 text/plain` with the certificate
/// PEM; every other success answers `202 {"status":"accepted"}`.
pub async fn submit_event(State(state): State<AppState>, body: Bytes) -> LifecycleResult<Response> {
    let raw: Value = serde_json::from_slice(&body)
        .map_err(|e| LifecycleError::InvalidEvent(format!("body is not JSON: {}", e)))?;

    match state.orchestrator.handle_raw(raw).await? {
        Some(certificate_pem) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            certificate_pem,
        )
            .into_response()),
        None => Ok((
            StatusCode::ACCEPTED,
            Json(AcceptedResponse {
                status: "accepted".to_string(),
            }),
        )
            .into_response()),
    }
}
