//! API routes and handlers

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

mod events;
mod health;

pub use events::*;
pub use health::*;

/// All `/api/v1` routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness))
        .route("/events", post(events::submit_event))
}

/// Full application router, without transport layers
pub fn router(state: AppState) -> Router {
    Router::new().nest("/api/v1", routes()).with_state(state)
}
