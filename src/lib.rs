//! fleetcert library
//!
//! Certificate signing and lifecycle orchestration for device fleets: CSR
//! verification, CA-backed issuance, and the signing, expiry and
//! acknowledgment workflows that keep each device bound to one active
//! certificate.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;
pub use services::LifecycleOrchestrator;
pub use utils::error::{LifecycleError, LifecycleResult};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Workflow driver shared by every request
    pub orchestrator: Arc<LifecycleOrchestrator>,
}
