//! Database layer
//!
//! Holds the issuance ledger used to make signing requests idempotent under
//! at-least-once redelivery. Nothing else is persisted locally.

pub mod issuance_repository;

pub use issuance_repository::{idempotency_key, IssuanceRepository};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::config::LedgerConfig;

/// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Open the ledger database and apply migrations
pub async fn init_pool(config: &LedgerConfig) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("Invalid ledger database URL: {}", config.database_url))?
        .create_if_missing(true);

    // Every connection to an in-memory database sees its own empty database
    let max_connections = if config.database_url.contains(":memory:") {
        1
    } else {
        config.max_connections
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .context("Failed to open ledger database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run ledger migrations")?;

    Ok(pool)
}
