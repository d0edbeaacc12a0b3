//! Issuance ledger repository
//!
//! One row per idempotency key. A redelivered signing request finds its row
//! and re-delivers the stored certificate instead of minting a new one.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};

use crate::models::IssuanceRecord;
use crate::utils::error::{LifecycleError, LifecycleResult};

/// Idempotency key for a signing request
///
/// SHA-256 over the device id, a NUL separator and the CSR with carriage
/// returns removed, so CRLF and LF encodings of one CSR collide.
pub fn idempotency_key(device_id: &str, csr_pem: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(csr_pem.trim().replace('\r', "").as_bytes());
    hex::encode(hasher.finalize())
}

/// Repository for issuance records
#[derive(Clone)]
pub struct IssuanceRepository {
    pool: SqlitePool,
}

#[derive(FromRow)]
struct IssuanceRow {
    idempotency_key: String,
    device_id: String,
    serial: String,
    certificate_id: Option<String>,
    certificate_pem: String,
    issued_at: String,
}

impl TryFrom<IssuanceRow> for IssuanceRecord {
    type Error = LifecycleError;

    fn try_from(row: IssuanceRow) -> Result<Self, Self::Error> {
        let issued_at = DateTime::parse_from_rfc3339(&row.issued_at)
            .map_err(|e| LifecycleError::Ledger(format!("Bad issued_at in ledger: {}", e)))?
            .with_timezone(&Utc);

        Ok(IssuanceRecord {
            idempotency_key: row.idempotency_key,
            device_id: row.device_id,
            serial: row.serial,
            certificate_id: row.certificate_id,
            certificate_pem: row.certificate_pem,
            issued_at,
        })
    }
}

impl IssuanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a prior issuance
    pub async fn find(&self, idempotency_key: &str) -> LifecycleResult<Option<IssuanceRecord>> {
        let row = sqlx::query_as::<_, IssuanceRow>(
            r#"
            SELECT idempotency_key, device_id, serial, certificate_id, certificate_pem, issued_at
            FROM issuance_records
            WHERE idempotency_key = ?1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IssuanceRecord::try_from).transpose()
    }

    /// Record an issuance; returns `false` if the key was already taken
    pub async fn record(&self, record: &IssuanceRecord) -> LifecycleResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO issuance_records (
                idempotency_key, device_id, serial, certificate_id, certificate_pem, issued_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(idempotency_key) DO NOTHING
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(&record.device_id)
        .bind(&record.serial)
        .bind(&record.certificate_id)
        .bind(&record.certificate_pem)
        .bind(record.issued_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Attach a registry certificate id to an unregistered issuance
    pub async fn set_certificate_id(
        &self,
        idempotency_key: &str,
        certificate_id: &str,
    ) -> LifecycleResult<()> {
        sqlx::query(
            r#"
            UPDATE issuance_records
            SET certificate_id = ?2
            WHERE idempotency_key = ?1 AND certificate_id IS NULL
            "#,
        )
        .bind(idempotency_key)
        .bind(certificate_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
