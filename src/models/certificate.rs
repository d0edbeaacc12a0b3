//! Issued certificate and CA credential models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A certificate minted from a verified CSR
///
/// Immutable once produced. `certificate_pem` never contains carriage returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCertificate {
    /// 128-bit serial, lowercase hex
    pub serial: String,
    /// Subject DN copied from the CSR (one-line form)
    pub subject: String,
    /// Issuer DN copied from the CA certificate subject
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub certificate_pem: String,
}

/// Stored CA credential body
///
/// Field names match the JSON object kept in the secret store.
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaCredentialDocument {
    pub ca_cert_pem: String,
    pub ca_key_pem: String,
}

impl std::fmt::Debug for CaCredentialDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaCredentialDocument")
            .field("ca_cert_pem", &format_args!("<{} bytes>", self.ca_cert_pem.len()))
            .field("ca_key_pem", &"<redacted>")
            .finish()
    }
}

/// Payload published on `management/{deviceId}/crt`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDelivery {
    pub certificate_pem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

impl CertificateDelivery {
    pub fn new(certificate_pem: &str, include_length: bool) -> Self {
        Self {
            certificate_pem: certificate_pem.to_string(),
            length: include_length.then(|| certificate_pem.len()),
        }
    }
}

/// Ledger row recording one issuance under an idempotency key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuanceRecord {
    pub idempotency_key: String,
    pub device_id: String,
    pub serial: String,
    /// Registry id, present when the signing request asked for registration
    pub certificate_id: Option<String>,
    pub certificate_pem: String,
    pub issued_at: DateTime<Utc>,
}
