//! CSR verification and certificate issuance
//!
//! Issuance is pure: given a verified CSR, a CA credential and the current
//! time, it builds and signs an X.509v3 certificate. The only randomness is the
//! 128-bit serial drawn from the OS RNG.
//!
//! # Certificate Properties
//! - **Serial**: 16 random bytes, reported as 32 lowercase hex characters
//! - **Issuer**: subject of the CA certificate
//! - **Subject / public key**: copied from the CSR
//! - **Validity**: `[now, now + 1 year]`, whole seconds
//! - **Signature**: ECDSA with SHA-256 using the CA key

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Months, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::{Id, PKey, Public};
use openssl::x509::{X509NameRef, X509Req, X509};
use rand::RngCore;
use tracing::debug;

use crate::models::IssuedCertificate;
use crate::services::credentials::CaCredential;
use crate::utils::error::{LifecycleError, LifecycleResult};

const X509_VERSION_3: i32 = 2;
const SERIAL_BYTES: usize = 16;
const VALIDITY_MONTHS: u32 = 12;

/// Source of the issuance instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant, for reproducible issuance
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A CSR whose self-signature has been checked
pub struct ParsedCsr {
    request: X509Req,
    public_key: PKey<Public>,
}

impl ParsedCsr {
    pub fn subject_name(&self) -> &X509NameRef {
        self.request.subject_name()
    }

    /// Subject DN in one-line `CN=..., O=...` form
    pub fn subject(&self) -> String {
        format_name(self.request.subject_name())
    }

    pub fn public_key(&self) -> &PKey<Public> {
        &self.public_key
    }
}

impl fmt::Debug for ParsedCsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsedCsr")
            .field("subject", &self.subject())
            .finish_non_exhaustive()
    }
}

/// Check a CSR's self-signature over its embedded public key
///
/// No network or state access. Unparseable input fails with
/// [`LifecycleError::InvalidCsr`]; a signature that does not verify fails with
/// [`LifecycleError::InvalidSignature`].
pub fn verify(csr_pem: &str) -> LifecycleResult<ParsedCsr> {
    let request = X509Req::from_pem(csr_pem.trim().as_bytes())
        .map_err(|e| LifecycleError::InvalidCsr(format!("Failed to parse CSR: {}", e)))?;

    let public_key = request
        .public_key()
        .map_err(|e| LifecycleError::InvalidCsr(format!("Failed to read CSR public key: {}", e)))?;

    // An error here means the signature bytes themselves are malformed
    match request.verify(&public_key) {
        Ok(true) => {}
        Ok(false) | Err(_) => return Err(LifecycleError::InvalidSignature),
    }

    let parsed = ParsedCsr {
        request,
        public_key,
    };
    debug!(subject = %parsed.subject(), "CSR signature verified");
    Ok(parsed)
}

/// Builds device certificates from verified CSRs
#[derive(Clone)]
pub struct CertificateIssuer {
    clock: Arc<dyn Clock>,
}

impl Default for CertificateIssuer {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CertificateIssuer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Sign a certificate for `csr` with the CA credential
    ///
    /// Neither the credential nor any registry state is touched.
    pub fn issue(&self, csr: &ParsedCsr, ca: &CaCredential) -> LifecycleResult<IssuedCertificate> {
        if ca.private_key().id() != Id::EC {
            return Err(LifecycleError::Issuance(
                "CA key must be an EC key for ECDSA-SHA256 signing".to_string(),
            ));
        }

        let now = self.clock.now();
        let not_before = DateTime::from_timestamp(now.timestamp(), 0)
            .ok_or_else(|| LifecycleError::Issuance("Issuance time out of range".to_string()))?;
        let not_after = not_before
            .checked_add_months(Months::new(VALIDITY_MONTHS))
            .ok_or_else(|| LifecycleError::Issuance("Expiry time out of range".to_string()))?;

        let mut serial_bytes = [0u8; SERIAL_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut serial_bytes);
        let serial = hex::encode(serial_bytes);

        let certificate = build_certificate(csr, ca, &serial_bytes, not_before, not_after)
            .map_err(|e| LifecycleError::Issuance(e.to_string()))?;

        let pem = certificate
            .to_pem()
            .map_err(|e| LifecycleError::Issuance(format!("Failed to encode certificate: {}", e)))?;
        let certificate_pem = String::from_utf8(pem)
            .map_err(|e| LifecycleError::Issuance(format!("Certificate PEM is not UTF-8: {}", e)))?
            .replace('\r', "");

        debug!(serial = %serial, subject = %csr.subject(), "Certificate issued");

        Ok(IssuedCertificate {
            serial,
            subject: csr.subject(),
            issuer: format_name(ca.certificate().subject_name()),
            not_before,
            not_after,
            certificate_pem,
        })
    }
}

fn build_certificate(
    csr: &ParsedCsr,
    ca: &CaCredential,
    serial_bytes: &[u8],
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<X509, openssl::error::ErrorStack> {
    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;

    let serial = BigNum::from_slice(serial_bytes)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;

    builder.set_issuer_name(ca.certificate().subject_name())?;
    builder.set_subject_name(csr.subject_name())?;
    builder.set_pubkey(csr.public_key())?;

    let not_before = Asn1Time::from_unix(not_before.timestamp())?;
    let not_after = Asn1Time::from_unix(not_after.timestamp())?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;

    builder.sign(ca.private_key(), MessageDigest::sha256())?;
    Ok(builder.build())
}

/// Render a distinguished name as `SN=value, SN=value`
pub fn format_name(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
