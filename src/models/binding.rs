//! Registry-side binding models
//!
//! The registry owns the device ↔ certificate table. These types only describe
//! the values exchanged with it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Registry status of a certificate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertificateStatus {
    /// Issued but not yet registered
    Pending,
    /// Registered and usable by the device
    Active,
    /// Superseded by a newer certificate
    Revoked,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Pending => "PENDING",
            CertificateStatus::Active => "ACTIVE",
            CertificateStatus::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registry principal of the form `{prefix}/{certificateId}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    /// Build the principal for a certificate id
    pub fn for_certificate(prefix: &str, certificate_id: &str) -> Self {
        Self(format!("{}/{}", prefix.trim_end_matches('/'), certificate_id))
    }

    /// Wrap a principal string returned by the registry
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Certificate id encoded in this principal, if it carries `prefix`
    ///
    /// Principals of other kinds (e.g. federated identities) yield `None`.
    pub fn certificate_id<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        let rest = self.0.strip_prefix(prefix.trim_end_matches('/'))?;
        let id = rest.strip_prefix('/')?;
        if id.is_empty() || id.contains('/') {
            return None;
        }
        Some(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
