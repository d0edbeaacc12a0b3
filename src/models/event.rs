//! Lifecycle event decoding
//!
//! Raw events arrive as loose JSON objects. Device firmware still sends the
//! legacy field names (`clientid`, `csr`) and the `ack`/`refresh` markers, so
//! both spellings are accepted, but every input must map to exactly one
//! [`LifecycleEvent`] variant or it is rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::error::{LifecycleError, LifecycleResult};
use crate::utils::validation::{validate_certificate_id, validate_device_id};

/// A decoded lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A device submitted a CSR
    SigningRequested(SigningRequest),
    /// A certificate is about to expire
    ExpiryNotice { certificate_id: String },
    /// A device confirmed it installed a certificate
    AckReceived {
        device_id: String,
        certificate_id: String,
    },
}

/// Fields of a signing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningRequest {
    pub device_id: String,
    pub csr_pem: String,
    /// Register the certificate in the device registry and attach the policy
    pub register: bool,
    /// Return the certificate to the caller instead of publishing it
    pub manual: bool,
}

/// Wire shape before classification; `null` counts as absent
#[derive(Debug, Default, Deserialize)]
struct RawEvent {
    #[serde(rename = "deviceId")]
    device_id: Option<Value>,
    clientid: Option<Value>,
    #[serde(rename = "csrPem")]
    csr_pem: Option<Value>,
    csr: Option<Value>,
    #[serde(rename = "certificateId")]
    certificate_id: Option<Value>,
    register: Option<Value>,
    manual: Option<Value>,
    ack: Option<Value>,
    refresh: Option<Value>,
}

impl LifecycleEvent {
    /// Classify a raw event into exactly one variant
    pub fn decode(value: Value) -> LifecycleResult<Self> {
        if !value.is_object() {
            return Err(invalid("event must be a JSON object"));
        }
        let raw: RawEvent = serde_json::from_value(value)
            .map_err(|e| invalid(format!("malformed event: {}", e)))?;

        let device_id = merge_alias("deviceId", raw.device_id, "clientid", raw.clientid)?;
        let csr = merge_alias("csrPem", raw.csr_pem, "csr", raw.csr)?;
        let has_flags = raw.register.is_some() || raw.manual.is_some();

        if let Some(csr) = csr {
            reject_present("signing request", "certificateId", &raw.certificate_id)?;
            reject_present("signing request", "ack", &raw.ack)?;
            reject_present("signing request", "refresh", &raw.refresh)?;
            let device_id = device_id
                .ok_or_else(|| invalid("signing request requires deviceId"))
                .and_then(device_id_field)?;
            return Ok(LifecycleEvent::SigningRequested(SigningRequest {
                device_id,
                csr_pem: string_field("csrPem", csr)?,
                register: flag_field("register", raw.register)?,
                manual: flag_field("manual", raw.manual)?,
            }));
        }

        match (raw.certificate_id, device_id) {
            (Some(certificate_id), Some(device_id)) => {
                reject_present("acknowledgment", "refresh", &raw.refresh)?;
                if has_flags {
                    return Err(invalid("acknowledgment does not accept register/manual"));
                }
                Ok(LifecycleEvent::AckReceived {
                    device_id: device_id_field(device_id)?,
                    certificate_id: certificate_id_field(certificate_id)?,
                })
            }
            (Some(certificate_id), None) => {
                reject_present("expiry notice", "ack", &raw.ack)?;
                if has_flags {
                    return Err(invalid("expiry notice does not accept register/manual"));
                }
                Ok(LifecycleEvent::ExpiryNotice {
                    certificate_id: certificate_id_field(certificate_id)?,
                })
            }
            (None, _) => Err(invalid(
                "event matches no workflow (expected csrPem, certificateId or both deviceId and certificateId)",
            )),
        }
    }

    /// Short name for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleEvent::SigningRequested(_) => "signing_requested",
            LifecycleEvent::ExpiryNotice { .. } => "expiry_notice",
            LifecycleEvent::AckReceived { .. } => "ack_received",
        }
    }
}

fn invalid(message: impl Into<String>) -> LifecycleError {
    LifecycleError::InvalidEvent(message.into())
}

fn merge_alias(
    name: &str,
    canonical: Option<Value>,
    alias_name: &str,
    alias: Option<Value>,
) -> LifecycleResult<Option<Value>> {
    match (canonical, alias) {
        (Some(_), Some(_)) => Err(invalid(format!(
            "both {} and {} supplied",
            name, alias_name
        ))),
        (canonical, alias) => Ok(canonical.or(alias)),
    }
}

fn reject_present(variant: &str, field: &str, value: &Option<Value>) -> LifecycleResult<()> {
    if value.is_some() {
        return Err(invalid(format!("{} must not carry {}", variant, field)));
    }
    Ok(())
}

fn string_field(field: &str, value: Value) -> LifecycleResult<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        Value::String(_) => Err(invalid(format!("{} must not be empty", field))),
        _ => Err(invalid(format!("{} must be a string", field))),
    }
}

fn device_id_field(value: Value) -> LifecycleResult<String> {
    let device_id = string_field("deviceId", value)?;
    if !validate_device_id(&device_id) {
        return Err(invalid(format!("deviceId is not a valid topic segment: {}", device_id)));
    }
    Ok(device_id)
}

fn certificate_id_field(value: Value) -> LifecycleResult<String> {
    let certificate_id = string_field("certificateId", value)?;
    if !validate_certificate_id(&certificate_id) {
        return Err(invalid(format!("certificateId is malformed: {}", certificate_id)));
    }
    Ok(certificate_id)
}

fn flag_field(field: &str, value: Option<Value>) -> LifecycleResult<bool> {
    match value {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(_) => Err(invalid(format!("{} must be a boolean", field))),
    }
}
