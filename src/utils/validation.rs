//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

/// Device identifiers become a single MQTT topic level: no separators,
/// wildcards or whitespace
static DEVICE_ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^/+#\s]+$").unwrap());

/// Certificate identifiers are registry tokens appended to the principal prefix
static CERTIFICATE_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Validate a device identifier
pub fn validate_device_id(device_id: &str) -> bool {
    device_id.chars().count() <= 128 && DEVICE_ID_REGEX.is_match(device_id)
}

/// Validate a registry certificate identifier
pub fn validate_certificate_id(certificate_id: &str) -> bool {
    certificate_id.len() <= 128 && CERTIFICATE_ID_REGEX.is_match(certificate_id)
}
