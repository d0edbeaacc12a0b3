//! Shared HTTP client construction for external collaborators

use std::time::Duration;

use reqwest::{Client, Identity, RequestBuilder};

use crate::config::EndpointConfig;
use crate::utils::error::{LifecycleError, LifecycleResult};

/// Build a reqwest client from endpoint settings
pub fn build_client(config: &EndpointConfig) -> LifecycleResult<Client> {
    let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));

    // Root certificate must be added before the identity for rustls
    if let Some(ca_path) = &config.ssl_ca {
        let ca_pem = std::fs::read(ca_path).map_err(|e| {
            LifecycleError::Configuration(format!("Failed to read CA bundle {:?}: {}", ca_path, e))
        })?;
        let ca_cert = reqwest::Certificate::from_pem(&ca_pem).map_err(|e| {
            LifecycleError::Configuration(format!("Failed to parse CA bundle: {}", e))
        })?;
        builder = builder.add_root_certificate(ca_cert);
    }

    if let (Some(cert_path), Some(key_path)) = (&config.ssl_cert, &config.ssl_key) {
        let mut bundle = std::fs::read(cert_path).map_err(|e| {
            LifecycleError::Configuration(format!("Failed to read client certificate: {}", e))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            LifecycleError::Configuration(format!("Failed to read client key: {}", e))
        })?;
        bundle.push(b'\n');
        bundle.extend_from_slice(&key_pem);

        let identity = Identity::from_pem(&bundle).map_err(|e| {
            LifecycleError::Configuration(format!("Failed to create client identity: {}", e))
        })?;
        builder = builder.identity(identity);
    }

    if !config.ssl_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| LifecycleError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Attach the bearer token, if one is configured
pub fn with_auth(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Base URL without trailing slash
pub fn base_url(config: &EndpointConfig) -> String {
    config.url.trim_end_matches('/').to_string()
}
