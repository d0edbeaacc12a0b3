//! Device registry client
//!
//! The registry owns device ↔ certificate bindings. The orchestrator only
//! issues commands against it (register, attach policy, update status) and
//! reads bindings back through principal/device listings.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::models::{CertificateStatus, Principal};
use crate::services::http;
use crate::utils::error::{LifecycleError, LifecycleResult};

/// Commands and queries the orchestrator needs from a device registry
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Register a certificate and return its registry id
    async fn register_certificate(&self, certificate_pem: &str, active: bool)
        -> LifecycleResult<String>;

    /// Attach a named policy to a principal
    async fn attach_policy(&self, policy_name: &str, principal: &Principal) -> LifecycleResult<()>;

    /// Set a certificate's status; re-applying the same status is not an error
    async fn update_certificate_status(
        &self,
        certificate_id: &str,
        status: CertificateStatus,
    ) -> LifecycleResult<()>;

    /// Devices bound to a principal, in registry order
    async fn list_principal_devices(&self, principal: &Principal) -> LifecycleResult<Vec<String>>;

    /// Principals bound to a device
    async fn list_device_principals(&self, device_id: &str) -> LifecycleResult<Vec<Principal>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterCertificateBody<'a> {
    certificate_pem: &'a str,
    set_as_active: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterCertificateResponse {
    certificate_id: String,
}

#[derive(Serialize)]
struct AttachPolicyBody<'a> {
    target: &'a str,
}

#[derive(Deserialize)]
struct ThingsResponse {
    #[serde(default)]
    things: Vec<String>,
}

#[derive(Deserialize)]
struct PrincipalsResponse {
    #[serde(default)]
    principals: Vec<String>,
}

/// REST client for an IoT-style device registry
///
/// | Operation | Request |
/// |---|---|
/// | register | `POST /certificate/register` |
/// | attach policy | `PUT /target-policies/{policy}` |
/// | update status | `PUT /certificates/{id}?newStatus=...` |
/// | devices by principal | `GET /principals/things` + `x-amzn-principal` header |
/// | principals by device | `GET /things/{device}/principals` |
#[derive(Clone)]
pub struct HttpDeviceRegistry {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpDeviceRegistry {
    pub fn new(config: &RegistryConfig) -> LifecycleResult<Self> {
        if config.endpoint.url.trim().is_empty() {
            return Err(LifecycleError::Configuration(
                "registry.url is not configured".to_string(),
            ));
        }
        Ok(Self {
            client: http::build_client(&config.endpoint)?,
            base_url: http::base_url(&config.endpoint),
            api_token: config.endpoint.api_token.clone(),
        })
    }

    fn unexpected(status: StatusCode, operation: &str) -> LifecycleError {
        LifecycleError::Registry(format!("{} returned status: {}", operation, status))
    }
}

fn transport(e: reqwest::Error) -> LifecycleError {
    if e.is_timeout() {
        LifecycleError::Registry("Registry request timed out".to_string())
    } else if e.is_connect() {
        LifecycleError::Registry("Failed to connect to registry".to_string())
    } else {
        LifecycleError::Registry(e.to_string())
    }
}

#[async_trait]
impl DeviceRegistry for HttpDeviceRegistry {
    async fn register_certificate(
        &self,
        certificate_pem: &str,
        active: bool,
    ) -> LifecycleResult<String> {
        let url = format!("{}/certificate/register", self.base_url);
        let body = RegisterCertificateBody {
            certificate_pem,
            set_as_active: active,
        };

        let response = http::with_auth(self.client.post(&url), self.api_token.as_deref())
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let parsed: RegisterCertificateResponse = response.json().await.map_err(|e| {
                    LifecycleError::Registry(format!("Failed to parse register response: {}", e))
                })?;
                debug!(certificate_id = %parsed.certificate_id, "Certificate registered");
                Ok(parsed.certificate_id)
            }
            StatusCode::CONFLICT => Err(LifecycleError::Registry(
                "Certificate already registered".to_string(),
            )),
            status => Err(Self::unexpected(status, "register certificate")),
        }
    }

    async fn attach_policy(&self, policy_name: &str, principal: &Principal) -> LifecycleResult<()> {
        let url = format!(
            "{}/target-policies/{}",
            self.base_url,
            urlencoding::encode(policy_name)
        );

        let response = http::with_auth(self.client.put(&url), self.api_token.as_deref())
            .json(&AttachPolicyBody {
                target: principal.as_str(),
            })
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(LifecycleError::Registry(format!(
                "Policy not found: {}",
                policy_name
            ))),
            status => Err(Self::unexpected(status, "attach policy")),
        }
    }

    async fn update_certificate_status(
        &self,
        certificate_id: &str,
        status: CertificateStatus,
    ) -> LifecycleResult<()> {
        let url = format!(
            "{}/certificates/{}",
            self.base_url,
            urlencoding::encode(certificate_id)
        );

        let response = http::with_auth(self.client.put(&url), self.api_token.as_deref())
            .query(&[("newStatus", status.as_str())])
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(LifecycleError::Registry(format!(
                "Certificate not found: {}",
                certificate_id
            ))),
            status => Err(Self::unexpected(status, "update certificate")),
        }
    }

    async fn list_principal_devices(&self, principal: &Principal) -> LifecycleResult<Vec<String>> {
        let url = format!("{}/principals/things", self.base_url);

        let response = http::with_auth(self.client.get(&url), self.api_token.as_deref())
            .header("x-amzn-principal", principal.as_str())
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK => {
                let parsed: ThingsResponse = response.json().await.map_err(|e| {
                    LifecycleError::Registry(format!("Failed to parse things: {}", e))
                })?;
                Ok(parsed.things)
            }
            StatusCode::NOT_FOUND => Ok(vec![]),
            status => Err(Self::unexpected(status, "list principal things")),
        }
    }

    async fn list_device_principals(&self, device_id: &str) -> LifecycleResult<Vec<Principal>> {
        let url = format!(
            "{}/things/{}/principals",
            self.base_url,
            urlencoding::encode(device_id)
        );

        let response = http::with_auth(self.client.get(&url), self.api_token.as_deref())
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK => {
                let parsed: PrincipalsResponse = response.json().await.map_err(|e| {
                    LifecycleError::Registry(format!("Failed to parse principals: {}", e))
                })?;
                Ok(parsed.principals.into_iter().map(Principal::from_raw).collect())
            }
            StatusCode::NOT_FOUND => Err(LifecycleError::Registry(format!(
                "Device not found: {}",
                device_id
            ))),
            status => Err(Self::unexpected(status, "list thing principals")),
        }
    }
}
