//! Lifecycle orchestrator
//!
//! Routes each decoded [`LifecycleEvent`] to one of three workflows:
//!
//! - **Signing**: verify the CSR, fetch the CA credential, issue, optionally
//!   register and attach the device policy, then return or publish the PEM.
//! - **Expiry**: find the device(s) bound to the expiring certificate and ask
//!   for a fresh CSR.
//! - **Ack**: revoke every other certificate bound to the acknowledging device.
//!
//! Collaborator calls within a workflow are awaited one at a time in issue
//! order. No state is kept between invocations apart from the optional
//! issuance ledger.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AppConfig, MultiDevicePolicy};
use crate::db::{idempotency_key, IssuanceRepository};
use crate::models::{
    CertificateDelivery, CertificateStatus, IssuanceRecord, LifecycleEvent, Principal,
    SigningRequest,
};
use crate::services::broker::{certificate_topic, csr_request_topic, MessageBroker};
use crate::services::credentials::{fetch_ca_credential, CredentialProvider};
use crate::services::csr::{self, CertificateIssuer};
use crate::services::registry::DeviceRegistry;
use crate::utils::error::{LifecycleError, LifecycleResult};
use crate::utils::validation::validate_device_id;

/// Payload of a CSR request message
const CSR_REQUEST_PAYLOAD: &[u8] = b"{}";

/// Workflow settings taken from configuration
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub credential_ref: Option<String>,
    pub policy_name: String,
    pub certificate_prefix: String,
    pub include_length: bool,
    pub multi_device_policy: MultiDevicePolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            credential_ref: config.ca.credential_ref.clone(),
            policy_name: config.registry.policy_name.clone(),
            certificate_prefix: config.registry.certificate_prefix.clone(),
            include_length: config.lifecycle.include_length,
            multi_device_policy: config.lifecycle.multi_device_policy,
        }
    }
}

/// Drives the signing, expiry and ack workflows against injected collaborators
pub struct LifecycleOrchestrator {
    issuer: CertificateIssuer,
    credentials: Arc<dyn CredentialProvider>,
    registry: Arc<dyn DeviceRegistry>,
    broker: Arc<dyn MessageBroker>,
    ledger: Option<IssuanceRepository>,
    settings: OrchestratorSettings,
}

impl LifecycleOrchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        credentials: Arc<dyn CredentialProvider>,
        registry: Arc<dyn DeviceRegistry>,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        Self {
            issuer: CertificateIssuer::default(),
            credentials,
            registry,
            broker,
            ledger: None,
            settings,
        }
    }

    /// Replace the issuer (tests pin its clock)
    pub fn with_issuer(mut self, issuer: CertificateIssuer) -> Self {
        self.issuer = issuer;
        self
    }

    /// Enable idempotent issuance backed by the ledger
    pub fn with_ledger(mut self, ledger: IssuanceRepository) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Decode a raw event and handle it
    pub async fn handle_raw(&self, raw: Value) -> LifecycleResult<Option<String>> {
        let event = LifecycleEvent::decode(raw)?;
        self.handle(event).await
    }

    /// Handle one event
    ///
    /// Returns the certificate PEM for a manual signing request and `None`
    /// for every other successful outcome.
    pub async fn handle(&self, event: LifecycleEvent) -> LifecycleResult<Option<String>> {
        let span = info_span!(
            "lifecycle_event",
            event_id = %Uuid::new_v4(),
            kind = event.kind()
        );

        async move {
            match event {
                LifecycleEvent::SigningRequested(request) => self.sign(request).await,
                LifecycleEvent::ExpiryNotice { certificate_id } => {
                    self.request_renewal(&certificate_id).await?;
                    Ok(None)
                }
                LifecycleEvent::AckReceived {
                    device_id,
                    certificate_id,
                } => {
                    self.revoke_superseded(&device_id, &certificate_id).await?;
                    Ok(None)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn sign(&self, request: SigningRequest) -> LifecycleResult<Option<String>> {
        // Verification gates every external call
        let parsed = csr::verify(&request.csr_pem)?;

        let key = self
            .ledger
            .as_ref()
            .map(|_| idempotency_key(&request.device_id, &request.csr_pem));

        if let (Some(ledger), Some(key)) = (&self.ledger, &key) {
            if let Some(record) = ledger.find(key).await? {
                info!(
                    device_id = %request.device_id,
                    serial = %record.serial,
                    "Signing request already served; re-delivering recorded certificate"
                );
                // Earlier request for this CSR did not ask for registration
                if request.register && record.certificate_id.is_none() {
                    let certificate_id = self.register(&record.certificate_pem).await?;
                    ledger.set_certificate_id(key, &certificate_id).await?;
                }
                return self.deliver(&request, &record.certificate_pem).await;
            }
        }

        let issued = {
            let ca = fetch_ca_credential(
                self.credentials.as_ref(),
                self.settings.credential_ref.as_deref(),
            )
            .await?;
            self.issuer.issue(&parsed, &ca)?
        };
        info!(
            device_id = %request.device_id,
            serial = %issued.serial,
            not_after = %issued.not_after,
            "Certificate issued"
        );

        let certificate_id = if request.register {
            Some(self.register(&issued.certificate_pem).await?)
        } else {
            None
        };

        let result = async {
            if let (Some(ledger), Some(key)) = (&self.ledger, key) {
                ledger
                    .record(&IssuanceRecord {
                        idempotency_key: key,
                        device_id: request.device_id.clone(),
                        serial: issued.serial.clone(),
                        certificate_id: certificate_id.clone(),
                        certificate_pem: issued.certificate_pem.clone(),
                        issued_at: issued.not_before,
                    })
                    .await?;
            }
            self.deliver(&request, &issued.certificate_pem).await
        }
        .await;

        if let (Err(e), Some(certificate_id)) = (&result, &certificate_id) {
            // Registry now holds an active certificate the device never received
            error!(
                device_id = %request.device_id,
                certificate_id = %certificate_id,
                "Certificate registered but not delivered: {}",
                e
            );
        }

        result
    }

    async fn register(&self, certificate_pem: &str) -> LifecycleResult<String> {
        let certificate_id = self
            .registry
            .register_certificate(certificate_pem, true)
            .await?;
        let principal =
            Principal::for_certificate(&self.settings.certificate_prefix, &certificate_id);

        if let Err(e) = self
            .registry
            .attach_policy(&self.settings.policy_name, &principal)
            .await
        {
            error!(
                certificate_id = %certificate_id,
                policy = %self.settings.policy_name,
                "Certificate registered but policy attach failed: {}",
                e
            );
            return Err(e);
        }

        info!(
            certificate_id = %certificate_id,
            policy = %self.settings.policy_name,
            "Certificate registered"
        );
        Ok(certificate_id)
    }

    async fn deliver(
        &self,
        request: &SigningRequest,
        certificate_pem: &str,
    ) -> LifecycleResult<Option<String>> {
        if request.manual {
            debug!(device_id = %request.device_id, "Returning certificate to caller");
            return Ok(Some(certificate_pem.to_string()));
        }

        let delivery = CertificateDelivery::new(certificate_pem, self.settings.include_length);
        let payload = serde_json::to_vec(&delivery)
            .map_err(|e| LifecycleError::Broker(format!("Failed to encode delivery: {}", e)))?;
        let topic = certificate_topic(&request.device_id);
        self.broker.publish(&topic, payload).await?;

        info!(device_id = %request.device_id, topic = %topic, "Certificate delivered");
        Ok(None)
    }

    async fn request_renewal(&self, certificate_id: &str) -> LifecycleResult<()> {
        let principal =
            Principal::for_certificate(&self.settings.certificate_prefix, certificate_id);
        let devices = self.registry.list_principal_devices(&principal).await?;

        if devices.is_empty() {
            return Err(LifecycleError::NoBoundDevice(certificate_id.to_string()));
        }
        if devices.len() > 1 {
            match self.settings.multi_device_policy {
                MultiDevicePolicy::Reject => {
                    return Err(LifecycleError::AmbiguousBinding {
                        principal: principal.to_string(),
                        count: devices.len(),
                    });
                }
                MultiDevicePolicy::FanOut => warn!(
                    certificate_id = %certificate_id,
                    devices = devices.len(),
                    "Certificate bound to several devices; requesting a CSR from each"
                ),
            }
        }

        // Device ids become topic segments
        if let Some(bad) = devices.iter().find(|d| !validate_device_id(d)) {
            return Err(LifecycleError::Registry(format!(
                "Registry returned a device id unusable as a topic segment: {:?}",
                bad
            )));
        }

        for device_id in &devices {
            let topic = csr_request_topic(device_id);
            self.broker
                .publish(&topic, CSR_REQUEST_PAYLOAD.to_vec())
                .await?;
            info!(
                certificate_id = %certificate_id,
                device_id = %device_id,
                "CSR requested for expiring certificate"
            );
        }
        Ok(())
    }

    async fn revoke_superseded(&self, device_id: &str, certificate_id: &str) -> LifecycleResult<()> {
        let prefix = &self.settings.certificate_prefix;
        let principals = self.registry.list_device_principals(device_id).await?;

        let mut acknowledged_bound = false;
        let mut revoked = 0usize;
        for principal in &principals {
            match principal.certificate_id(prefix) {
                None => debug!(principal = %principal, "Skipping non-certificate principal"),
                Some(id) if id == certificate_id => acknowledged_bound = true,
                Some(id) => {
                    self.registry
                        .update_certificate_status(id, CertificateStatus::Revoked)
                        .await?;
                    revoked += 1;
                    info!(device_id = %device_id, certificate_id = %id, "Certificate revoked");
                }
            }
        }

        if !acknowledged_bound {
            warn!(
                device_id = %device_id,
                certificate_id = %certificate_id,
                "Acknowledged certificate is not bound to the device"
            );
        }
        info!(
            device_id = %device_id,
            certificate_id = %certificate_id,
            revoked,
            "Acknowledgment processed"
        );
        Ok(())
    }
}
