//! Message broker client and the device management topic layout

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::BrokerConfig;
use crate::services::http;
use crate::utils::error::{LifecycleError, LifecycleResult};

/// Topic carrying a freshly issued certificate to a device
pub fn certificate_topic(device_id: &str) -> String {
    format!("management/{}/crt", device_id)
}

/// Topic asking a device to submit a new CSR
pub fn csr_request_topic(device_id: &str) -> String {
    format!("management/{}/csr_req", device_id)
}

/// Best-effort publish to a pub/sub broker
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> LifecycleResult<()>;
}

/// Broker reached through an HTTP data-plane endpoint:
/// `POST {url}/topics/{topic}?qos={qos}` with the raw payload as body
#[derive(Clone)]
pub struct HttpBroker {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    qos: u8,
}

impl HttpBroker {
    pub fn new(config: &BrokerConfig) -> LifecycleResult<Self> {
        if config.endpoint.url.trim().is_empty() {
            return Err(LifecycleError::Configuration(
                "broker.url is not configured".to_string(),
            ));
        }
        if config.qos > 1 {
            return Err(LifecycleError::Configuration(format!(
                "broker.qos must be 0 or 1, got {}",
                config.qos
            )));
        }
        Ok(Self {
            client: http::build_client(&config.endpoint)?,
            base_url: http::base_url(&config.endpoint),
            api_token: config.endpoint.api_token.clone(),
            qos: config.qos,
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, urlencoding::encode(topic))
    }
}

#[async_trait]
impl MessageBroker for HttpBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> LifecycleResult<()> {
        let url = self.topic_url(topic);

        let response = http::with_auth(self.client.post(&url), self.api_token.as_deref())
            .query(&[("qos", self.qos.to_string())])
            .body(payload)
            .send()
            .await
            .map_err(|e| LifecycleError::Broker(format!("Broker error: {}", e)))?;

        match response.status() {
            status if status.is_success() => {
                debug!(topic = %topic, "Message published");
                Ok(())
            }
            StatusCode::FORBIDDEN => Err(LifecycleError::Broker(format!(
                "Publish to {} not allowed",
                topic
            ))),
            status => Err(LifecycleError::Broker(format!(
                "Broker returned status: {}",
                status
            ))),
        }
    }
}
