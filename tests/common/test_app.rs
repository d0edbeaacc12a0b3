//! Test application setup utilities
//!
//! Wires an orchestrator to the in-memory mocks with a pinned clock and a
//! seeded CA credential, and exposes the HTTP router for API tests.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use fleetcert::config::{AppConfig, LedgerConfig, MultiDevicePolicy};
use fleetcert::db::{self, IssuanceRepository};
use fleetcert::services::{
    CertificateIssuer, FixedClock, LifecycleOrchestrator, OrchestratorSettings,
    StoreCredentialProvider,
};
use fleetcert::{api, AppState};

use super::fixtures::{
    fixed_now, TestCa, CA_CONTAINER, CA_KEY, CA_REFERENCE, CERT_PREFIX, POLICY_NAME,
};
use super::mocks::MockCollaborators;

/// Builder for a test orchestrator
pub struct TestAppBuilder {
    settings: OrchestratorSettings,
    ledger: bool,
    seed_ca: bool,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            settings: test_settings(),
            ledger: false,
            seed_ca: true,
        }
    }
}

impl TestAppBuilder {
    pub fn multi_device_policy(mut self, policy: MultiDevicePolicy) -> Self {
        self.settings.multi_device_policy = policy;
        self
    }

    pub fn include_length(mut self, include: bool) -> Self {
        self.settings.include_length = include;
        self
    }

    pub fn credential_ref(mut self, reference: Option<&str>) -> Self {
        self.settings.credential_ref = reference.map(str::to_string);
        self
    }

    pub fn with_ledger(mut self) -> Self {
        self.ledger = true;
        self
    }

    /// Leave the object store empty
    pub fn without_ca(mut self) -> Self {
        self.seed_ca = false;
        self
    }

    pub async fn build(self) -> TestApp {
        let mocks = MockCollaborators::default();
        let ca = TestCa::new("Fleet Test CA");
        if self.seed_ca {
            mocks
                .store
                .put(CA_CONTAINER, CA_KEY, ca.document_bytes());
        }

        let credentials = Arc::new(StoreCredentialProvider::new(mocks.store.clone()));
        let mut orchestrator = LifecycleOrchestrator::new(
            self.settings,
            credentials,
            mocks.registry.clone(),
            mocks.broker.clone(),
        )
        .with_issuer(CertificateIssuer::new(Arc::new(FixedClock(fixed_now()))));

        if self.ledger {
            let pool = db::init_pool(&LedgerConfig {
                enabled: true,
                database_url: "sqlite::memory:".to_string(),
                max_connections: 1,
            })
            .await
            .expect("Failed to initialize test ledger");
            orchestrator = orchestrator.with_ledger(IssuanceRepository::new(pool));
        }

        let orchestrator = Arc::new(orchestrator);
        let state = AppState {
            config: AppConfig::default(),
            orchestrator: orchestrator.clone(),
        };

        TestApp {
            router: api::router(state),
            orchestrator,
            mocks,
            ca,
        }
    }
}

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub mocks: MockCollaborators,
    pub ca: TestCa,
}

impl TestApp {
    /// Default harness: CA seeded, no ledger, fan-out policy
    pub async fn new() -> Self {
        TestAppBuilder::default().build().await
    }

    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    /// Principal for a certificate id under the test prefix
    pub fn principal(certificate_id: &str) -> String {
        format!("{}/{}", CERT_PREFIX, certificate_id)
    }

    /// POST a raw body to `/api/v1/events`
    pub async fn post_event(&self, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/events")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        TestResponse {
            status,
            content_type,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }
}

/// Captured HTTP response
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: String,
}

impl TestResponse {
    pub fn json<T: DeserializeOwned>(&self) -> T {
        serde_json::from_str(&self.body).expect("response body should be JSON")
    }

    pub fn assert_status(&self, expected: StatusCode) {
        assert_eq!(
            self.status, expected,
            "unexpected status, body: {}",
            self.body
        );
    }

    pub fn assert_ok(&self) {
        self.assert_status(StatusCode::OK);
    }
}

/// Settings matching the fixture constants
pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        credential_ref: Some(CA_REFERENCE.to_string()),
        policy_name: POLICY_NAME.to_string(),
        certificate_prefix: CERT_PREFIX.to_string(),
        include_length: true,
        multi_device_policy: MultiDevicePolicy::FanOut,
    }
}
