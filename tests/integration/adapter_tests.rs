//! Collaborator adapters
//!
//! HTTP adapters run against a wiremock server; the file store uses a temp dir.

use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_bytes, body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetcert::config::{BrokerConfig, EndpointConfig, RegistryConfig};
use fleetcert::models::{CertificateStatus, Principal};
use fleetcert::services::credentials::fetch_ca_credential;
use fleetcert::services::{
    DeviceRegistry, FileObjectStore, HttpBroker, HttpDeviceRegistry, HttpObjectStore,
    MessageBroker, ObjectStore, StoreCredentialProvider,
};
use fleetcert::LifecycleError;

use crate::common::*;

fn endpoint(server: &MockServer) -> EndpointConfig {
    EndpointConfig {
        url: server.uri(),
        api_token: Some("test-token".to_string()),
        ..EndpointConfig::default()
    }
}

fn registry(server: &MockServer) -> HttpDeviceRegistry {
    HttpDeviceRegistry::new(&RegistryConfig {
        endpoint: endpoint(server),
        ..RegistryConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_register_certificate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/certificate/register"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({
            "certificatePem": "-----BEGIN CERTIFICATE-----\n",
            "setAsActive": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "certificateArn": "arn:aws:iot:eu-west-1:1:cert/abc123",
            "certificateId": "abc123"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let id = registry(&server)
        .register_certificate("-----BEGIN CERTIFICATE-----\n", true)
        .await
        .unwrap();
    assert_eq!(id, "abc123");
}

#[tokio::test]
async fn test_register_conflict_is_registry_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/certificate/register"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = registry(&server)
        .register_certificate("pem", true)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Registry(_)));
}

#[tokio::test]
async fn test_attach_policy() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/target-policies/fleet-device-policy"))
        .and(body_json(json!({"target": "cert/abc123"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let principal = Principal::for_certificate("cert", "abc123");
    assert_ok!(
        registry(&server)
            .attach_policy("fleet-device-policy", &principal)
            .await
    );
}

#[tokio::test]
async fn test_update_certificate_status() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/certificates/A"))
        .and(query_param("newStatus", "REVOKED"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert_ok!(
        registry(&server)
            .update_certificate_status("A", CertificateStatus::Revoked)
            .await
    );
}

#[tokio::test]
async fn test_update_unknown_certificate() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/certificates/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert_err!(
        registry(&server)
            .update_certificate_status("missing", CertificateStatus::Revoked)
            .await
    );
}

#[tokio::test]
async fn test_list_principal_devices() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/principals/things"))
        .and(header("x-amzn-principal", "cert/X"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"things": ["dev2"]})))
        .mount(&server)
        .await;

    let devices = registry(&server)
        .list_principal_devices(&Principal::for_certificate("cert", "X"))
        .await
        .unwrap();
    assert_eq!(devices, vec!["dev2"]);
}

#[tokio::test]
async fn test_list_device_principals() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things/dev1/principals"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"principals": ["cert/A", "cert/B"], "nextToken": null})),
        )
        .mount(&server)
        .await;

    let principals = registry(&server).list_device_principals("dev1").await.unwrap();
    let ids: Vec<_> = principals
        .iter()
        .filter_map(|p| p.certificate_id("cert"))
        .collect();
    assert_eq!(ids, vec!["A", "B"]);
}

#[tokio::test]
async fn test_registry_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/things/dev1/principals"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = registry(&server)
        .list_device_principals("dev1")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Registry(_)));
}

#[tokio::test]
async fn test_broker_publish() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/topics/management%2Fdev1%2Fcrt"))
        .and(query_param("qos", "0"))
        .and(body_bytes(br#"{"certificatePem":"pem","length":3}"#.to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let broker = HttpBroker::new(&BrokerConfig {
        endpoint: endpoint(&server),
        qos: 0,
    })
    .unwrap();

    assert_ok!(
        broker
            .publish(
                "management/dev1/crt",
                br#"{"certificatePem":"pem","length":3}"#.to_vec()
            )
            .await
    );
}

#[tokio::test]
async fn test_broker_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let broker = HttpBroker::new(&BrokerConfig {
        endpoint: endpoint(&server),
        qos: 0,
    })
    .unwrap();

    let err = broker
        .publish("management/dev1/csr_req", b"{}".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Broker(_)));
}

#[tokio::test]
async fn test_http_object_store_fetches_credential() {
    let server = MockServer::start().await;
    let ca = TestCa::new("Fleet Test CA");
    Mock::given(method("GET"))
        .and(path("/fleet-ca/credentials/ca.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(ca.document_bytes()))
        .expect(1)
        .mount(&server)
        .await;

    let store = std::sync::Arc::new(HttpObjectStore::new(&endpoint(&server)).unwrap());
    let provider = StoreCredentialProvider::new(store);

    let credential = fetch_ca_credential(&provider, Some(CA_REFERENCE))
        .await
        .unwrap();
    assert_eq!(
        credential.certificate().to_der().unwrap(),
        ca.certificate.to_der().unwrap()
    );
    assert!(!format!("{:?}", credential).contains("PRIVATE KEY"));
}

#[tokio::test]
async fn test_http_object_store_missing_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = HttpObjectStore::new(&endpoint(&server)).unwrap();
    assert!(store.get_object("fleet-ca", "ca.json").await.unwrap().is_none());

    let provider = StoreCredentialProvider::new(std::sync::Arc::new(store));
    let err = fetch_ca_credential(&provider, Some(CA_REFERENCE))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::CredentialNotFound(ref o) if o == "fleet-ca/credentials/ca.json"));
}

#[tokio::test]
async fn test_http_object_store_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = HttpObjectStore::new(&endpoint(&server)).unwrap();
    let err = store.get_object("fleet-ca", "ca.json").await.unwrap_err();
    assert!(matches!(err, LifecycleError::CredentialStore(_)));
}

#[tokio::test]
async fn test_file_object_store() {
    let root = tempfile::tempdir().unwrap();
    let ca = TestCa::new("Fleet Test CA");
    let dir = root.path().join(CA_CONTAINER).join("credentials");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("ca.json"), ca.document_bytes()).unwrap();

    let store = FileObjectStore::new(root.path());
    assert!(store.get_object(CA_CONTAINER, "absent.json").await.unwrap().is_none());

    let provider = StoreCredentialProvider::new(std::sync::Arc::new(store));
    let credential = fetch_ca_credential(&provider, Some(CA_REFERENCE))
        .await
        .unwrap();
    assert!(credential.private_key().public_eq(&ca.key));
}

#[tokio::test]
async fn test_credential_with_mismatched_key_is_corrupt() {
    let root = tempfile::tempdir().unwrap();
    let ca = TestCa::new("Fleet Test CA");
    let other = TestCa::new("Other CA");
    let dir = root.path().join(CA_CONTAINER).join("credentials");
    std::fs::create_dir_all(&dir).unwrap();
    let body = json!({"caCertPem": ca.cert_pem(), "caKeyPem": other.key_pem()});
    std::fs::write(dir.join("ca.json"), serde_json::to_vec(&body).unwrap()).unwrap();

    let provider =
        StoreCredentialProvider::new(std::sync::Arc::new(FileObjectStore::new(root.path())));
    let err = fetch_ca_credential(&provider, Some(CA_REFERENCE))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::CredentialCorrupt(_)));
}
