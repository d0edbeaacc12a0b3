//! Certificate lifecycle step definitions

use cucumber::{given, then, when};
use serde_json::json;

use fleetcert::models::CertificateStatus;
use fleetcert::services::csr::format_name;

use crate::common::{
    device_csr, parse_certificate, signing_event, tampered_csr, RegistryCall, TestApp,
};
use crate::features::support::TestWorld;

#[given("the CA credential object is missing")]
async fn ca_missing(world: &mut TestWorld) {
    world.ca_missing = true;
}

#[given(expr = "device {string} has a valid CSR")]
async fn valid_csr(world: &mut TestWorld, device_id: String) {
    let (csr, _) = device_csr(&device_id);
    world.csrs.insert(device_id, csr);
}

#[given(expr = "device {string} has a tampered CSR")]
async fn tampered(world: &mut TestWorld, device_id: String) {
    let csr = tampered_csr(&device_id);
    world.csrs.insert(device_id, csr);
}

#[given(expr = "device {string} is bound to certificates {string}")]
async fn bound_to(world: &mut TestWorld, device_id: String, ids: String) {
    let app = world.app().await;
    for id in ids.split(',').map(str::trim) {
        app.mocks.registry.bind(&device_id, &TestApp::principal(id));
        app.mocks.registry.set_status(id, CertificateStatus::Active);
    }
}

#[when(expr = "device {string} requests signing with register {string} and manual {string}")]
async fn request_signing(
    world: &mut TestWorld,
    device_id: String,
    register: String,
    manual: String,
) {
    let csr = world
        .csrs
        .get(&device_id)
        .cloned()
        .expect("no CSR prepared for device");
    let event = signing_event(&device_id, &csr, register == "true", manual == "true");
    world.send(event).await;
}

#[when(expr = "device {string} acknowledges certificate {string}")]
async fn acknowledge(world: &mut TestWorld, device_id: String, certificate_id: String) {
    world
        .send(json!({"clientid": device_id, "certificateId": certificate_id, "ack": true}))
        .await;
}

#[when(expr = "certificate {string} is about to expire")]
async fn expiring(world: &mut TestWorld, certificate_id: String) {
    world
        .send(json!({"certificateId": certificate_id, "refresh": true}))
        .await;
}

#[then("the invocation succeeds")]
async fn succeeds(world: &mut TestWorld) {
    assert!(
        matches!(world.last_result, Some(Ok(_))),
        "expected success, got {:?}",
        world.last_result
    );
}

#[then(expr = "the invocation fails with {string}")]
async fn fails_with(world: &mut TestWorld, kind: String) {
    match &world.last_result {
        Some(Err(actual)) => assert_eq!(actual, &kind),
        other => panic!("expected failure {}, got {:?}", kind, other),
    }
}

#[then(expr = "the response contains a certificate for subject {string}")]
async fn certificate_subject(world: &mut TestWorld, subject: String) {
    let certificate = parse_certificate(world.returned_pem());
    assert_eq!(format_name(certificate.subject_name()), subject);
}

#[then("the certificate is valid for exactly one year")]
async fn valid_one_year(world: &mut TestWorld) {
    let certificate = parse_certificate(world.returned_pem());
    let diff = certificate
        .not_before()
        .diff(certificate.not_after())
        .unwrap();
    assert_eq!((diff.days, diff.secs), (365, 0));
}

#[then(expr = "the registry received {int} calls")]
async fn registry_calls(world: &mut TestWorld, count: usize) {
    assert_eq!(world.app().await.mocks.registry.calls().len(), count);
}

#[then("the registry registered one certificate and attached the policy once")]
async fn registered_once(world: &mut TestWorld) {
    let calls = world.app().await.mocks.registry.calls();
    assert_eq!(calls.len(), 2, "calls: {:?}", calls);
    assert!(matches!(calls[0], RegistryCall::Register { active: true, .. }));
    assert!(matches!(calls[1], RegistryCall::AttachPolicy { .. }));
}

#[then(expr = "a certificate was published to {string}")]
async fn certificate_published(world: &mut TestWorld, topic: String) {
    let published = world.app().await.mocks.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, topic);
    let pem = published[0].json()["certificatePem"]
        .as_str()
        .expect("certificatePem is a string")
        .to_string();
    parse_certificate(&pem);
}

#[then(expr = "{string} was published to {string}")]
async fn payload_published(world: &mut TestWorld, payload: String, topic: String) {
    let published = world.app().await.mocks.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, topic);
    assert_eq!(published[0].payload, payload.as_bytes());
}

#[then("nothing was published")]
async fn nothing_published(world: &mut TestWorld) {
    assert!(world.app().await.mocks.broker.published().is_empty());
}

#[then(expr = "only certificate {string} was revoked")]
async fn only_revoked(world: &mut TestWorld, certificate_id: String) {
    let updates = world.app().await.mocks.registry.status_updates();
    assert_eq!(updates, vec![(certificate_id, CertificateStatus::Revoked)]);
}

#[then(expr = "certificate {string} is still active")]
async fn still_active(world: &mut TestWorld, certificate_id: String) {
    assert_eq!(
        world.app().await.mocks.registry.status(&certificate_id),
        Some(CertificateStatus::Active)
    );
}

#[then("the registry was not mutated")]
async fn registry_not_mutated(world: &mut TestWorld) {
    let app = world.app().await;
    assert!(app.mocks.registry.status_updates().is_empty());
    assert_eq!(app.mocks.registry.register_count(), 0);
}

#[then("the object store was not read")]
async fn store_not_read(world: &mut TestWorld) {
    assert_eq!(world.app().await.mocks.store.read_count(), 0);
}
