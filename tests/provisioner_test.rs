//! HTTP provisioner against a mock provisioning service.

use std::{collections::BTreeMap, time::Duration};

use chrono::Utc;
use gumjabi::{
    models::work_item::{ClaimedItem, WorkItem},
    services::provisioner::{
        HttpProvisioner, IDEMPOTENCY_HEADER, ProvisionError, Provisioner, SIGNATURE_HEADER,
        generate_signature,
    },
};
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

const SECRET: &str = "provision-secret";

fn claimed() -> ClaimedItem {
    let mut extra = BTreeMap::new();
    extra.insert("price".to_string(), "2900".to_string());

    ClaimedItem {
        id: Uuid::new_v4(),
        item: WorkItem {
            key_id: "test-key".to_string(),
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Human".to_string(),
            external_link: "intro-course".to_string(),
            integration_id: "offer-42".to_string(),
            requested_at: Utc::now(),
            extra,
        },
        attempts: 1,
        claimed_at: Utc::now(),
    }
}

fn provisioner(server: &MockServer) -> HttpProvisioner {
    HttpProvisioner::new(
        &format!("{}/accounts", server.uri()),
        SECRET,
        Duration::from_secs(2),
    )
    .expect("valid provisioner")
}

#[tokio::test]
async fn signed_request_carries_item_and_idempotency_key() {
    let server = MockServer::start().await;
    let claimed = claimed();
    let body = serde_json::to_vec(&claimed.item).unwrap();
    let signature = generate_signature(SECRET, &body).unwrap();

    Mock::given(method("POST"))
        .and(path("/accounts"))
        .and(header("content-type", "application/json"))
        .and(header(SIGNATURE_HEADER, signature.as_str()))
        .and(header(IDEMPOTENCY_HEADER, claimed.id.to_string().as_str()))
        .and(body_json(&claimed.item))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    provisioner(&server).provision(&claimed).await.unwrap();
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let result = provisioner(&server).provision(&claimed()).await;

    match result {
        Err(ProvisionError::Transient(message)) => assert!(message.contains("503")),
        other => panic!("expected transient failure, got {other:?}"),
    }
}

#[tokio::test]
async fn throttling_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let result = provisioner(&server).provision(&claimed()).await;

    assert!(matches!(result, Err(ProvisionError::Transient(_))));
}

#[tokio::test]
async fn client_error_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown offer"))
        .mount(&server)
        .await;

    let result = provisioner(&server).provision(&claimed()).await;

    match result {
        Err(error @ ProvisionError::Permanent(_)) => {
            assert!(error.is_permanent());
            assert!(error.to_string().contains("unknown offer"));
        }
        other => panic!("expected permanent failure, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_service_times_out_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let provisioner = HttpProvisioner::new(
        &format!("{}/accounts", server.uri()),
        SECRET,
        Duration::from_millis(200),
    )
    .unwrap();

    let result = provisioner.provision(&claimed()).await;

    assert!(matches!(result, Err(ProvisionError::Transient(_))));
}

#[test]
fn plain_http_is_refused_off_localhost() {
    let result = HttpProvisioner::new(
        "http://provision.example.com/accounts",
        SECRET,
        Duration::from_secs(1),
    );

    assert!(matches!(result, Err(ProvisionError::InvalidUrl(_))));
}
