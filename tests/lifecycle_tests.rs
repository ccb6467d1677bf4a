use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::put,
};
use clay_stack_init::StackInitError;
use clay_stack_init::handlers::handle_request;
use clay_stack_init::handlers::lifecycle::DEADLINE_MARGIN;
use clay_stack_init::service::{DatabaseProvisioner, Provisioned, Provisioner, ResponseSender};
use clay_stack_init::types::CustomResourceRequest;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use url::Url;

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(10)
}

#[derive(Clone, Default)]
struct ResponseEndpoint {
    statuses: Arc<Mutex<VecDeque<StatusCode>>>,
    attempts: Arc<AtomicUsize>,
    accepted: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

impl ResponseEndpoint {
    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn single_body(&self) -> (HeaderMap, Value) {
        let accepted = self.accepted.lock().unwrap();
        assert_eq!(accepted.len(), 1, "expected exactly one delivered response");
        accepted[0].clone()
    }
}

async fn put_response(
    State(endpoint): State<ResponseEndpoint>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    endpoint.attempts.fetch_add(1, Ordering::SeqCst);
    let status = endpoint
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::OK);
    if status.is_success() {
        let json: Value = serde_json::from_slice(&body).expect("response body was not JSON");
        endpoint.accepted.lock().unwrap().push((headers, json));
    }
    status
}

/// Local stand-in for the pre-signed S3 response URL. `statuses` are
/// returned in order before falling back to 200.
async fn spawn_response_endpoint(statuses: Vec<StatusCode>) -> (Url, ResponseEndpoint) {
    let endpoint = ResponseEndpoint {
        statuses: Arc::new(Mutex::new(statuses.into())),
        ..Default::default()
    };
    let app = Router::new()
        .route("/response", put(put_response))
        .with_state(endpoint.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind response endpoint");
    let addr = listener.local_addr().expect("listener has no address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("response endpoint failed");
    });

    let url = Url::parse(&format!("http://{addr}/response?X-Amz-Signature=abc"))
        .expect("invalid endpoint url");
    (url, endpoint)
}

fn request(request_type: &str, response_url: &Url, extra: Value) -> CustomResourceRequest {
    let mut event = json!({
        "RequestType": request_type,
        "ServiceToken": "arn:aws:lambda:us-east-1:123456789012:function:stack-init",
        "ResponseURL": response_url.as_str(),
        "StackId": "arn:aws:cloudformation:us-east-1:123456789012:stack/app/1",
        "RequestId": "5d478078-13e9-baf0-464a-7ef285ecc786",
        "LogicalResourceId": "InitDatabase",
        "ResourceType": "Custom::DatabaseInit",
        "ResourceProperties": {}
    });
    if let (Some(event), Some(extra)) = (event.as_object_mut(), extra.as_object()) {
        event.extend(extra.clone());
    }
    serde_json::from_value(event).expect("invalid custom resource event")
}

fn sender() -> ResponseSender {
    ResponseSender::new()
        .expect("failed to build response sender")
        .with_backoff(Duration::from_millis(10), Duration::from_millis(20), 3)
}

enum Behavior {
    Succeed,
    AlreadyExists,
    Hang,
}

struct FakeProvisioner {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl FakeProvisioner {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provisioner for FakeProvisioner {
    async fn provision(&self) -> Result<Provisioned, StackInitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(Provisioned {
                physical_resource_id: "appdb".to_string(),
                data: HashMap::from([("DatabaseName".to_string(), "appdb".to_string())]),
            }),
            Behavior::AlreadyExists => Err(StackInitError::DatabaseExists {
                name: "appdb".to_string(),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                unreachable!("provisioning should have been cut off by the deadline")
            }
        }
    }
}

#[tokio::test]
async fn create_reports_the_provisioned_database() {
    let (url, endpoint) = spawn_response_endpoint(vec![]).await;
    let provisioner = FakeProvisioner::new(Behavior::Succeed);

    handle_request(request("Create", &url, json!({})), deadline(), &provisioner, &sender())
        .await
        .expect("create should be acknowledged");

    assert_eq!(provisioner.calls(), 1);
    let (headers, body) = endpoint.single_body();
    assert_eq!(
        headers.get("content-type").map(|v| v.as_bytes()),
        Some(&b""[..])
    );
    assert_eq!(body["Status"], "SUCCESS");
    assert_eq!(body["PhysicalResourceId"], "appdb");
    assert_eq!(body["Data"]["DatabaseName"], "appdb");
    assert_eq!(body["RequestId"], "5d478078-13e9-baf0-464a-7ef285ecc786");
    assert_eq!(
        body["StackId"],
        "arn:aws:cloudformation:us-east-1:123456789012:stack/app/1"
    );
}

#[tokio::test]
async fn update_and_delete_never_provision() {
    let (url, endpoint) = spawn_response_endpoint(vec![]).await;
    let provisioner = FakeProvisioner::new(Behavior::Succeed);
    let odd_payload = json!({
        "PhysicalResourceId": "appdb",
        "ResourceProperties": [1, 2, 3],
        "OldResourceProperties": "not-an-object"
    });

    for request_type in ["Update", "Delete"] {
        handle_request(
            request(request_type, &url, odd_payload.clone()),
            deadline(),
            &provisioner,
            &sender(),
        )
        .await
        .expect("no-op phases always succeed");
    }

    assert_eq!(provisioner.calls(), 0);
    let accepted = endpoint.accepted.lock().unwrap();
    assert_eq!(accepted.len(), 2);
    for (_, body) in accepted.iter() {
        assert_eq!(body["Status"], "SUCCESS");
        assert_eq!(body["PhysicalResourceId"], "appdb");
        assert!(body.get("Reason").is_none());
    }
}

#[tokio::test]
async fn update_and_delete_succeed_without_configuration() {
    let (url, endpoint) = spawn_response_endpoint(vec![]).await;
    let provisioner = DatabaseProvisioner::Unconfigured("missing field `password`".to_string());

    for request_type in ["Update", "Delete"] {
        handle_request(request(request_type, &url, json!({})), deadline(), &provisioner, &sender())
            .await
            .expect("no-op phases are acknowledged without configuration");
    }

    let accepted = endpoint.accepted.lock().unwrap();
    assert_eq!(accepted.len(), 2);
    for (_, body) in accepted.iter() {
        assert_eq!(body["Status"], "SUCCESS");
        assert_eq!(body["PhysicalResourceId"], "InitDatabase");
    }
}

#[tokio::test]
async fn create_without_configuration_fails() {
    let (url, endpoint) = spawn_response_endpoint(vec![]).await;
    let provisioner = DatabaseProvisioner::Unconfigured("missing field `password`".to_string());

    handle_request(request("Create", &url, json!({})), deadline(), &provisioner, &sender())
        .await
        .expect("failure is still delivered");

    let (_, body) = endpoint.single_body();
    assert_eq!(body["Status"], "FAILED");
    assert!(body["Reason"].as_str().unwrap().contains("password"));
}

#[tokio::test]
async fn duplicate_database_is_reported_as_failure() {
    let (url, endpoint) = spawn_response_endpoint(vec![]).await;
    let provisioner = FakeProvisioner::new(Behavior::AlreadyExists);

    handle_request(request("Create", &url, json!({})), deadline(), &provisioner, &sender())
        .await
        .expect("failure is still delivered");

    assert_eq!(provisioner.calls(), 1);
    let (_, body) = endpoint.single_body();
    assert_eq!(body["Status"], "FAILED");
    assert_eq!(body["Reason"], "database \"appdb\" already exists");
    assert_eq!(body["PhysicalResourceId"], "InitDatabase");
}

#[tokio::test]
async fn unknown_request_type_fails_without_provisioning() {
    let (url, endpoint) = spawn_response_endpoint(vec![]).await;
    let provisioner = FakeProvisioner::new(Behavior::Succeed);

    handle_request(request("Rollback", &url, json!({})), deadline(), &provisioner, &sender())
        .await
        .expect("failure is still delivered");

    assert_eq!(provisioner.calls(), 0);
    let (_, body) = endpoint.single_body();
    assert_eq!(body["Status"], "FAILED");
    assert!(body["Reason"].as_str().unwrap().contains("Rollback"));
}

#[tokio::test]
async fn deadline_reports_timeout_before_provisioning_finishes() {
    let (url, endpoint) = spawn_response_endpoint(vec![]).await;
    let provisioner = FakeProvisioner::new(Behavior::Hang);

    handle_request(
        request("Create", &url, json!({})),
        Instant::now() + DEADLINE_MARGIN + Duration::from_millis(50),
        &provisioner,
        &sender(),
    )
    .await
    .expect("timeout is still delivered");

    let (_, body) = endpoint.single_body();
    assert_eq!(body["Status"], "FAILED");
    assert!(body["Reason"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn response_retries_stop_at_the_invocation_deadline() {
    let (url, endpoint) = spawn_response_endpoint(vec![StatusCode::SERVICE_UNAVAILABLE]).await;
    let provisioner = DatabaseProvisioner::Unconfigured("missing field `password`".to_string());
    // Production backoff waits at least a second between attempts.
    let sender = ResponseSender::new().expect("failed to build response sender");

    let started = Instant::now();
    let deadline = started + DEADLINE_MARGIN + Duration::from_millis(50);
    let result = handle_request(request("Create", &url, json!({})), deadline, &provisioner, &sender).await;
    let elapsed = started.elapsed();

    assert!(
        elapsed <= DEADLINE_MARGIN + Duration::from_millis(50) + Duration::from_millis(250),
        "delivery overran the deadline: {elapsed:?}"
    );
    assert!(endpoint.attempts() >= 1);
    match result {
        Ok(()) => assert_eq!(endpoint.single_body().1["Status"], "FAILED"),
        Err(e) => assert!(matches!(e, StackInitError::ResponseDeadline)),
    }
}

#[tokio::test]
async fn response_delivery_retries_server_errors() {
    let (url, endpoint) = spawn_response_endpoint(vec![
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::INTERNAL_SERVER_ERROR,
    ])
    .await;
    let provisioner = FakeProvisioner::new(Behavior::Succeed);

    handle_request(request("Delete", &url, json!({})), deadline(), &provisioner, &sender())
        .await
        .expect("third attempt should be accepted");

    assert_eq!(endpoint.attempts(), 3);
    let (_, body) = endpoint.single_body();
    assert_eq!(body["Status"], "SUCCESS");
}

#[tokio::test]
async fn response_delivery_does_not_retry_client_errors() {
    let (url, endpoint) = spawn_response_endpoint(vec![StatusCode::FORBIDDEN]).await;
    let provisioner = FakeProvisioner::new(Behavior::Succeed);

    let err = handle_request(request("Delete", &url, json!({})), deadline(), &provisioner, &sender())
        .await
        .expect_err("forbidden is final");

    assert!(matches!(
        err,
        StackInitError::ResponseStatus(code) if code == StatusCode::FORBIDDEN
    ));
    assert_eq!(endpoint.attempts(), 1);
}
