//! `GceClient` against an in-process mock of the Compute Engine REST API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use mc_bot::compute::auth::StaticToken;
use mc_bot::compute::gce::GceClient;
use mc_bot::compute::{ComputeApi, InstanceSpec, InstanceStatus, OperationStatus};
use mc_bot::config::Config;
use mc_bot::error::BotError;
use mc_bot::waiter::OperationWaiter;

const ZONE_PATH: &str = "/compute/v1/projects/{project}/zones/{zone}";

#[derive(Clone, Default)]
struct MockState {
    authorization: Arc<Mutex<Vec<String>>>,
    inserted: Arc<Mutex<Option<Value>>>,
    operation_polls: Arc<AtomicU32>,
}

impl MockState {
    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.authorization.lock().unwrap().push(value);
    }
}

async fn get_instance(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path((_project, _zone, name)): Path<(String, String, String)>,
) -> (StatusCode, Json<Value>) {
    state.record_auth(&headers);
    match name.as_str() {
        "mc-server" => (
            StatusCode::OK,
            Json(json!({"id": "7031", "name": "mc-server", "status": "RUNNING", "zone": "us-west1-b"})),
        ),
        "locked" => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": {"code": 403, "message": "Required 'compute.instances.get' permission"}})),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": 404, "message": "The resource was not found"}})),
        ),
    }
}

async fn insert_instance(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record_auth(&headers);
    *state.inserted.lock().unwrap() = Some(body);
    Json(json!({"name": "operation-insert", "status": "PENDING", "targetId": "7031"}))
}

async fn stop_instance(
    State(state): State<MockState>,
    headers: HeaderMap,
    Path((_project, _zone, _name)): Path<(String, String, String)>,
) -> Json<Value> {
    state.record_auth(&headers);
    Json(json!({"name": "operation-stop", "status": "RUNNING"}))
}

async fn get_operation(
    State(state): State<MockState>,
    Path((_project, _zone, name)): Path<(String, String, String)>,
) -> Json<Value> {
    if name == "operation-broken" {
        return Json(json!({
            "name": name,
            "status": "DONE",
            "error": {"errors": [
                {"code": "QUOTA_EXCEEDED", "message": "Quota 'CPUS' exceeded"},
                {"code": "RESOURCE_NOT_READY"}
            ]}
        }));
    }

    let polls = state.operation_polls.fetch_add(1, Ordering::SeqCst) + 1;
    let status = if polls < 3 { "RUNNING" } else { "DONE" };
    Json(json!({"name": name, "status": status}))
}

async fn spawn_mock() -> (String, MockState) {
    let state = MockState::default();
    let app = Router::new()
        .route(&format!("{ZONE_PATH}/instances/{{name}}"), get(get_instance))
        .route(&format!("{ZONE_PATH}/instances"), post(insert_instance))
        .route(&format!("{ZONE_PATH}/instances/{{name}}/stop"), post(stop_instance))
        .route(&format!("{ZONE_PATH}/operations/{{name}}"), get(get_operation))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/compute/v1"), state)
}

fn client(base_url: &str) -> GceClient {
    GceClient::new(
        reqwest::Client::new(),
        base_url,
        "mc-server-316300",
        "us-west1-b",
        Arc::new(StaticToken("test-token".to_string())),
    )
}

#[tokio::test]
async fn existing_instance_is_read_with_bearer_token() {
    let (base_url, state) = spawn_mock().await;

    let instance = client(&base_url).get_instance("mc-server").await.unwrap();

    let instance = instance.expect("instance exists");
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.id, "7031");
    assert_eq!(
        state.authorization.lock().unwrap().as_slice(),
        ["Bearer test-token"]
    );
}

#[tokio::test]
async fn missing_instance_is_none() {
    let (base_url, _) = spawn_mock().await;

    let instance = client(&base_url).get_instance("nobody").await.unwrap();

    assert!(instance.is_none());
}

#[tokio::test]
async fn provider_error_carries_google_message() {
    let (base_url, _) = spawn_mock().await;

    let err = client(&base_url).get_instance("locked").await.unwrap_err();

    match err {
        BotError::Provider { status, message } => {
            assert_eq!(status, 403);
            assert_eq!(message, "Required 'compute.instances.get' permission");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn insert_sends_instance_shape() {
    let (base_url, state) = spawn_mock().await;
    let spec = InstanceSpec::from_config(&Config::default());

    let operation = client(&base_url).insert_instance(&spec).await.unwrap();

    assert_eq!(operation.name, "operation-insert");
    assert_eq!(operation.status, OperationStatus::Pending);
    assert_eq!(operation.target_id.as_deref(), Some("7031"));

    let body = state.inserted.lock().unwrap().clone().unwrap();
    assert_eq!(body["name"], "mc-server");
    assert_eq!(body["machineType"], "zones/us-west1-b/machineTypes/e2-standard-2");
    assert_eq!(body["disks"][0]["initializeParams"]["diskName"], "my-root-pd");
}

#[tokio::test]
async fn stop_operation_is_waited_to_completion() {
    let (base_url, state) = spawn_mock().await;
    let client = client(&base_url);
    let waiter = OperationWaiter::new(Duration::from_millis(10), Some(50));

    let operation = client.stop_instance("mc-server").await.unwrap();
    let done = waiter.wait(&client, &operation).await.unwrap();

    assert!(done.is_done());
    assert_eq!(state.operation_polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn finished_operation_errors_fail_the_wait() {
    let (base_url, _) = spawn_mock().await;
    let client = client(&base_url);
    let waiter = OperationWaiter::new(Duration::from_millis(10), Some(50));

    let pending = mc_bot::compute::Operation {
        name: "operation-broken".to_string(),
        status: OperationStatus::Running,
        target_id: None,
        errors: Vec::new(),
    };
    let err = waiter.wait(&client, &pending).await.unwrap_err();

    assert_eq!(
        err.to_string(),
        "operation failed with error(s): Quota 'CPUS' exceeded, RESOURCE_NOT_READY"
    );
}
