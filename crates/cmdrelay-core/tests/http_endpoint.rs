use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use http_body_util::BodyExt;
use rstest::rstest;
use serde_json::{Value, json};
use tower::ServiceExt;

use cmdrelay_core::domain::{ExecutionResult, RelayError};
use cmdrelay_core::impls::ShellExecutor;
use cmdrelay_core::ports::CommandExecutor;
use cmdrelay_core::{AppBuilder, QueueBackend, RelayConfig};

/// Counts spawns and delegates to a real shell.
struct CountingExecutor {
    inner: ShellExecutor,
    spawns: AtomicUsize,
}

impl CountingExecutor {
    fn new() -> Self {
        Self {
            inner: ShellExecutor::new("sh"),
            spawns: AtomicUsize::new(0),
        }
    }

    fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandExecutor for CountingExecutor {
    async fn execute(
        &self,
        command: &str,
        cwd: Option<&Path>,
    ) -> Result<ExecutionResult, RelayError> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(command, cwd).await
    }
}

fn test_app(executor: Arc<CountingExecutor>) -> Router {
    let config = RelayConfig {
        queue_backend: QueueBackend::Memory,
        ..RelayConfig::default()
    };
    AppBuilder::new(config)
        .executor(executor)
        .build()
        .unwrap()
        .router()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

fn execute_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/execute")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[rstest]
#[case(r#"{}"#)]
#[case(r#"{"command":null}"#)]
#[case(r#"{"command":""}"#)]
#[case(r#"{"command":"   ","projectName":"myrepo"}"#)]
#[tokio::test]
async fn missing_command_is_400_without_spawn(#[case] body: &str) {
    let executor = Arc::new(CountingExecutor::new());
    let (status, json) = send(test_app(executor.clone()), execute_request(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({"error": "command required"}));
    assert_eq!(executor.spawns(), 0);
}

#[tokio::test]
async fn echo_hi_is_200() {
    let executor = Arc::new(CountingExecutor::new());
    let (status, json) = send(
        test_app(executor.clone()),
        execute_request(r#"{"command":"echo hi"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"success": true, "stdout": "hi\n", "stderr": ""}));
    assert_eq!(executor.spawns(), 1);
}

#[tokio::test]
async fn non_zero_exit_is_500() {
    let executor = Arc::new(CountingExecutor::new());
    let (status, json) = send(
        test_app(executor.clone()),
        execute_request(r#"{"command":"exit 3"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json, json!({"success": false, "error": ""}));
}

#[tokio::test]
async fn stderr_is_the_error() {
    let executor = Arc::new(CountingExecutor::new());
    let (status, json) = send(
        test_app(executor),
        execute_request(r#"{"command":"echo boom >&2; exit 1"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "boom\n");
}

#[tokio::test]
async fn missing_project_dir_is_500() {
    let executor = Arc::new(CountingExecutor::new());
    let (status, json) = send(
        test_app(executor),
        execute_request(r#"{"command":"pwd","projectName":"/definitely/not/here"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["success"], false);
    assert!(!json["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn health_reports_status() {
    let executor = Arc::new(CountingExecutor::new());
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(test_app(executor), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["shell"], "sh");
    assert_eq!(json["queues"]["verified"], false);
    assert_eq!(json["queues"]["consecutiveErrors"], 0);
    assert_eq!(json["queues"]["storageAccount"], "unknown");
    assert!(json["timestamp"].is_string());
    assert!(json["uptime"].is_number());
}
