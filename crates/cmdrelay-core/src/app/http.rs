//! HTTP surface: `POST /execute` and `GET /health`.
//!
//! Requests run concurrently with each other and with the queue worker;
//! each one spawns its own process.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::app::status::ServiceStatus;
use crate::app::workdir::WorkdirResolver;
use crate::domain::{CommandRequest, RelayError};
use crate::ports::CommandExecutor;

#[derive(Clone)]
pub struct HttpState {
    inner: Arc<HttpStateInner>,
}

struct HttpStateInner {
    executor: Arc<dyn CommandExecutor>,
    workdir: WorkdirResolver,
    status: Arc<ServiceStatus>,
    shell: String,
    storage_account: Option<String>,
}

impl HttpState {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        workdir: WorkdirResolver,
        status: Arc<ServiceStatus>,
        shell: impl Into<String>,
        storage_account: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(HttpStateInner {
                executor,
                workdir,
                status,
                shell: shell.into(),
                storage_account,
            }),
        }
    }
}

#[derive(Debug)]
enum ApiError {
    BadRequest(RelayError),
    Failed(RelayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(err) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
            }
            ApiError::Failed(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
                .into_response(),
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/health", get(health))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `listener` until `shutdown` resolves, then drain.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn execute(
    Extension(state): Extension<HttpState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    // body は自前で parse する（axum の Json rejection はプレーンテキストになるため）
    let request: CommandRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(RelayError::BadPayload(e.to_string())))?;
    let command = request.validated_command().map_err(|err| {
        warn!("rejected request without command");
        ApiError::BadRequest(err)
    })?;

    let cwd = state.inner.workdir.resolve(request.project_name.as_deref());
    info!(command, cwd = ?cwd, "executing command");

    let result = state
        .inner
        .executor
        .execute(command, cwd.as_deref())
        .await
        .map_err(|err| {
            error!(command, kind = ?err.kind(), error = %err, "command could not start");
            ApiError::Failed(err)
        })?;

    if !result.success {
        warn!(command, error = result.error_message(), "command failed");
        return Err(ApiError::Failed(RelayError::CommandFailed(
            result.error_message().to_string(),
        )));
    }

    info!(command, "command succeeded");
    Ok(Json(json!({
        "success": true,
        "stdout": result.stdout,
        "stderr": result.stderr,
    }))
    .into_response())
}

async fn health(Extension(state): Extension<HttpState>) -> impl IntoResponse {
    let inner = &state.inner;
    Json(
        inner
            .status
            .health_report(&inner.shell, inner.storage_account.as_deref()),
    )
}
