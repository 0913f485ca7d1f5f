//! HTTP API routes.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sandbox::executor::SandboxRunner;
use crate::sandbox::outcome::{Classification, ExecutionOutcome};

/// Crate version reported by the version endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const MISSING_SCRIPT: &str = "Missing \"script\" field";

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<SandboxRunner>,
}

impl AppState {
    pub fn new(runner: SandboxRunner) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }
}

/// Prefix for every route, derived from the crate's major version.
pub fn api_prefix() -> String {
    format!("/api/v{}", env!("CARGO_PKG_VERSION_MAJOR"))
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let prefix = api_prefix();
    Router::new()
        .route(&format!("{prefix}/execute"), post(execute))
        .route(&format!("{prefix}/version"), get(version))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(request: Request, next: Next) -> Response {
    tracing::info!(
        target: "sandbox::request",
        method = %request.method(),
        path = %request.uri().path(),
        "request received"
    );
    next.run(request).await
}

// ============ Version ============

#[derive(Debug, Serialize)]
struct VersionResponse {
    version: &'static str,
}

async fn version() -> impl IntoResponse {
    Json(VersionResponse { version: VERSION })
}

// ============ Execution ============

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    script: Option<String>,
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    result: Map<String, Value>,
    stdout: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            stdout: None,
        }
    }
}

async fn execute(
    State(state): State<AppState>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let script = match body {
        Ok(Json(ExecuteRequest { script: Some(script) })) => script,
        Ok(_) => return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(MISSING_SCRIPT))).into_response(),
        Err(rejection) => {
            tracing::debug!(target: "sandbox::request", error = %rejection, "unreadable request body");
            return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(MISSING_SCRIPT))).into_response();
        }
    };

    outcome_response(state.runner.execute(&script).await)
}

/// Status code for each classification.
pub fn status_for(classification: Classification) -> StatusCode {
    match classification {
        Classification::Success => StatusCode::OK,
        Classification::Timeout => StatusCode::REQUEST_TIMEOUT,
        Classification::SystemError => StatusCode::INTERNAL_SERVER_ERROR,
        Classification::ValidationRejected
        | Classification::NonZeroExit
        | Classification::ResultMissing
        | Classification::SerializationError
        | Classification::ContentPolicyViolation => StatusCode::BAD_REQUEST,
    }
}

fn outcome_response(outcome: ExecutionOutcome) -> Response {
    let status = status_for(outcome.classification);
    let ExecutionOutcome {
        classification,
        result,
        stdout,
        message,
        ..
    } = outcome;

    match (classification, result) {
        (Classification::Success, Some(result)) => {
            (status, Json(SuccessResponse { result, stdout })).into_response()
        }
        (Classification::SystemError, _) => {
            (status, Json(ErrorResponse::new(message.unwrap_or_default()))).into_response()
        }
        _ => {
            let body = ErrorResponse {
                error: message.unwrap_or_default(),
                stdout: Some(stdout).filter(|stdout| !stdout.is_empty()),
            };
            (status, Json(body)).into_response()
        }
    }
}
