// HTTP route handlers for the crucible API.

use std::future::Future;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::AppState;
use crucible_common::types::{AssignmentRequest, CodeRequest, Language, ProjectRequest};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
}

/// Run an execution under the transport wall-clock limit. A request that
/// outlives the limit is answered with 408; dropping the execution future
/// triggers the scoped workspace/container cleanup.
async fn run_with_deadline<T, F>(state: &AppState, fut: F) -> Response
where
    T: Serialize,
    F: Future<Output = Result<T, EngineError>>,
{
    let limit = Duration::from_millis(state.config.request_time_limit_ms);
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Json(value).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(_) => {
            warn!(limit_ms = state.config.request_time_limit_ms, "request exceeded time limit");
            (
                StatusCode::REQUEST_TIMEOUT,
                Json(serde_json::json!({
                    "message": "request exceeded the time limit"
                })),
            )
                .into_response()
        }
    }
}

/// POST /execute/python
pub async fn execute_python(
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_python_code(&req)).await
}

/// POST /execute/python-project
pub async fn execute_python_project(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_python_project(&req)).await
}

/// POST /execute/python-assignment
pub async fn execute_python_assignment(
    State(state): State<AppState>,
    Json(req): Json<AssignmentRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_python_assignment(&req)).await
}

/// POST /execute/java
pub async fn execute_java(
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_java_code(&req)).await
}

/// POST /execute/java-project
pub async fn execute_java_project(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_java_project(&req)).await
}

/// POST /execute/java-assignment
pub async fn execute_java_assignment(
    State(state): State<AppState>,
    Json(req): Json<AssignmentRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_java_assignment(&req)).await
}

/// POST /execute/cpp
pub async fn execute_cpp(
    State(state): State<AppState>,
    Json(req): Json<CodeRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_cpp_code(&req)).await
}

/// POST /execute/cpp-project
pub async fn execute_cpp_project(
    State(state): State<AppState>,
    Json(req): Json<ProjectRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_cpp_project(&req)).await
}

/// POST /execute/cpp-assignment
pub async fn execute_cpp_assignment(
    State(state): State<AppState>,
    Json(req): Json<AssignmentRequest>,
) -> Response {
    run_with_deadline(&state, state.engine.run_cpp_assignment(&req)).await
}

/// POST /execute/startPythonSession
pub async fn start_python_session(State(state): State<AppState>) -> Response {
    start_session(state, Language::Python).await
}

/// POST /execute/startJavaSession
pub async fn start_java_session(State(state): State<AppState>) -> Response {
    start_session(state, Language::Java).await
}

async fn start_session(state: AppState, language: Language) -> Response {
    match state.sessions.create_session(language).await {
        Ok(session_id) => {
            info!(session = %session_id, %language, "interactive session started");
            Json(SessionResponse {
                session_id: session_id.to_string(),
            })
            .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// GET /status
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
