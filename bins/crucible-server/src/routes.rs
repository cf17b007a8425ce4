use axum::routing::{get, post};
use axum::Router;

use crate::{handlers, ws, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/execute/python", post(handlers::execute_python))
        .route(
            "/execute/python-project",
            post(handlers::execute_python_project),
        )
        .route(
            "/execute/python-assignment",
            post(handlers::execute_python_assignment),
        )
        .route("/execute/java", post(handlers::execute_java))
        .route("/execute/java-project", post(handlers::execute_java_project))
        .route(
            "/execute/java-assignment",
            post(handlers::execute_java_assignment),
        )
        .route("/execute/cpp", post(handlers::execute_cpp))
        .route("/execute/cpp-project", post(handlers::execute_cpp_project))
        .route(
            "/execute/cpp-assignment",
            post(handlers::execute_cpp_assignment),
        )
        .route(
            "/execute/startPythonSession",
            post(handlers::start_python_session),
        )
        .route(
            "/execute/startJavaSession",
            post(handlers::start_java_session),
        )
        .route("/ws-execute", get(ws::ws_execute))
        .route("/status", get(handlers::health_check))
}
