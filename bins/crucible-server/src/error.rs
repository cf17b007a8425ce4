use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Everything that can go wrong between accepting a request and producing a
/// result. Variants map onto HTTP statuses in `IntoResponse`; interactive
/// errors are additionally surfaced as `error` frames on the stream.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid base64 payload: {0}")]
    InvalidEncoding(String),

    #[error("source file '{file}' rejected: {reason}")]
    UnsafeSource { file: String, reason: String },

    #[error("bad command: {0}")]
    BadCommand(String),

    #[error("unknown session {0}")]
    SessionNotFound(Uuid),

    #[error("failed to launch container: {0}")]
    ContainerLaunch(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match self {
            EngineError::InvalidEncoding(_)
            | EngineError::UnsafeSource { .. }
            | EngineError::BadCommand(_)
            | EngineError::SessionNotFound(_) => StatusCode::BAD_REQUEST,
            EngineError::ContainerLaunch(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ErrorBody {
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_400() {
        let response = EngineError::InvalidEncoding("not base64".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = EngineError::BadCommand("missing class name".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn launch_failures_map_to_500() {
        let response = EngineError::ContainerLaunch("daemon unreachable".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
