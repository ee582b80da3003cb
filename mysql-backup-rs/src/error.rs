use crate::models::RegistryError;
use crate::services::archive::ArchiveError;
use crate::services::restore::RestoreError;
use crate::services::run_lock::RunLockError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    /// A tool or filesystem step failed; the message is shown to the caller.
    #[error("{0}")]
    Execution(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            AppError::Execution(m) => {
                tracing::error!(error = %m, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };
        (status, Json(json!({ "status": "error", "message": msg }))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<ArchiveError> for AppError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::MissingName | ArchiveError::Invalid(_) => AppError::BadRequest(e.to_string()),
            ArchiveError::NotFound(_) => AppError::NotFound(e.to_string()),
            ArchiveError::Io(_) => AppError::Execution(e.to_string()),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Missing(_) => AppError::NotFound(e.to_string()),
            RegistryError::Read(_) | RegistryError::Parse(_) => AppError::Execution(e.to_string()),
        }
    }
}

impl From<RunLockError> for AppError {
    fn from(e: RunLockError) -> Self {
        AppError::Conflict(e.to_string())
    }
}

impl From<RestoreError> for AppError {
    fn from(e: RestoreError) -> Self {
        match e {
            RestoreError::MissingField(_)
            | RestoreError::InvalidDatabaseName(_)
            | RestoreError::TargetIndex { .. } => AppError::BadRequest(e.to_string()),
            RestoreError::Archive(inner) => inner.into(),
            RestoreError::Registry(inner) => inner.into(),
            RestoreError::Busy(inner) => inner.into(),
            RestoreError::Reset { .. }
            | RestoreError::Replay { .. }
            | RestoreError::Timeout { .. }
            | RestoreError::Command(_)
            | RestoreError::Io(_) => AppError::Execution(e.to_string()),
        }
    }
}
