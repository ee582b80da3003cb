use crate::error::AppError;
use crate::services::restore::{RestoreError, RestoreRequest};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/restore-targets", get(list_targets))
        .route("/restore-backup", post(restore_backup))
}

async fn list_targets(State(state): State<Arc<AppState>>) -> Result<Json<serde_json::Value>, AppError> {
    let registry = state.restores.registry().await?;
    Ok(Json(json!({
        "status": "success",
        "targets": registry.views(),
    })))
}

#[derive(Deserialize)]
struct RestoreBody {
    filename: Option<String>,
    target_index: Option<i64>,
    database_name: Option<String>,
}

impl RestoreBody {
    fn into_request(self) -> Result<RestoreRequest, RestoreError> {
        Ok(RestoreRequest {
            filename: self.filename.ok_or(RestoreError::MissingField("filename"))?,
            target_index: self.target_index.ok_or(RestoreError::MissingField("target_index"))?,
            database_name: self
                .database_name
                .ok_or(RestoreError::MissingField("database_name"))?,
        })
    }
}

/// Destructive: the destination database is dropped before the replay.
async fn restore_backup(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RestoreBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(body) = payload?;
    let request = body.into_request()?;
    tracing::info!(
        file = %request.filename,
        target_index = request.target_index,
        database = %request.database_name,
        "Restore requested"
    );

    let report = state.try_restore(&request).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!(
            "Backup {} restored to {} on {}",
            report.filename, report.database, report.target
        ),
        "report": report,
    })))
}
