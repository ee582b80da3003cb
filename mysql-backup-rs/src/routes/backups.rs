use crate::error::AppError;
use crate::events::Event;
use crate::state::AppState;
use crate::utils::format::{format_bytes, format_local};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_LIST_LIMIT: usize = 20;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(stats))
        .route("/backups", get(list_backups))
        .route("/run-backup", post(run_backup))
        .route("/delete-backup", post(delete_backup))
        .route("/delete-multiple-backups", post(delete_multiple_backups))
}

#[derive(Serialize)]
struct StatsResponse {
    total: usize,
    last_backup: String,
    total_size: String,
    total_size_bytes: u64,
    last_status: String,
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, AppError> {
    let stats = state
        .archive
        .stats()
        .await
        .map_err(|e| AppError::Execution(format!("Failed to read backup directory: {e}")))?;
    let last_status = match state.ledger.read().await {
        Some(outcome) => serde_json::to_value(outcome.status)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "unknown".into()),
        None => "unknown".into(),
    };

    Ok(Json(StatsResponse {
        total: stats.total,
        last_backup: stats
            .last_modified
            .map(format_local)
            .unwrap_or_else(|| "N/A".into()),
        total_size: format_bytes(stats.total_size_bytes),
        total_size_bytes: stats.total_size_bytes,
        last_status,
    }))
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct BackupEntry {
    database: String,
    datetime: String,
    size: String,
    size_bytes: u64,
    path: String,
    filename: String,
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BackupEntry>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let artifacts = state
        .archive
        .list(Some(limit))
        .await
        .map_err(|e| AppError::Execution(format!("Failed to read backup directory: {e}")))?;

    let entries = artifacts
        .into_iter()
        .map(|a| BackupEntry {
            filename: a.file_name(),
            database: a.name.database.clone(),
            datetime: a.name.created_at.format("%d/%m/%Y %H:%M:%S").to_string(),
            size: format_bytes(a.size_bytes),
            size_bytes: a.size_bytes,
            path: a.path.display().to_string(),
        })
        .collect();
    Ok(Json(entries))
}

async fn run_backup(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    tracing::info!("Manual backup requested");
    let outcome = state.try_run_backup().await?;

    let message = format!(
        "{}/{} databases backed up",
        outcome.success_count, outcome.total_databases
    );
    if outcome.is_success() {
        Ok((
            StatusCode::OK,
            Json(json!({ "status": "success", "message": message, "outcome": outcome })),
        ))
    } else {
        Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": message, "outcome": outcome })),
        ))
    }
}

#[derive(Deserialize)]
struct DeleteBody {
    filename: Option<String>,
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeleteBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(body) = payload?;
    let filename = body
        .filename
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("filename is required".into()))?;

    state.archive.delete(&filename).await?;
    state.events.emit(Event::ArtifactDeleted { file: filename.clone() });

    Ok(Json(json!({
        "status": "success",
        "message": format!("Backup {filename} deleted"),
    })))
}

#[derive(Deserialize)]
struct DeleteManyBody {
    filenames: Option<Vec<String>>,
}

async fn delete_multiple_backups(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DeleteManyBody>, JsonRejection>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let Json(body) = payload?;
    let filenames = body
        .filenames
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::BadRequest("filenames must be a non-empty list".into()))?;

    let summary = state.archive.delete_many(&filenames).await;
    for file in &summary.deleted {
        state.events.emit(Event::ArtifactDeleted { file: file.clone() });
    }
    for error in &summary.errors {
        tracing::warn!(error = %error, "Failed to delete backup");
    }

    if summary.deleted.is_empty() {
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "message": "No backups were deleted",
                "deleted": 0,
                "errors": summary.errors,
            })),
        ));
    }

    let mut message = format!("{} backup(s) deleted", summary.deleted.len());
    if !summary.errors.is_empty() {
        message.push_str(&format!(", {} error(s)", summary.errors.len()));
    }
    Ok((
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "message": message,
            "deleted": summary.deleted.len(),
            "errors": summary.errors,
        })),
    ))
}
