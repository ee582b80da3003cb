use crate::error::AppError;
use crate::state::AppState;
use crate::utils::logger;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_LOG_LINES: usize = 50;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/logs", get(recent_logs))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Local::now().to_rfc3339(),
    }))
}

#[derive(Deserialize)]
struct LogsQuery {
    lines: Option<usize>,
}

async fn recent_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(path) = &state.config.log.file else {
        return Ok(Json(json!({ "logs": [] })));
    };
    let lines = logger::tail(path, query.lines.unwrap_or(DEFAULT_LOG_LINES))
        .await
        .map_err(|e| AppError::Execution(format!("Failed to read log file: {e}")))?;
    Ok(Json(json!({ "logs": lines })))
}
