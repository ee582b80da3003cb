pub mod backups;
pub mod logs;
pub mod restore;

use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = backups::router()
        .merge(restore::router())
        .merge(logs::router());

    Router::new()
        .route("/health", get(logs::health))
        .nest("/api", api)
        .route("/ws", get(crate::ws::ui::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
