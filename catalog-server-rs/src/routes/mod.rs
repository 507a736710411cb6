pub mod backups;
pub mod wal;

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/instances", get(list_instances))
        .merge(backups::router(state.clone()))
        .merge(wal::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_instances(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, AppError> {
    let catalog = state.catalog()?;
    let names = tokio::task::spawn_blocking(move || catalog.list_instances())
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(names))
}
