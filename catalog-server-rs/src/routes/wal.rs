use crate::error::AppError;
use crate::routes::backups::run_delete;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use backup_catalog::wal::PruneReport;
use backup_catalog::DeleteRequest;
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route("/api/instances/{instance}/wal/prune", post(prune_wal))
}

#[derive(Deserialize)]
pub struct PruneQuery {
    #[serde(default)]
    pub dry_run: bool,
}

async fn prune_wal(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
    Query(query): Query<PruneQuery>,
) -> Result<(StatusCode, Json<PruneReport>), AppError> {
    let request = DeleteRequest::wal_only().with_dry_run(query.dry_run);
    let (status, Json(report)) = run_delete(&state, &instance, request).await?;
    let prune = report
        .prune
        .ok_or_else(|| anyhow::anyhow!("WAL-only request produced no prune report"))?;
    Ok((status, Json(prune)))
}
