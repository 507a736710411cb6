use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use backup_catalog::status::{self, BackupStatusRow};
use backup_catalog::{BackupId, BackupStatus, DeleteExecutor, DeleteReport, DeleteRequest};
use serde::Deserialize;
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/instances/{instance}/backups",
            get(list_backups).delete(delete_by_status),
        )
        .route(
            "/api/instances/{instance}/backups/{id}",
            get(get_backup).delete(delete_backup),
        )
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub id: Option<String>,
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub wal: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Deserialize)]
pub struct StatusDeleteQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub wal: bool,
    #[serde(default)]
    pub dry_run: bool,
}

fn parse_id(id: &str) -> Result<BackupId, AppError> {
    Ok(id.parse::<BackupId>()?)
}

async fn list_backups(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<BackupStatusRow>>, AppError> {
    let id = query.id.as_deref().map(parse_id).transpose()?;
    let instance = state.instance(&instance)?;
    let backups = tokio::task::spawn_blocking(move || instance.list_backups())
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(status::show(&backups, id)?))
}

async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path((instance, id)): Path<(String, String)>,
) -> Result<Json<BackupStatusRow>, AppError> {
    let id = parse_id(&id)?;
    let instance = state.instance(&instance)?;
    let backup = tokio::task::spawn_blocking(move || instance.load_backup(id))
        .await
        .map_err(|e| anyhow::anyhow!(e))??;
    Ok(Json(BackupStatusRow::from(&backup)))
}

async fn delete_backup(
    State(state): State<Arc<AppState>>,
    Path((instance, id)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> Result<(StatusCode, Json<DeleteReport>), AppError> {
    let request = DeleteRequest::backup(parse_id(&id)?)
        .with_wal(query.wal)
        .with_dry_run(query.dry_run);
    run_delete(&state, &instance, request).await
}

async fn delete_by_status(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
    Query(query): Query<StatusDeleteQuery>,
) -> Result<(StatusCode, Json<DeleteReport>), AppError> {
    let request = match query.status {
        Some(status) => DeleteRequest::status(status.parse::<BackupStatus>()?).with_wal(query.wal),
        None if query.wal => DeleteRequest::wal_only(),
        None => {
            return Err(AppError::BadRequest(
                "either status or wal=true is required".into(),
            ))
        }
    }
    .with_dry_run(query.dry_run);
    run_delete(&state, &instance, request).await
}

/// Run a delete request with the instance claimed for this request.
///
/// An incomplete deletion answers 500 with the full report so the caller
/// sees what was and was not removed.
pub(crate) async fn run_delete(
    state: &AppState,
    instance: &str,
    request: DeleteRequest,
) -> Result<(StatusCode, Json<DeleteReport>), AppError> {
    let catalog = state.instance(instance)?;

    let _op = state.begin_op(instance)?;
    let executor = DeleteExecutor::with_cancel(
        catalog,
        state.config.max_parallel_removals,
        state.shutdown.clone(),
    );
    let report = executor.execute(request).await?;
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        tracing::warn!(instance = %instance, "Delete request did not complete");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(report)))
}
