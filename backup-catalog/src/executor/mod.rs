//! Delete executor - runs a deletion plan against an instance.
//!
//! Flow: lock the instance, load the catalog, build the graph, plan, mark
//! every planned backup DELETING, remove the plan stage by stage (children
//! first, backups within a stage concurrently), then prune the WAL archive
//! over whatever is left.

use crate::catalog::backup::{Backup, BackupId, BackupStatus};
use crate::catalog::InstanceCatalog;
use crate::graph::BackupGraph;
use crate::planner::{plan_all, plan_deletion, plan_status_deletion, DeletionPlan};
use crate::utils::errors::{CatalogError, Result};
use crate::wal::pruner::{prune, PruneOptions, PruneReport};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default number of backups removed at the same time within one stage.
pub const DEFAULT_PARALLELISM: usize = 4;

/// What to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteTarget {
    /// One backup and everything that depends on it.
    Backup(BackupId),
    /// Every backup with this status, with their dependents.
    Status(BackupStatus),
    /// No backups; only prune the WAL archive.
    WalOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteRequest {
    pub target: DeleteTarget,
    /// Prune the WAL archive after deleting.
    pub wal: bool,
    pub dry_run: bool,
}

impl DeleteRequest {
    pub fn backup(id: BackupId) -> Self {
        Self {
            target: DeleteTarget::Backup(id),
            wal: false,
            dry_run: false,
        }
    }

    pub fn status(status: BackupStatus) -> Self {
        Self {
            target: DeleteTarget::Status(status),
            wal: false,
            dry_run: false,
        }
    }

    pub fn wal_only() -> Self {
        Self {
            target: DeleteTarget::WalOnly,
            wal: true,
            dry_run: false,
        }
    }

    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn prunes_wal(&self) -> bool {
        self.wal || self.target == DeleteTarget::WalOnly
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupFailure {
    pub id: BackupId,
    pub error: String,
}

/// What a delete run did. Every planned backup ends up in exactly one of
/// `removed`, `failed` or `skipped` (dry runs aside).
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub dry_run: bool,
    /// Planned backups, children first.
    pub planned: Vec<BackupId>,
    pub removed: Vec<BackupId>,
    pub failed: Vec<BackupFailure>,
    /// Not attempted: a dependent backup failed, or the run was cancelled.
    pub skipped: Vec<BackupId>,
    pub cancelled: bool,
    pub prune: Option<PruneReport>,
}

impl DeleteReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self.skipped.is_empty()
            && !self.cancelled
            && self.prune.as_ref().map_or(true, PruneReport::is_success)
    }
}

/// Tracks which planned backups may no longer be removed because something
/// that depends on them is still on disk.
struct Blocker {
    parents: HashMap<BackupId, BackupId>,
    blocked: HashSet<BackupId>,
}

impl Blocker {
    fn new(graph: &BackupGraph, plan: &DeletionPlan) -> Self {
        let parents = plan
            .order()
            .into_iter()
            .filter_map(|id| {
                let parent = graph.get(id)?.parent_backup_id?;
                plan.contains(parent).then_some((id, parent))
            })
            .collect();
        Self {
            parents,
            blocked: HashSet::new(),
        }
    }

    fn is_blocked(&self, id: BackupId) -> bool {
        self.blocked.contains(&id)
    }

    /// `id` stays on disk: its in-plan parent must stay too.
    fn keep(&mut self, id: BackupId) {
        if let Some(&parent) = self.parents.get(&id) {
            self.blocked.insert(parent);
        }
    }
}

/// Main delete executor
pub struct DeleteExecutor {
    instance: InstanceCatalog,
    parallelism: usize,
    cancel_token: CancellationToken,
}

impl DeleteExecutor {
    /// Create a new delete executor (no cancellation support)
    pub fn new(instance: InstanceCatalog, parallelism: usize) -> Self {
        Self::with_cancel(instance, parallelism, CancellationToken::new())
    }

    /// Create a new delete executor with cancellation support
    pub fn with_cancel(
        instance: InstanceCatalog,
        parallelism: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            instance,
            parallelism: parallelism.max(1),
            cancel_token,
        }
    }

    /// Execute a delete request.
    ///
    /// NotFound and InUse abort before anything is changed. Failures while
    /// removing are collected in the report instead.
    pub async fn execute(&self, request: DeleteRequest) -> Result<DeleteReport> {
        let _lock = if request.dry_run {
            None
        } else {
            Some(self.instance.lock()?)
        };

        let graph = BackupGraph::build(self.list_backups().await?);
        let plan = match request.target {
            DeleteTarget::Backup(id) => plan_deletion(&graph, Some(id))?,
            DeleteTarget::Status(status) => plan_status_deletion(&graph, status)?,
            DeleteTarget::WalOnly => plan_deletion(&graph, None)?,
        };

        info!(
            instance = %self.instance.name(),
            target = ?request.target,
            planned = plan.len(),
            stages = plan.stages().len(),
            dry_run = request.dry_run,
            "Deletion planned"
        );

        let mut report = DeleteReport {
            dry_run: request.dry_run,
            planned: plan.order(),
            ..Default::default()
        };

        if request.dry_run {
            if request.prunes_wal() {
                let retained: Vec<Backup> = graph
                    .backups()
                    .iter()
                    .filter(|b| !plan.contains(b.id))
                    .cloned()
                    .collect();
                report.prune = Some(self.prune(&retained, true).await?);
            }
            return Ok(report);
        }

        self.remove_plan(&graph, &plan, &mut report).await?;

        if request.prunes_wal() {
            if report.cancelled {
                warn!(instance = %self.instance.name(), "Deletion cancelled, WAL pruning skipped");
            } else {
                let retained = self.list_backups().await?;
                report.prune = Some(self.prune(&retained, false).await?);
            }
        }

        Ok(report)
    }

    /// Delete every backup and the whole WAL archive of the instance, then
    /// the instance itself.
    ///
    /// The instance directories stay if any backup could not be removed.
    pub async fn delete_instance(&self) -> Result<DeleteReport> {
        let _lock = self.instance.lock()?;

        let graph = BackupGraph::build(self.list_backups().await?);
        let plan = plan_all(&graph)?;
        info!(instance = %self.instance.name(), backups = plan.len(), "Deleting instance");

        let mut report = DeleteReport {
            planned: plan.order(),
            ..Default::default()
        };
        self.remove_plan(&graph, &plan, &mut report).await?;
        if !report.is_success() {
            warn!(instance = %self.instance.name(), "Instance kept: not every backup was removed");
            return Ok(report);
        }

        report.prune = Some(self.prune(&[], false).await?);
        if report.is_success() {
            let instance = self.instance.clone();
            tokio::task::spawn_blocking(move || instance.remove_directories()).await??;
            info!(instance = %self.instance.name(), "Instance deleted");
        }
        Ok(report)
    }

    async fn list_backups(&self) -> Result<Vec<Backup>> {
        let instance = self.instance.clone();
        tokio::task::spawn_blocking(move || instance.list_backups()).await?
    }

    async fn prune(&self, retained: &[Backup], dry_run: bool) -> Result<PruneReport> {
        let options = PruneOptions {
            dry_run,
            parallelism: self.parallelism,
        };
        prune(&self.instance, retained, &options).await
    }

    async fn remove_plan(
        &self,
        graph: &BackupGraph,
        plan: &DeletionPlan,
        report: &mut DeleteReport,
    ) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }
        if self.cancel_token.is_cancelled() {
            info!(instance = %self.instance.name(), "Deletion cancelled before start");
            report.cancelled = true;
            report.skipped = plan.order();
            return Ok(());
        }

        let mut blocker = Blocker::new(graph, plan);

        // Mark first, so an interrupted run leaves visibly half-deleted
        // backups behind.
        let stubs: HashSet<BackupId> = graph
            .backups()
            .iter()
            .filter(|b| b.is_stub())
            .map(|b| b.id)
            .collect();
        let to_mark: Vec<BackupId> = plan.order().into_iter().filter(|id| !stubs.contains(id)).collect();
        let instance = self.instance.clone();
        let marked = tokio::task::spawn_blocking(move || {
            to_mark
                .into_iter()
                .map(|id| (id, instance.set_status(id, BackupStatus::Deleting).map(|_| ())))
                .collect::<Vec<_>>()
        })
        .await?;

        let mut failed_marks = HashSet::new();
        for (id, result) in marked {
            match result {
                Ok(()) => {}
                // Already removed by an earlier, interrupted run.
                Err(CatalogError::NotFound(_)) => {}
                Err(e) => {
                    error!(backup_id = %id, error = %e, "Failed to mark backup DELETING");
                    report.failed.push(BackupFailure {
                        id,
                        error: e.to_string(),
                    });
                    failed_marks.insert(id);
                    blocker.keep(id);
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.parallelism));

        for (index, stage) in plan.stages().iter().enumerate() {
            if self.cancel_token.is_cancelled() {
                let remaining: Vec<BackupId> = plan.stages()[index..].iter().flatten().copied().collect();
                info!(
                    instance = %self.instance.name(),
                    remaining = remaining.len(),
                    "Deletion cancelled between stages"
                );
                report.cancelled = true;
                report.skipped.extend(remaining.into_iter().filter(|id| !failed_marks.contains(id)));
                return Ok(());
            }

            let mut handles = Vec::with_capacity(stage.len());
            for &id in stage {
                if failed_marks.contains(&id) {
                    continue;
                }
                if blocker.is_blocked(id) {
                    warn!(backup_id = %id, "Skipping backup: a dependent backup could not be removed");
                    report.skipped.push(id);
                    blocker.keep(id);
                    continue;
                }

                let sem = Arc::clone(&semaphore);
                let instance = self.instance.clone();
                let handle = tokio::spawn(async move {
                    let _permit = sem.acquire_owned().await.map_err(|e| {
                        CatalogError::Io(std::io::Error::new(
                            std::io::ErrorKind::Other,
                            format!("Semaphore closed: {}", e),
                        ))
                    })?;
                    let stats = tokio::task::spawn_blocking(move || instance.remove_backup(id)).await??;
                    Ok::<_, CatalogError>(stats)
                });
                handles.push((id, handle));
            }

            for (id, handle) in handles {
                let result = handle.await.map_err(CatalogError::from).and_then(|r| r);
                match result {
                    Ok(stats) => {
                        info!(
                            backup_id = %id,
                            files = stats.files,
                            bytes = stats.bytes,
                            "Backup removed"
                        );
                        report.removed.push(id);
                    }
                    Err(e) => {
                        error!(backup_id = %id, error = %e, "Failed to remove backup");
                        report.failed.push(BackupFailure {
                            id,
                            error: e.to_string(),
                        });
                        blocker.keep(id);
                    }
                }
            }
        }

        info!(
            instance = %self.instance.name(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Deletion finished"
        );
        Ok(())
    }
}
