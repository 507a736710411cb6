//! WAL retention.
//!
//! The keep-set is computed in full from the retained backups and the
//! timeline histories before a single file is touched. Everything the
//! keep-set does not cover (history files excepted) is removed, in parallel.

use crate::catalog::backup::{Backup, BackupId};
use crate::catalog::InstanceCatalog;
use crate::utils::errors::{CatalogError, Result};
use crate::wal::lsn::Lsn;
use crate::wal::segment::{SegmentNo, WalArchive, WalFile, WalFileKind, WalSegmentId};
use crate::wal::timeline::{TimelineId, TimelineInconsistency, TimelineMap};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Inclusive range of segment numbers; `end: None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentRange {
    pub start: SegmentNo,
    pub end: Option<SegmentNo>,
}

impl SegmentRange {
    pub fn starting_at(start: SegmentNo) -> Self {
        Self { start, end: None }
    }

    pub fn between(start: SegmentNo, end: SegmentNo) -> Self {
        Self {
            start: start.min(end),
            end: Some(start.max(end)),
        }
    }

    pub fn contains(&self, segno: SegmentNo) -> bool {
        segno >= self.start && self.end.map_or(true, |end| segno <= end)
    }
}

/// Segments that must survive pruning.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeepSet {
    ranges: BTreeMap<TimelineId, Vec<SegmentRange>>,
    /// Set when a timeline could not be resolved: every segment at or below
    /// it is kept on every timeline.
    floor: Option<SegmentNo>,
}

impl KeepSet {
    pub fn keep(&mut self, timeline: TimelineId, range: SegmentRange) {
        self.ranges.entry(timeline).or_default().push(range);
    }

    pub fn keep_up_to(&mut self, segno: SegmentNo) {
        self.floor = Some(self.floor.map_or(segno, |floor| floor.max(segno)));
    }

    pub fn contains(&self, segment: WalSegmentId) -> bool {
        if self.floor.is_some_and(|floor| segment.segno <= floor) {
            return true;
        }
        self.ranges
            .get(&segment.timeline)
            .is_some_and(|ranges| ranges.iter().any(|r| r.contains(segment.segno)))
    }

    pub fn ranges(&self, timeline: TimelineId) -> &[SegmentRange] {
        self.ranges.get(&timeline).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn floor(&self) -> Option<SegmentNo> {
        self.floor
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty() && self.floor.is_none()
    }
}

/// Resolve the WAL every retained backup still needs.
///
/// Each backup keeps its own timeline from its start segment on. If some
/// retained backup on an ancestor timeline started before the point where
/// history branched toward this backup, the WAL connecting the two is kept
/// as well, across every branch in between. CORRUPT stand-ins have no WAL
/// position and keep nothing.
pub fn compute_keep_set(
    backups: &[Backup],
    timelines: &TimelineMap,
    segment_size: u64,
) -> (KeepSet, Vec<TimelineInconsistency>) {
    let positions: Vec<(BackupId, TimelineId, Lsn)> = backups
        .iter()
        .filter_map(|b| b.wal_start().map(|(tli, lsn)| (b.id, tli, lsn)))
        .collect();
    let seg = |lsn: Lsn| lsn.segment_no(segment_size);

    let mut keep = KeepSet::default();
    let mut inconsistencies = Vec::new();

    for &(id, timeline, start) in &positions {
        keep.keep(timeline, SegmentRange::starting_at(seg(start)));

        let chain = match timelines.ancestry(timeline) {
            Ok(chain) => chain,
            Err(mut inconsistency) => {
                inconsistency.backup = Some(id);
                warn!(backup_id = %id, "{}; keeping all WAL up to {}", inconsistency, start);
                keep.keep_up_to(seg(start));
                inconsistencies.push(inconsistency);
                continue;
            }
        };

        for (level, branch) in chain.iter().enumerate() {
            let anchor = positions
                .iter()
                .filter(|(_, tli, lsn)| *tli == branch.parent && *lsn <= branch.switchpoint)
                .map(|&(_, _, lsn)| lsn)
                .max();
            let Some(anchor) = anchor else {
                continue;
            };

            keep.keep(timeline, SegmentRange::starting_at(seg(chain[0].switchpoint)));
            for i in 1..=level {
                keep.keep(
                    chain[i].timeline,
                    SegmentRange::between(seg(chain[i].switchpoint), seg(chain[i - 1].switchpoint)),
                );
            }
            keep.keep(branch.parent, SegmentRange::between(seg(anchor), seg(branch.switchpoint)));

            debug!(
                backup_id = %id,
                timeline,
                anchor_timeline = branch.parent,
                anchor_lsn = %anchor,
                "WAL range anchored on ancestor timeline"
            );
            break;
        }
    }

    (keep, inconsistencies)
}

/// Archive files the keep-set does not cover.
pub fn plan_prune(archive: &WalArchive, keep: &KeepSet) -> Vec<WalFile> {
    archive
        .files
        .iter()
        .filter(|file| file.kind != WalFileKind::History)
        .filter(|file| file.segment().is_some_and(|segment| !keep.contains(segment)))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct PruneOptions {
    pub dry_run: bool,
    pub parallelism: usize,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRemoval {
    pub name: String,
    pub error: String,
}

/// Outcome of one pruning pass.
///
/// `min_removed` and `max_removed` name the lowest and highest segments
/// removed (or, for a dry run, that would be removed). Both are `None` when
/// nothing was eligible.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub dry_run: bool,
    /// Segment files, including partial ones.
    pub removed: usize,
    pub markers_removed: usize,
    pub min_removed: Option<String>,
    pub max_removed: Option<String>,
    pub failed: Vec<FailedRemoval>,
    pub inconsistencies: Vec<TimelineInconsistency>,
}

impl PruneReport {
    /// Timeline inconsistencies only make pruning more conservative and do
    /// not count as failures.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn nothing_removed(&self) -> bool {
        self.removed == 0 && self.markers_removed == 0
    }

    fn tally<'a>(&mut self, files: impl IntoIterator<Item = &'a WalFile>, segment_size: u64) {
        let mut min: Option<WalSegmentId> = None;
        let mut max: Option<WalSegmentId> = None;

        for file in files {
            match file.kind {
                WalFileKind::BackupMarker => self.markers_removed += 1,
                WalFileKind::Segment | WalFileKind::Partial => {
                    self.removed += 1;
                    if let Some(segment) = file.segment() {
                        min = Some(min.map_or(segment, |m| m.min(segment)));
                        max = Some(max.map_or(segment, |m| m.max(segment)));
                    }
                }
                WalFileKind::History => {}
            }
        }

        self.min_removed = min.map(|s| s.file_name(segment_size));
        self.max_removed = max.map(|s| s.file_name(segment_size));
    }
}

/// Remove every archive file no retained backup needs.
///
/// `backups` is the retained set, normally a fresh listing of the instance.
pub async fn prune(
    instance: &InstanceCatalog,
    backups: &[Backup],
    options: &PruneOptions,
) -> Result<PruneReport> {
    let listing = instance.clone();
    let (archive, timelines) = tokio::task::spawn_blocking(move || -> Result<_> {
        let archive = listing.list_wal_files()?;
        let timelines = listing.timelines(&archive)?;
        Ok((archive, timelines))
    })
    .await??;

    let segment_size = archive.segment_size;
    let (keep, inconsistencies) = compute_keep_set(backups, &timelines, segment_size);
    let candidates = plan_prune(&archive, &keep);

    debug!(
        instance = %instance.name(),
        retained = backups.len(),
        archived = archive.files.len(),
        candidates = candidates.len(),
        "WAL keep-set resolved"
    );

    let mut report = PruneReport {
        dry_run: options.dry_run,
        inconsistencies,
        ..Default::default()
    };

    if options.dry_run {
        report.tally(&candidates, segment_size);
        log_summary(instance, &report);
        return Ok(report);
    }

    let results: Vec<(WalFile, Result<()>)> = stream::iter(candidates)
        .map(|file| {
            let instance = instance.clone();
            async move {
                let target = file.clone();
                let result = tokio::task::spawn_blocking(move || instance.remove_wal_file(&target))
                    .await
                    .map_err(CatalogError::from)
                    .and_then(|removed| removed);
                (file, result)
            }
        })
        .buffer_unordered(options.parallelism.max(1))
        .collect()
        .await;

    let mut removed = Vec::with_capacity(results.len());
    for (file, result) in results {
        match result {
            Ok(()) => removed.push(file),
            Err(e) => {
                error!(instance = %instance.name(), file = %file.name, error = %e, "Failed to remove WAL file");
                report.failed.push(FailedRemoval {
                    name: file.name,
                    error: e.to_string(),
                });
            }
        }
    }

    report.tally(&removed, segment_size);
    log_summary(instance, &report);
    Ok(report)
}

fn log_summary(instance: &InstanceCatalog, report: &PruneReport) {
    match (&report.min_removed, &report.max_removed) {
        (Some(min), Some(max)) => {
            let verb = if report.dry_run { "would remove" } else { "removed" };
            info!(instance = %instance.name(), "{} min WAL segment {}", verb, min);
            info!(instance = %instance.name(), "{} max WAL segment {}", verb, max);
            info!(
                instance = %instance.name(),
                segments = report.removed,
                markers = report.markers_removed,
                dry_run = report.dry_run,
                "WAL pruning finished"
            );
        }
        _ => info!(instance = %instance.name(), "no WAL segments eligible for removal"),
    }
}
