//! WAL coverage check for backups.
//!
//! A backup is restorable only if every segment between its start and stop
//! LSN is present on its timeline.

use crate::catalog::backup::{Backup, BackupId, BackupStatus};
use crate::wal::segment::{WalArchive, WalSegmentId};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "missing", rename_all = "snake_case")]
pub enum WalCoverage {
    Complete,
    Missing(Vec<WalSegmentId>),
    /// The backup has no usable WAL range (unfinished or corrupt).
    Unknown,
}

impl WalCoverage {
    pub fn is_complete(&self) -> bool {
        matches!(self, WalCoverage::Complete)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupCoverage {
    pub id: BackupId,
    pub status: BackupStatus,
    pub coverage: WalCoverage,
}

pub fn check_backup_wal(backup: &Backup, archive: &WalArchive) -> WalCoverage {
    let (Some((timeline, start)), Some(stop)) = (backup.wal_start(), backup.stop_lsn) else {
        return WalCoverage::Unknown;
    };

    let present = archive.complete_segments();
    let first = start.segment_no(archive.segment_size);
    let last = stop.segment_no(archive.segment_size).max(first);

    let missing: Vec<_> = (first..=last)
        .map(|segno| WalSegmentId::new(timeline, segno))
        .filter(|segment| !present.contains(segment))
        .collect();

    if missing.is_empty() {
        WalCoverage::Complete
    } else {
        WalCoverage::Missing(missing)
    }
}

/// Coverage of every listed backup, in listing order.
pub fn check_all(backups: &[Backup], archive: &WalArchive) -> Vec<BackupCoverage> {
    backups
        .iter()
        .map(|backup| BackupCoverage {
            id: backup.id,
            status: backup.status,
            coverage: check_backup_wal(backup, archive),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::backup::BackupMode;
    use crate::testing::lsn_at;
    use crate::wal::segment::{WalFile, DEFAULT_SEGMENT_SIZE};

    fn archive(timeline: u32, segnos: &[u64]) -> WalArchive {
        let files = segnos
            .iter()
            .filter_map(|&s| {
                WalFile::parse(
                    &WalSegmentId::new(timeline, s).file_name(DEFAULT_SEGMENT_SIZE),
                    DEFAULT_SEGMENT_SIZE,
                )
            })
            .collect();
        WalArchive::new(DEFAULT_SEGMENT_SIZE, files)
    }

    #[test]
    fn test_complete_and_missing() {
        let backup = Backup::new(BackupId::from_secs(100), BackupMode::Full, 1, lsn_at(3))
            .completed(lsn_at(5));

        assert_eq!(check_backup_wal(&backup, &archive(1, &[3, 4, 5])), WalCoverage::Complete);
        assert_eq!(
            check_backup_wal(&backup, &archive(1, &[3, 5])),
            WalCoverage::Missing(vec![WalSegmentId::new(1, 4)])
        );
        // Right segments, wrong timeline.
        assert!(!check_backup_wal(&backup, &archive(2, &[3, 4, 5])).is_complete());
    }

    #[test]
    fn test_unfinished_backup_is_unknown() {
        let running = Backup::new(BackupId::from_secs(100), BackupMode::Full, 1, lsn_at(3));
        assert_eq!(check_backup_wal(&running, &archive(1, &[3])), WalCoverage::Unknown);

        let stub = Backup::corrupt(BackupId::from_secs(100), None);
        assert_eq!(check_backup_wal(&stub, &archive(1, &[3])), WalCoverage::Unknown);
    }
}
