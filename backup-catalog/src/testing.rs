//! Catalog fixtures shared by the unit tests.

use crate::catalog::backup::{Backup, BackupId, BackupMode};
use crate::catalog::{Catalog, InstanceCatalog, InstanceConfig, DATA_DIR};
use crate::wal::lsn::Lsn;
use crate::wal::segment::{SegmentNo, WalSegmentId, DEFAULT_SEGMENT_SIZE};
use crate::wal::timeline::TimelineId;
use std::fs;
use std::ops::RangeInclusive;
use tempfile::TempDir;

/// Start time of the first fixture backup; fixtures add small offsets.
pub(crate) const BASE_SECS: u64 = 1_700_000_000;

pub(crate) const INSTANCE: &str = "node";

/// A position just past the start of segment `segno`.
pub(crate) fn lsn_at(segno: SegmentNo) -> Lsn {
    Lsn(segno * DEFAULT_SEGMENT_SIZE + 0x28)
}

pub(crate) struct TestCatalog {
    _dir: TempDir,
    pub catalog: Catalog,
    pub instance: InstanceCatalog,
}

impl TestCatalog {
    pub fn new() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let catalog = Catalog::init(dir.path())?;
        let instance = catalog.add_instance(INSTANCE, InstanceConfig::default())?;
        Ok(Self {
            _dir: dir,
            catalog,
            instance,
        })
    }

    /// Write `backup` with a small data directory.
    pub fn add_backup(&self, backup: Backup) -> anyhow::Result<BackupId> {
        self.instance.write_backup(&backup)?;
        let data = self.instance.backup_dir(backup.id).join(DATA_DIR);
        fs::create_dir_all(data.join("base/1"))?;
        fs::write(data.join("PG_VERSION"), b"16\n")?;
        fs::write(data.join("base/1/1259"), vec![0u8; 512])?;
        Ok(backup.id)
    }

    /// Completed FULL backup on timeline 1 starting in segment `start_seg`.
    pub fn add_full(&self, offset: u64, start_seg: SegmentNo) -> anyhow::Result<BackupId> {
        self.add_full_on(offset, 1, start_seg)
    }

    pub fn add_full_on(
        &self,
        offset: u64,
        timeline: TimelineId,
        start_seg: SegmentNo,
    ) -> anyhow::Result<BackupId> {
        let backup = Backup::new(id(offset), BackupMode::Full, timeline, lsn_at(start_seg))
            .completed(lsn_at(start_seg + 1));
        self.add_backup(backup)
    }

    pub fn add_incremental(
        &self,
        offset: u64,
        mode: BackupMode,
        parent: BackupId,
        start_seg: SegmentNo,
    ) -> anyhow::Result<BackupId> {
        let backup = Backup::new(id(offset), mode, 1, lsn_at(start_seg))
            .with_parent(parent)
            .completed(lsn_at(start_seg + 1));
        self.add_backup(backup)
    }

    pub fn write_segments(
        &self,
        timeline: TimelineId,
        segnos: RangeInclusive<SegmentNo>,
    ) -> anyhow::Result<()> {
        for segno in segnos {
            fs::write(self.instance.wal_dir().join(self.segment_name(timeline, segno)), b"wal")?;
        }
        Ok(())
    }

    /// History of `timeline`: one `(parent, switchpoint)` line per ancestor,
    /// oldest first.
    pub fn write_history(&self, timeline: TimelineId, entries: &[(TimelineId, Lsn)]) -> anyhow::Result<()> {
        let content: String = entries
            .iter()
            .map(|(parent, lsn)| format!("{}\t{}\tno recovery target specified\n", parent, lsn))
            .collect();
        fs::write(self.instance.wal_dir().join(format!("{:08X}.history", timeline)), content)?;
        Ok(())
    }

    pub fn segment_name(&self, timeline: TimelineId, segno: SegmentNo) -> String {
        WalSegmentId::new(timeline, segno).file_name(self.instance.segment_size())
    }

    /// Complete segments present on `timeline`, ascending.
    pub fn segments(&self, timeline: TimelineId) -> anyhow::Result<Vec<SegmentNo>> {
        let mut segnos: Vec<SegmentNo> = self
            .instance
            .list_wal_files()?
            .complete_segments()
            .into_iter()
            .filter(|s| s.timeline == timeline)
            .map(|s| s.segno)
            .collect();
        segnos.sort_unstable();
        Ok(segnos)
    }

    /// Listed backup ids, newest first.
    pub fn backup_ids(&self) -> anyhow::Result<Vec<BackupId>> {
        Ok(self.instance.list_backups()?.into_iter().map(|b| b.id).collect())
    }
}

fn id(offset: u64) -> BackupId {
    BackupId::from_secs(BASE_SECS + offset)
}
