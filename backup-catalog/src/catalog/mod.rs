//! Catalog store.
//!
//! Reads and writes backup metadata and WAL archive listings. No policy lives
//! here: the graph, planner and pruner decide, the catalog only executes.
//!
//! Layout under the catalog root:
//!
//! ```text
//! backups/<instance>/instance.toml
//! backups/<instance>/catalog.pid
//! backups/<instance>/<backup-id>/backup.control
//! backups/<instance>/<backup-id>/database/...
//! wal/<instance>/<segment files, .backup markers, .history files>
//! ```

pub mod backup;
pub mod lock;

use crate::fs::remove::{remove_contents, remove_file_if_exists, RemovalStats};
use crate::utils::errors::{CatalogError, Result};
use crate::wal::segment::{validate_segment_size, WalArchive, WalFile, DEFAULT_SEGMENT_SIZE};
use crate::wal::timeline::TimelineMap;
use backup::{Backup, BackupControl, BackupId, BackupStatus};
use chrono::{DateTime, Utc};
use lock::CatalogLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const BACKUPS_DIR: &str = "backups";
pub const WAL_DIR: &str = "wal";
pub const CONTROL_FILE: &str = "backup.control";
pub const DATA_DIR: &str = "database";
pub const INSTANCE_CONFIG_FILE: &str = "instance.toml";
pub const LOCK_FILE: &str = "catalog.pid";

/// Per-instance settings stored in `instance.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceConfig {
    /// WAL segment size in bytes
    #[serde(default = "default_segment_size")]
    pub wal_segment_size: u64,
}

fn default_segment_size() -> u64 {
    DEFAULT_SEGMENT_SIZE
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            wal_segment_size: default_segment_size(),
        }
    }
}

/// A catalog root holding any number of instances.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    /// Create the catalog directories (idempotent).
    pub fn init(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join(BACKUPS_DIR))?;
        fs::create_dir_all(root.join(WAL_DIR))?;
        info!(root = %root.display(), "Catalog initialized");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Open an existing catalog.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.join(BACKUPS_DIR).is_dir() {
            return Err(CatalogError::Config(format!(
                "{} is not a backup catalog (missing '{}' directory)",
                root.display(),
                BACKUPS_DIR
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn add_instance(&self, name: &str, config: InstanceConfig) -> Result<InstanceCatalog> {
        validate_instance_name(name)?;
        validate_segment_size(config.wal_segment_size)?;

        let backups_dir = self.root.join(BACKUPS_DIR).join(name);
        if backups_dir.exists() {
            return Err(CatalogError::Config(format!("instance '{}' already exists", name)));
        }
        fs::create_dir_all(&backups_dir)?;
        fs::create_dir_all(self.root.join(WAL_DIR).join(name))?;
        write_atomically(
            &backups_dir.join(INSTANCE_CONFIG_FILE),
            toml::to_string(&config)?.as_bytes(),
        )?;

        info!(instance = %name, segment_size = config.wal_segment_size, "Instance added");
        self.instance(name)
    }

    pub fn instance(&self, name: &str) -> Result<InstanceCatalog> {
        validate_instance_name(name)?;
        let backups_dir = self.root.join(BACKUPS_DIR).join(name);
        if !backups_dir.is_dir() {
            return Err(CatalogError::InstanceNotFound(name.to_string()));
        }

        let config = match fs::read_to_string(backups_dir.join(INSTANCE_CONFIG_FILE)) {
            Ok(content) => toml::from_str::<InstanceConfig>(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => InstanceConfig::default(),
            Err(e) => return Err(e.into()),
        };
        validate_segment_size(config.wal_segment_size)?;

        Ok(InstanceCatalog {
            name: name.to_string(),
            wal_dir: self.root.join(WAL_DIR).join(name),
            backups_dir,
            config,
            #[cfg(test)]
            failing_removals: Vec::new(),
        })
    }

    pub fn list_instances(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.root.join(BACKUPS_DIR))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_instance_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
    {
        return Err(CatalogError::InvalidValue(format!("invalid instance name '{}'", name)));
    }
    Ok(())
}

/// All backup and WAL metadata of one instance.
#[derive(Debug, Clone)]
pub struct InstanceCatalog {
    name: String,
    backups_dir: PathBuf,
    wal_dir: PathBuf,
    config: InstanceConfig,
    /// Backups whose data removal fails with an I/O error.
    #[cfg(test)]
    pub(crate) failing_removals: Vec<BackupId>,
}

impl InstanceCatalog {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn segment_size(&self) -> u64 {
        self.config.wal_segment_size
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    pub fn backup_dir(&self, id: BackupId) -> PathBuf {
        self.backups_dir.join(id.to_string())
    }

    /// Take the instance's advisory lock for a mutating operation.
    pub fn lock(&self) -> Result<CatalogLock> {
        CatalogLock::acquire(&self.backups_dir.join(LOCK_FILE))
    }

    /// Every backup of the instance, newest first.
    ///
    /// Backups whose control file is missing or unreadable are listed as
    /// CORRUPT stand-ins; they never hide their siblings.
    pub fn list_backups(&self) -> Result<Vec<Backup>> {
        let mut backups = Vec::new();

        for entry in fs::read_dir(&self.backups_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(id) = file_name.to_str().and_then(|n| n.parse::<BackupId>().ok()) else {
                debug!(dir = ?file_name, "Skipping directory that is not a backup");
                continue;
            };
            backups.push(self.read_backup(id, &entry.path()));
        }

        backups.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        Ok(backups)
    }

    /// A single backup, or a CORRUPT stand-in if its metadata is unreadable.
    pub fn load_backup(&self, id: BackupId) -> Result<Backup> {
        let dir = self.backup_dir(id);
        if !dir.is_dir() {
            return Err(CatalogError::NotFound(id));
        }
        Ok(self.read_backup(id, &dir))
    }

    fn read_backup(&self, id: BackupId, dir: &Path) -> Backup {
        let parsed = fs::read_to_string(dir.join(CONTROL_FILE))
            .map_err(CatalogError::from)
            .and_then(|content| BackupControl::parse(id, &content));

        match parsed {
            Ok(control) => Backup::from_control(id, control),
            Err(e) => {
                warn!(instance = %self.name, backup_id = %id, error = %e, "Backup metadata unreadable, listing backup as CORRUPT");
                Backup::corrupt(id, modified_time(dir))
            }
        }
    }

    /// Write a backup's control file, creating its directory if needed.
    pub fn write_backup(&self, backup: &Backup) -> Result<()> {
        let control = backup.control().ok_or_else(|| CatalogError::CorruptMetadata {
            id: backup.id,
            reason: "cannot write metadata for a backup without readable control data".to_string(),
        })?;

        let dir = self.backup_dir(backup.id);
        fs::create_dir_all(&dir)?;
        write_atomically(&dir.join(CONTROL_FILE), control.to_toml()?.as_bytes())?;
        Ok(())
    }

    /// Rewrite only the status of a backup.
    pub fn set_status(&self, id: BackupId, status: BackupStatus) -> Result<Backup> {
        let mut backup = self.load_backup(id)?;
        if backup.is_stub() {
            return Err(CatalogError::CorruptMetadata {
                id,
                reason: "status of a backup with unreadable metadata cannot be changed".to_string(),
            });
        }
        let previous = backup.status;
        backup.status = status;
        self.write_backup(&backup)?;
        debug!(instance = %self.name, backup_id = %id, from = %previous, to = %status, "Backup status changed");
        Ok(backup)
    }

    /// Remove a backup's data, then its control file, then its directory.
    ///
    /// If the data cannot be removed the control file stays, so the backup
    /// remains listed and a later run can finish the job. A backup that is
    /// already gone counts as removed.
    pub fn remove_backup(&self, id: BackupId) -> Result<RemovalStats> {
        let dir = self.backup_dir(id);
        if !dir.exists() {
            debug!(instance = %self.name, backup_id = %id, "Backup directory already removed");
            return Ok(RemovalStats::default());
        }

        #[cfg(test)]
        if self.failing_removals.contains(&id) {
            return Err(CatalogError::PartialIo {
                path: dir.join(DATA_DIR),
                source: std::io::Error::new(ErrorKind::PermissionDenied, "Permission denied"),
            });
        }

        let stats = remove_contents(&dir, &[CONTROL_FILE])?;

        let control = dir.join(CONTROL_FILE);
        remove_file_if_exists(&control)
            .map_err(|source| CatalogError::PartialIo { path: control, source })?;
        match fs::remove_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(CatalogError::PartialIo { path: dir, source }),
        }

        Ok(stats)
    }

    /// Every file the WAL archive owns.
    pub fn list_wal_files(&self) -> Result<WalArchive> {
        let segment_size = self.segment_size();
        let entries = match fs::read_dir(&self.wal_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(WalArchive::new(segment_size, Vec::new()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(|n| WalFile::parse(n, segment_size)) {
                Some(file) => files.push(file),
                None => debug!(file = ?name, "Ignoring file not owned by the WAL archive"),
            }
        }

        Ok(WalArchive::new(segment_size, files))
    }

    /// Remove one archive file. A file that is already gone counts as removed.
    pub fn remove_wal_file(&self, file: &WalFile) -> Result<()> {
        let path = self.wal_dir.join(&file.name);
        remove_file_if_exists(&path).map_err(|source| CatalogError::PartialIo { path, source })?;
        Ok(())
    }

    /// Parent links of every timeline with a readable history file.
    ///
    /// Unreadable history files are skipped; the pruner then sees that
    /// timeline's branch point as missing and stays conservative.
    pub fn timelines(&self, archive: &WalArchive) -> Result<TimelineMap> {
        let mut map = TimelineMap::new();
        for file in archive.histories() {
            let content = match fs::read_to_string(self.wal_dir.join(&file.name)) {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %file.name, error = %e, "Cannot read timeline history");
                    continue;
                }
            };
            match TimelineMap::parse_history(file.timeline, &content) {
                Ok(Some(branch)) => map.insert(branch),
                Ok(None) => warn!(file = %file.name, "Timeline history has no entries"),
                Err(e) => warn!(file = %file.name, error = %e, "Malformed timeline history"),
            }
        }
        Ok(map)
    }

    /// Remove the instance's WAL archive and backup directory.
    ///
    /// Callers remove the backups first; this only clears what is left.
    pub(crate) fn remove_directories(&self) -> Result<()> {
        for dir in [&self.wal_dir, &self.backups_dir] {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CatalogError::PartialIo {
                        path: dir.clone(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Write through a temporary file and rename, so readers never see a
/// half-written file.
fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::backup::BackupMode;
    use crate::testing::{lsn_at, TestCatalog};

    #[test]
    fn test_open_requires_initialized_root() -> anyhow::Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        assert!(matches!(Catalog::open(temp_dir.path()), Err(CatalogError::Config(_))));

        Catalog::init(temp_dir.path())?;
        let catalog = Catalog::open(temp_dir.path())?;
        assert!(catalog.list_instances()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_add_instance_persists_config() -> anyhow::Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let catalog = Catalog::init(temp_dir.path())?;

        let config = InstanceConfig {
            wal_segment_size: 64 * 1024 * 1024,
        };
        catalog.add_instance("node", config.clone())?;
        assert!(catalog.add_instance("node", config.clone()).is_err());
        assert!(catalog
            .add_instance("bad", InstanceConfig { wal_segment_size: 1000 })
            .is_err());

        assert_eq!(catalog.instance("node")?.config(), &config);
        assert_eq!(catalog.list_instances()?, vec!["node".to_string()]);
        assert!(matches!(
            catalog.instance("missing"),
            Err(CatalogError::InstanceNotFound(_))
        ));
        assert!(catalog.instance("../node").is_err());
        Ok(())
    }

    #[test]
    fn test_list_backups_newest_first() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        let f1 = t.add_full(1, 2)?;
        let f2 = t.add_full(2, 4)?;
        let p1 = t.add_incremental(3, BackupMode::Page, f1, 6)?;

        let ids: Vec<_> = t.instance.list_backups()?.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![p1, f2, f1]);
        Ok(())
    }

    #[test]
    fn test_corrupt_control_file_is_listed_as_stub() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        let f1 = t.add_full(1, 2)?;
        let d1 = t.add_incremental(2, BackupMode::Delta, f1, 4)?;
        let d2 = t.add_incremental(3, BackupMode::Delta, d1, 6)?;

        fs::write(t.instance.backup_dir(d2).join(CONTROL_FILE), b"")?;
        fs::write(t.instance.backup_dir(d1).join(CONTROL_FILE), b"status = [")?;

        let backups = t.instance.list_backups()?;
        assert_eq!(backups.len(), 3);
        let stub = backups.iter().find(|b| b.id == d2).unwrap();
        assert_eq!(stub.status, BackupStatus::Corrupt);
        assert!(stub.is_stub());
        assert_eq!(t.instance.load_backup(d1)?.status, BackupStatus::Corrupt);
        assert_eq!(t.instance.load_backup(f1)?.status, BackupStatus::Ok);
        Ok(())
    }

    #[test]
    fn test_missing_control_file_is_listed_as_stub() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        let f1 = t.add_full(1, 2)?;
        fs::remove_file(t.instance.backup_dir(f1).join(CONTROL_FILE))?;

        let backups = t.instance.list_backups()?;
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].status, BackupStatus::Corrupt);
        Ok(())
    }

    #[test]
    fn test_non_backup_entries_are_ignored() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        t.add_full(1, 2)?;
        fs::create_dir(t.instance.backups_dir().join("lost+found"))?;

        assert_eq!(t.instance.list_backups()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_load_backup_not_found() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        let missing = BackupId::from_secs(42);
        assert!(matches!(t.instance.load_backup(missing), Err(CatalogError::NotFound(id)) if id == missing));
        Ok(())
    }

    #[test]
    fn test_set_status() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        let f1 = t.add_full(1, 2)?;

        t.instance.set_status(f1, BackupStatus::Error)?;
        assert_eq!(t.instance.load_backup(f1)?.status, BackupStatus::Error);

        fs::write(t.instance.backup_dir(f1).join(CONTROL_FILE), b"")?;
        assert!(matches!(
            t.instance.set_status(f1, BackupStatus::Ok),
            Err(CatalogError::CorruptMetadata { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_remove_backup_removes_subtree() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        let f1 = t.add_full(1, 2)?;
        let f2 = t.add_full(2, 4)?;

        let stats = t.instance.remove_backup(f1)?;
        assert!(stats.files > 0);
        assert!(!t.instance.backup_dir(f1).exists());
        assert_eq!(t.instance.list_backups()?.len(), 1);
        assert!(t.instance.backup_dir(f2).join(DATA_DIR).exists());

        // Already gone: still fine.
        assert_eq!(t.instance.remove_backup(f1)?, RemovalStats::default());
        Ok(())
    }

    #[test]
    fn test_failed_data_removal_keeps_record() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        let f1 = t.add_full(1, 2)?;
        let mut instance = t.instance.clone();
        instance.failing_removals.push(f1);

        assert!(matches!(
            instance.remove_backup(f1),
            Err(CatalogError::PartialIo { .. })
        ));
        assert!(instance.backup_dir(f1).join(CONTROL_FILE).exists());
        assert_eq!(instance.load_backup(f1)?.status, BackupStatus::Ok);
        Ok(())
    }

    #[test]
    fn test_wal_listing_and_removal() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        t.write_segments(1, 1..=3)?;
        t.write_history(2, &[(1, lsn_at(2))])?;
        fs::write(t.instance.wal_dir().join("000000010000000000000004.tmp"), b"")?;

        let archive = t.instance.list_wal_files()?;
        assert_eq!(archive.segment_count(), 3);
        assert_eq!(archive.histories().count(), 1);

        let timelines = t.instance.timelines(&archive)?;
        assert_eq!(timelines.branch(2).map(|b| b.parent), Some(1));

        let first = archive.files[0].clone();
        t.instance.remove_wal_file(&first)?;
        t.instance.remove_wal_file(&first)?;
        assert_eq!(t.instance.list_wal_files()?.segment_count(), 2);
        Ok(())
    }

    #[test]
    fn test_backup_with_unreadable_history_still_lists_timelines() -> anyhow::Result<()> {
        let t = TestCatalog::new()?;
        fs::write(t.instance.wal_dir().join("00000002.history"), b"garbage\n")?;
        t.write_history(3, &[(1, lsn_at(2)), (2, lsn_at(4))])?;

        let archive = t.instance.list_wal_files()?;
        let timelines = t.instance.timelines(&archive)?;
        assert!(timelines.branch(2).is_none());
        assert_eq!(timelines.branch(3).map(|b| b.parent), Some(2));
        Ok(())
    }
}
