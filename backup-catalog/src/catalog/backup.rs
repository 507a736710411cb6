//! Backup records.
//!
//! On disk every backup directory holds a `backup.control` TOML file
//! ([`BackupControl`]). In memory a [`Backup`] carries the same facts, with the
//! WAL-related fields optional so that a record whose control file could not
//! be read is still a listable, deletable backup (status `CORRUPT`).

use crate::utils::errors::{CatalogError, Result};
use crate::wal::lsn::Lsn;
use crate::wal::timeline::TimelineId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const BASE36_DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Backup identifier: the backup's start time (Unix seconds) in base 36.
///
/// Identifiers order like their start times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupId(u64);

impl BackupId {
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn from_start_time(start_time: DateTime<Utc>) -> Self {
        Self(start_time.timestamp().max(0) as u64)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Start time encoded in the identifier.
    pub fn start_time(&self) -> DateTime<Utc> {
        i64::try_from(self.0)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default()
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0;
        let mut buf = Vec::with_capacity(13);
        loop {
            buf.push(BASE36_DIGITS[(value % 36) as usize]);
            value /= 36;
            if value == 0 {
                break;
            }
        }
        buf.reverse();
        f.write_str(std::str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

impl FromStr for BackupId {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || CatalogError::InvalidBackupId(s.to_string());
        if s.is_empty() {
            return Err(invalid());
        }
        let mut value: u64 = 0;
        for b in s.bytes() {
            let digit = match b {
                b'0'..=b'9' => b - b'0',
                b'A'..=b'Z' => b - b'A' + 10,
                _ => return Err(invalid()),
            };
            value = value
                .checked_mul(36)
                .and_then(|v| v.checked_add(u64::from(digit)))
                .ok_or_else(invalid)?;
        }
        let id = BackupId(value);
        // One spelling per identifier: no leading zeros.
        if id.to_string() != s {
            return Err(invalid());
        }
        Ok(id)
    }
}

impl TryFrom<String> for BackupId {
    type Error = CatalogError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackupId> for String {
    fn from(id: BackupId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupMode {
    Full,
    Page,
    Ptrack,
    Delta,
}

impl BackupMode {
    pub fn is_incremental(&self) -> bool {
        !matches!(self, BackupMode::Full)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupMode::Full => "FULL",
            BackupMode::Page => "PAGE",
            BackupMode::Ptrack => "PTRACK",
            BackupMode::Delta => "DELTA",
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupMode {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FULL" => Ok(BackupMode::Full),
            "PAGE" => Ok(BackupMode::Page),
            "PTRACK" => Ok(BackupMode::Ptrack),
            "DELTA" => Ok(BackupMode::Delta),
            _ => Err(CatalogError::InvalidValue(format!("unknown backup mode '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupStatus {
    Running,
    Ok,
    Error,
    Deleting,
    Deleted,
    Orphan,
    Corrupt,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Running => "RUNNING",
            BackupStatus::Ok => "OK",
            BackupStatus::Error => "ERROR",
            BackupStatus::Deleting => "DELETING",
            BackupStatus::Deleted => "DELETED",
            BackupStatus::Orphan => "ORPHAN",
            BackupStatus::Corrupt => "CORRUPT",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(BackupStatus::Running),
            "OK" => Ok(BackupStatus::Ok),
            "ERROR" => Ok(BackupStatus::Error),
            "DELETING" => Ok(BackupStatus::Deleting),
            "DELETED" => Ok(BackupStatus::Deleted),
            "ORPHAN" => Ok(BackupStatus::Orphan),
            "CORRUPT" => Ok(BackupStatus::Corrupt),
            _ => Err(CatalogError::InvalidValue(format!("unknown backup status '{}'", s))),
        }
    }
}

/// Contents of `backup.control`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupControl {
    pub backup_mode: BackupMode,
    pub status: BackupStatus,
    pub timeline_id: TimelineId,
    pub start_lsn: Lsn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_lsn: Option<Lsn>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_backup_id: Option<BackupId>,
}

impl BackupControl {
    /// Parse and sanity-check a control file.
    pub fn parse(id: BackupId, content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Err(CatalogError::CorruptMetadata {
                id,
                reason: "control file is empty".to_string(),
            });
        }
        let control: BackupControl =
            toml::from_str(content).map_err(|e| CatalogError::CorruptMetadata {
                id,
                reason: e.to_string(),
            })?;

        match (control.backup_mode.is_incremental(), control.parent_backup_id) {
            (false, Some(parent)) => Err(CatalogError::CorruptMetadata {
                id,
                reason: format!("FULL backup names parent {}", parent),
            }),
            (true, None) => Err(CatalogError::CorruptMetadata {
                id,
                reason: format!("{} backup has no parent", control.backup_mode),
            }),
            (true, Some(parent)) if parent == id => Err(CatalogError::CorruptMetadata {
                id,
                reason: "backup names itself as parent".to_string(),
            }),
            _ => Ok(control),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }
}

/// A backup as seen by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Backup {
    pub id: BackupId,
    /// `None` only for records whose control file could not be read.
    pub mode: Option<BackupMode>,
    pub status: BackupStatus,
    pub timeline: Option<TimelineId>,
    pub start_lsn: Option<Lsn>,
    pub stop_lsn: Option<Lsn>,
    pub parent_backup_id: Option<BackupId>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Backup {
    /// A new RUNNING backup as the backup pipeline records it.
    pub fn new(id: BackupId, mode: BackupMode, timeline: TimelineId, start_lsn: Lsn) -> Self {
        Self {
            id,
            mode: Some(mode),
            status: BackupStatus::Running,
            timeline: Some(timeline),
            start_lsn: Some(start_lsn),
            stop_lsn: None,
            parent_backup_id: None,
            start_time: id.start_time(),
            end_time: None,
        }
    }

    pub fn with_parent(mut self, parent: BackupId) -> Self {
        self.parent_backup_id = Some(parent);
        self
    }

    pub fn with_status(mut self, status: BackupStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark the backup finished at `stop_lsn` with status OK.
    pub fn completed(mut self, stop_lsn: Lsn) -> Self {
        self.status = BackupStatus::Ok;
        self.stop_lsn = Some(stop_lsn);
        self.end_time = Some(self.start_time);
        self
    }

    pub fn from_control(id: BackupId, control: BackupControl) -> Self {
        Self {
            id,
            mode: Some(control.backup_mode),
            status: control.status,
            timeline: Some(control.timeline_id),
            start_lsn: Some(control.start_lsn),
            stop_lsn: control.stop_lsn,
            parent_backup_id: control.parent_backup_id,
            start_time: control.start_time,
            end_time: control.end_time,
        }
    }

    /// Stand-in for a backup whose control file is missing, empty or
    /// unparsable. It keeps only what the directory itself tells us.
    pub fn corrupt(id: BackupId, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            mode: None,
            status: BackupStatus::Corrupt,
            timeline: None,
            start_lsn: None,
            stop_lsn: None,
            parent_backup_id: None,
            start_time: id.start_time(),
            end_time: modified,
        }
    }

    pub fn is_stub(&self) -> bool {
        self.mode.is_none()
    }

    /// Control file contents; `None` for corrupt stand-ins.
    pub fn control(&self) -> Option<BackupControl> {
        Some(BackupControl {
            backup_mode: self.mode?,
            status: self.status,
            timeline_id: self.timeline?,
            start_lsn: self.start_lsn?,
            stop_lsn: self.stop_lsn,
            start_time: self.start_time,
            end_time: self.end_time,
            parent_backup_id: self.parent_backup_id,
        })
    }

    /// Timeline and LSN recovery of this backup starts from.
    pub fn wal_start(&self) -> Option<(TimelineId, Lsn)> {
        Some((self.timeline?, self.start_lsn?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_id_base36() {
        let id = BackupId::from_secs(1_700_000_000);
        let text = id.to_string();
        assert_eq!(text, "S44WE8");
        assert_eq!(text.parse::<BackupId>().unwrap(), id);
        assert_eq!(BackupId::from_secs(0).to_string(), "0");
    }

    #[test]
    fn test_backup_id_rejects_non_canonical() {
        assert!("".parse::<BackupId>().is_err());
        assert!("s44we8".parse::<BackupId>().is_err());
        assert!("0S44WE8".parse::<BackupId>().is_err());
        assert!("S44-E8".parse::<BackupId>().is_err());
        assert!("ZZZZZZZZZZZZZZZZ".parse::<BackupId>().is_err());
    }

    #[test]
    fn test_backup_id_orders_like_start_time() {
        let older = BackupId::from_start_time(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let newer = BackupId::from_start_time(DateTime::from_timestamp(1_700_000_060, 0).unwrap());
        assert!(older < newer);
        assert_eq!(newer.start_time().timestamp(), 1_700_000_060);
    }

    #[test]
    fn test_control_round_trip_through_toml() {
        let parent = BackupId::from_secs(1_700_000_000);
        let id = BackupId::from_secs(1_700_000_600);
        let backup = Backup::new(id, BackupMode::Page, 1, Lsn(0x0300_0028))
            .with_parent(parent)
            .completed(Lsn(0x0300_0130));

        let text = backup.control().unwrap().to_toml().unwrap();
        assert!(text.contains("backup-mode = \"PAGE\""));
        assert!(text.contains("parent-backup-id = \"S44WE8\""));

        let parsed = BackupControl::parse(id, &text).unwrap();
        assert_eq!(Backup::from_control(id, parsed), backup);
    }

    #[test]
    fn test_control_parse_rejects_broken_records() {
        let id = BackupId::from_secs(1_700_000_000);
        assert!(matches!(
            BackupControl::parse(id, ""),
            Err(CatalogError::CorruptMetadata { .. })
        ));
        assert!(matches!(
            BackupControl::parse(id, "backup-mode = \"FULL\"\n"),
            Err(CatalogError::CorruptMetadata { .. })
        ));

        let full_with_parent = Backup::new(id, BackupMode::Full, 1, Lsn(0x100))
            .with_parent(BackupId::from_secs(1))
            .control()
            .unwrap()
            .to_toml()
            .unwrap();
        assert!(BackupControl::parse(id, &full_with_parent).is_err());

        let page_without_parent = Backup::new(id, BackupMode::Page, 1, Lsn(0x100))
            .control()
            .unwrap()
            .to_toml()
            .unwrap();
        assert!(BackupControl::parse(id, &page_without_parent).is_err());
    }

    #[test]
    fn test_corrupt_stub_has_no_control() {
        let stub = Backup::corrupt(BackupId::from_secs(1_700_000_000), None);
        assert!(stub.is_stub());
        assert_eq!(stub.status, BackupStatus::Corrupt);
        assert!(stub.control().is_none());
        assert!(stub.wal_start().is_none());
        assert_eq!(stub.start_time.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_status_and_mode_parse_case_insensitively() {
        assert_eq!("error".parse::<BackupStatus>().unwrap(), BackupStatus::Error);
        assert_eq!("Delta".parse::<BackupMode>().unwrap(), BackupMode::Delta);
        assert!("gone".parse::<BackupStatus>().is_err());
    }
}
