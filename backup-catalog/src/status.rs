//! Read-only status projection.

use crate::catalog::backup::{Backup, BackupId, BackupMode, BackupStatus};
use crate::utils::errors::{CatalogError, Result};
use crate::wal::lsn::Lsn;
use crate::wal::timeline::TimelineId;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackupStatusRow {
    pub id: BackupId,
    pub backup_mode: Option<BackupMode>,
    pub status: BackupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_backup_id: Option<BackupId>,
    pub timeline_id: Option<TimelineId>,
    pub start_lsn: Option<Lsn>,
    pub stop_lsn: Option<Lsn>,
    pub start_time: DateTime<Utc>,
}

impl From<&Backup> for BackupStatusRow {
    fn from(backup: &Backup) -> Self {
        Self {
            id: backup.id,
            backup_mode: backup.mode,
            status: backup.status,
            parent_backup_id: backup.parent_backup_id,
            timeline_id: backup.timeline,
            start_lsn: backup.start_lsn,
            stop_lsn: backup.stop_lsn,
            start_time: backup.start_time,
        }
    }
}

/// Rows for `backups`, newest first, optionally restricted to one backup.
pub fn show(backups: &[Backup], id: Option<BackupId>) -> Result<Vec<BackupStatusRow>> {
    let mut rows: Vec<BackupStatusRow> = backups
        .iter()
        .filter(|b| id.map_or(true, |id| b.id == id))
        .map(BackupStatusRow::from)
        .collect();

    if let Some(id) = id {
        if rows.is_empty() {
            return Err(CatalogError::NotFound(id));
        }
    }

    rows.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
    Ok(rows)
}

/// Plain-text table for operators.
pub fn render_table(rows: &[BackupStatusRow]) -> String {
    const HEADER: [&str; 8] = ["ID", "Mode", "Status", "Parent", "TLI", "Start LSN", "Stop LSN", "Start time"];

    let cells: Vec<[String; 8]> = rows
        .iter()
        .map(|row| {
            [
                row.id.to_string(),
                row.backup_mode.map_or_else(|| "----".to_string(), |m| m.to_string()),
                row.status.to_string(),
                row.parent_backup_id.map_or_else(String::new, |p| p.to_string()),
                row.timeline_id.map_or_else(String::new, |t| t.to_string()),
                row.start_lsn.map_or_else(String::new, |l| l.to_string()),
                row.stop_lsn.map_or_else(String::new, |l| l.to_string()),
                row.start_time.format("%Y-%m-%d %H:%M:%S%:z").to_string(),
            ]
        })
        .collect();

    let mut widths = HEADER.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut line = |fields: &[&str]| {
        let joined: Vec<String> = fields
            .iter()
            .zip(widths)
            .map(|(field, width)| format!("{:<width$}", field, width = width))
            .collect();
        out.push_str(joined.join("  ").trim_end());
        out.push('\n');
    };

    line(&HEADER);
    for row in &cells {
        let fields: Vec<&str> = row.iter().map(String::as_str).collect();
        line(&fields);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backups() -> Vec<Backup> {
        let full = BackupId::from_secs(1_700_000_000);
        vec![
            Backup::new(full, BackupMode::Full, 1, Lsn(0x0200_0028)).completed(Lsn(0x0200_0100)),
            Backup::new(BackupId::from_secs(1_700_000_600), BackupMode::Page, 1, Lsn(0x0400_0028))
                .with_parent(full)
                .with_status(BackupStatus::Error),
            Backup::corrupt(BackupId::from_secs(1_700_000_300), None),
        ]
    }

    #[test]
    fn test_show_orders_newest_first() {
        let rows = show(&backups(), None).unwrap();
        let ids: Vec<String> = rows.iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["S44WUW", "S44WMK", "S44WE8"]);
        assert_eq!(rows[0].parent_backup_id, Some(BackupId::from_secs(1_700_000_000)));
        assert_eq!(rows[1].status, BackupStatus::Corrupt);
    }

    #[test]
    fn test_show_single_backup() {
        let id = BackupId::from_secs(1_700_000_000);
        let rows = show(&backups(), Some(id)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].backup_mode, Some(BackupMode::Full));

        assert!(matches!(
            show(&backups(), Some(BackupId::from_secs(1))),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn test_rows_serialize_with_kebab_case_keys() {
        let rows = show(&backups(), None).unwrap();
        let json = serde_json::to_value(&rows).unwrap();

        assert_eq!(json[0]["backup-mode"], "PAGE");
        assert_eq!(json[0]["parent-backup-id"], "S44WE8");
        assert_eq!(json[0]["start-lsn"], "0/4000028");
        assert!(json[2].get("parent-backup-id").is_none());
    }

    #[test]
    fn test_render_table() {
        let table = render_table(&show(&backups(), None).unwrap());
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("ERROR"));
        assert!(lines[2].contains("CORRUPT"));
        assert!(lines[2].contains("----"));
    }
}
