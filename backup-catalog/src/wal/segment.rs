//! WAL archive file naming.
//!
//! Segment files are named `TTTTTTTTXXXXXXXXYYYYYYYY`: timeline, then the
//! segment number split into a "log id" and a segment within that log id.
//! The archive also holds `.partial` segments, compressed copies
//! (`.gz`, `.zst`), `.backup` markers and `.history` files.

use crate::utils::errors::{CatalogError, Result};
use crate::wal::timeline::TimelineId;
use serde::Serialize;
use std::collections::HashSet;

/// Sequence number of a segment within one timeline.
pub type SegmentNo = u64;

pub const DEFAULT_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;
const MIN_SEGMENT_SIZE: u64 = 1024 * 1024;
const MAX_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

const COMPRESSED_SUFFIXES: [&str; 2] = [".gz", ".zst"];

/// Check that a segment size is a power of two between 1 MiB and 1 GiB.
pub fn validate_segment_size(size: u64) -> Result<()> {
    if size.is_power_of_two() && (MIN_SEGMENT_SIZE..=MAX_SEGMENT_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(CatalogError::InvalidValue(format!(
            "WAL segment size {} must be a power of two between 1MB and 1GB",
            size
        )))
    }
}

fn segments_per_log_id(segment_size: u64) -> u64 {
    0x1_0000_0000 / segment_size
}

/// Identity of one WAL segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WalSegmentId {
    pub timeline: TimelineId,
    pub segno: SegmentNo,
}

impl WalSegmentId {
    pub fn new(timeline: TimelineId, segno: SegmentNo) -> Self {
        Self { timeline, segno }
    }

    pub fn file_name(&self, segment_size: u64) -> String {
        let per_id = segments_per_log_id(segment_size);
        format!(
            "{:08X}{:08X}{:08X}",
            self.timeline,
            self.segno / per_id,
            self.segno % per_id
        )
    }

    /// Parse a bare 24-character segment name.
    pub fn parse(name: &str, segment_size: u64) -> Option<Self> {
        if name.len() != 24 || !name.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let timeline = u32::from_str_radix(&name[0..8], 16).ok()?;
        let log_id = u64::from_str_radix(&name[8..16], 16).ok()?;
        let seg = u64::from_str_radix(&name[16..24], 16).ok()?;
        let per_id = segments_per_log_id(segment_size);
        if seg >= per_id {
            return None;
        }
        Some(Self {
            timeline,
            segno: log_id * per_id + seg,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalFileKind {
    /// A complete segment, possibly compressed.
    Segment,
    /// A segment that was still being written when its timeline ended.
    Partial,
    /// A `.backup` marker noting where a backup started.
    BackupMarker,
    /// A `.history` file describing where a timeline branched.
    History,
}

/// One file found in an instance's WAL archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalFile {
    pub name: String,
    pub kind: WalFileKind,
    pub timeline: TimelineId,
    /// Absent for history files.
    pub segno: Option<SegmentNo>,
}

impl WalFile {
    /// Classify an archive file name. Returns `None` for names the archive
    /// does not own (temporary files, foreign files).
    pub fn parse(name: &str, segment_size: u64) -> Option<Self> {
        if let Some(stem) = name.strip_suffix(".history") {
            if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            return Some(Self {
                name: name.to_string(),
                kind: WalFileKind::History,
                timeline: u32::from_str_radix(stem, 16).ok()?,
                segno: None,
            });
        }

        let segment = WalSegmentId::parse(name.get(..24)?, segment_size)?;
        let rest = &name[24..];
        let kind = match rest {
            "" => WalFileKind::Segment,
            _ if COMPRESSED_SUFFIXES.contains(&rest) => WalFileKind::Segment,
            ".partial" => WalFileKind::Partial,
            _ if rest
                .strip_prefix(".partial")
                .is_some_and(|s| COMPRESSED_SUFFIXES.contains(&s)) =>
            {
                WalFileKind::Partial
            }
            _ if is_backup_marker_suffix(rest) => WalFileKind::BackupMarker,
            _ => return None,
        };

        Some(Self {
            name: name.to_string(),
            kind,
            timeline: segment.timeline,
            segno: Some(segment.segno),
        })
    }

    /// The segment this file belongs to; `None` for history files.
    pub fn segment(&self) -> Option<WalSegmentId> {
        self.segno.map(|segno| WalSegmentId::new(self.timeline, segno))
    }

    pub fn is_segment(&self) -> bool {
        matches!(self.kind, WalFileKind::Segment | WalFileKind::Partial)
    }
}

/// `.XXXXXXXX.backup`
fn is_backup_marker_suffix(rest: &str) -> bool {
    rest.strip_prefix('.')
        .and_then(|s| s.strip_suffix(".backup"))
        .is_some_and(|offset| offset.len() == 8 && offset.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Listing of an instance's WAL archive.
#[derive(Debug, Clone)]
pub struct WalArchive {
    pub segment_size: u64,
    pub files: Vec<WalFile>,
}

impl WalArchive {
    pub fn new(segment_size: u64, mut files: Vec<WalFile>) -> Self {
        files.sort_by(|a, b| {
            (a.timeline, a.segno, &a.name).cmp(&(b.timeline, b.segno, &b.name))
        });
        Self { segment_size, files }
    }

    /// Complete segments usable for recovery.
    pub fn complete_segments(&self) -> HashSet<WalSegmentId> {
        self.files
            .iter()
            .filter(|f| f.kind == WalFileKind::Segment)
            .filter_map(WalFile::segment)
            .collect()
    }

    pub fn histories(&self) -> impl Iterator<Item = &WalFile> {
        self.files.iter().filter(|f| f.kind == WalFileKind::History)
    }

    pub fn segment_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_segment()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u64 = DEFAULT_SEGMENT_SIZE;

    #[test]
    fn test_segment_name_round_trip() {
        let id = WalSegmentId::new(2, 0x1_05);
        assert_eq!(id.file_name(SIZE), "000000020000000100000005");
        assert_eq!(WalSegmentId::parse("000000020000000100000005", SIZE), Some(id));
    }

    #[test]
    fn test_segment_name_depends_on_segment_size() {
        // 64MB segments: 64 per log id
        let id = WalSegmentId::new(1, 65);
        assert_eq!(id.file_name(64 * 1024 * 1024), "000000010000000100000001");
        // seg part beyond segments-per-log-id is invalid
        assert_eq!(WalSegmentId::parse("000000010000000000000040", 64 * 1024 * 1024), None);
    }

    #[test]
    fn test_classify_archive_files() {
        let seg = WalFile::parse("000000010000000000000003", SIZE).unwrap();
        assert_eq!(seg.kind, WalFileKind::Segment);
        assert_eq!(seg.segment(), Some(WalSegmentId::new(1, 3)));

        let gz = WalFile::parse("000000010000000000000003.gz", SIZE).unwrap();
        assert_eq!(gz.kind, WalFileKind::Segment);

        let partial = WalFile::parse("000000010000000000000004.partial", SIZE).unwrap();
        assert_eq!(partial.kind, WalFileKind::Partial);

        let marker = WalFile::parse("000000010000000000000002.00000028.backup", SIZE).unwrap();
        assert_eq!(marker.kind, WalFileKind::BackupMarker);
        assert_eq!(marker.segno, Some(2));

        let history = WalFile::parse("00000002.history", SIZE).unwrap();
        assert_eq!(history.kind, WalFileKind::History);
        assert_eq!(history.timeline, 2);
        assert_eq!(history.segment(), None);

        assert!(WalFile::parse("000000010000000000000003.tmp", SIZE).is_none());
        assert!(WalFile::parse("archive_status", SIZE).is_none());
        assert!(WalFile::parse("0000000100000000000000", SIZE).is_none());
    }

    #[test]
    fn test_validate_segment_size() {
        assert!(validate_segment_size(SIZE).is_ok());
        assert!(validate_segment_size(1024 * 1024).is_ok());
        assert!(validate_segment_size(3 * 1024 * 1024).is_err());
        assert!(validate_segment_size(512 * 1024).is_err());
        assert!(validate_segment_size(2 * 1024 * 1024 * 1024).is_err());
    }
}
