//! Timeline history.
//!
//! A `NNNNNNNN.history` file lists, one per line, every ancestor of timeline
//! `N` with the LSN at which history switched away from it:
//!
//! ```text
//! 1	0/3000000	no recovery target specified
//! 2	0/5000A28	before 2026-01-01 00:00:00+00
//! ```
//!
//! The last line names the immediate parent. Ancestry is resolved by
//! following immediate-parent links, so inconsistent archives (a missing
//! history file, a parent loop) are detected instead of trusted.

use crate::catalog::backup::BackupId;
use crate::utils::errors::{CatalogError, Result};
use crate::wal::lsn::Lsn;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

pub type TimelineId = u32;

/// The timeline a freshly initialised cluster starts on.
pub const ROOT_TIMELINE: TimelineId = 1;

/// Where a timeline branched off its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimelineBranch {
    pub timeline: TimelineId,
    pub parent: TimelineId,
    pub switchpoint: Lsn,
}

/// Why a timeline's ancestry could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InconsistencyReason {
    /// The timeline is not the root but has no history entry.
    MissingHistory { timeline: TimelineId },
    /// Following parent links came back to an already visited timeline.
    ParentCycle { timeline: TimelineId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineInconsistency {
    /// Timeline whose ancestry was being resolved.
    pub timeline: TimelineId,
    /// Retained backup whose WAL range depended on it.
    pub backup: Option<BackupId>,
    pub reason: InconsistencyReason,
}

impl fmt::Display for TimelineInconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            InconsistencyReason::MissingHistory { timeline } => write!(
                f,
                "branch point of timeline {} is unknown (no history file)",
                timeline
            )?,
            InconsistencyReason::ParentCycle { timeline } => write!(
                f,
                "timeline {} appears twice in its own ancestry",
                timeline
            )?,
        }
        write!(f, " while resolving timeline {}", self.timeline)?;
        if let Some(backup) = self.backup {
            write!(f, " for backup {}", backup)?;
        }
        Ok(())
    }
}

/// Immediate-parent links for every timeline with a history file.
#[derive(Debug, Clone, Default)]
pub struct TimelineMap {
    branches: HashMap<TimelineId, TimelineBranch>,
}

impl TimelineMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the contents of timeline `timeline`'s history file.
    ///
    /// Returns `None` for a file without entries.
    pub fn parse_history(timeline: TimelineId, content: &str) -> Result<Option<TimelineBranch>> {
        let mut last = None;
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let parent = fields
                .next()
                .and_then(|f| f.parse::<TimelineId>().ok())
                .ok_or_else(|| {
                    CatalogError::InvalidValue(format!(
                        "history of timeline {} line {}: bad parent timeline",
                        timeline,
                        lineno + 1
                    ))
                })?;
            let switchpoint = fields
                .next()
                .ok_or_else(|| {
                    CatalogError::InvalidValue(format!(
                        "history of timeline {} line {}: missing switchpoint",
                        timeline,
                        lineno + 1
                    ))
                })?
                .parse::<Lsn>()?;
            last = Some(TimelineBranch {
                timeline,
                parent,
                switchpoint,
            });
        }
        Ok(last)
    }

    pub fn insert(&mut self, branch: TimelineBranch) {
        self.branches.insert(branch.timeline, branch);
    }

    pub fn branch(&self, timeline: TimelineId) -> Option<&TimelineBranch> {
        self.branches.get(&timeline)
    }

    /// Branches from `timeline` up to the root, nearest first.
    ///
    /// An empty vector means `timeline` is the root.
    pub fn ancestry(
        &self,
        timeline: TimelineId,
    ) -> std::result::Result<Vec<TimelineBranch>, TimelineInconsistency> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([timeline]);
        let mut current = timeline;

        loop {
            match self.branches.get(&current) {
                Some(branch) => {
                    if !visited.insert(branch.parent) {
                        return Err(TimelineInconsistency {
                            timeline,
                            backup: None,
                            reason: InconsistencyReason::ParentCycle {
                                timeline: branch.parent,
                            },
                        });
                    }
                    chain.push(*branch);
                    current = branch.parent;
                }
                None if current == ROOT_TIMELINE => return Ok(chain),
                None => {
                    return Err(TimelineInconsistency {
                        timeline,
                        backup: None,
                        reason: InconsistencyReason::MissingHistory { timeline: current },
                    })
                }
            }
        }
    }
}

impl FromIterator<TimelineBranch> for TimelineMap {
    fn from_iter<I: IntoIterator<Item = TimelineBranch>>(iter: I) -> Self {
        let mut map = TimelineMap::new();
        for branch in iter {
            map.insert(branch);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(timeline: TimelineId, parent: TimelineId, switchpoint: &str) -> TimelineBranch {
        TimelineBranch {
            timeline,
            parent,
            switchpoint: switchpoint.parse().unwrap(),
        }
    }

    #[test]
    fn test_parse_history_uses_last_entry() {
        let content = "1\t0/3000000\tno recovery target specified\n\n2\t0/5000A28\tbefore 2026-01-01\n";
        let parsed = TimelineMap::parse_history(3, content).unwrap();
        assert_eq!(parsed, Some(branch(3, 2, "0/5000A28")));
    }

    #[test]
    fn test_parse_history_empty_and_malformed() {
        assert_eq!(TimelineMap::parse_history(2, "# comment only\n").unwrap(), None);
        assert!(TimelineMap::parse_history(2, "one\t0/1\n").is_err());
        assert!(TimelineMap::parse_history(2, "1\n").is_err());
        assert!(TimelineMap::parse_history(2, "1\tnot-an-lsn\n").is_err());
    }

    #[test]
    fn test_ancestry_walks_to_root() {
        let map: TimelineMap = [branch(2, 1, "0/5000000"), branch(3, 2, "0/7000000")]
            .into_iter()
            .collect();

        assert!(map.ancestry(1).unwrap().is_empty());
        let chain = map.ancestry(3).unwrap();
        assert_eq!(chain, vec![branch(3, 2, "0/7000000"), branch(2, 1, "0/5000000")]);
    }

    #[test]
    fn test_ancestry_missing_history() {
        let map: TimelineMap = [branch(3, 2, "0/7000000")].into_iter().collect();
        let err = map.ancestry(3).unwrap_err();
        assert_eq!(err.reason, InconsistencyReason::MissingHistory { timeline: 2 });
        assert_eq!(err.timeline, 3);
    }

    #[test]
    fn test_ancestry_detects_cycle() {
        let map: TimelineMap = [branch(2, 3, "0/5000000"), branch(3, 2, "0/7000000")]
            .into_iter()
            .collect();
        let err = map.ancestry(3).unwrap_err();
        assert!(matches!(err.reason, InconsistencyReason::ParentCycle { .. }));
    }
}
