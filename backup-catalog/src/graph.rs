//! Backup dependency graph.
//!
//! Built fresh from every listing: an arena of records, an index by id and
//! the reverse of the parent links. Status plays no part in the structure.

use crate::catalog::backup::{Backup, BackupId};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct BackupGraph {
    backups: Vec<Backup>,
    index: HashMap<BackupId, usize>,
    children: HashMap<BackupId, Vec<BackupId>>,
    roots: Vec<BackupId>,
}

impl BackupGraph {
    /// Build the graph in a single pass over the listing.
    ///
    /// A backup whose parent is not in the listing is treated as a root so
    /// it stays reachable.
    pub fn build(backups: Vec<Backup>) -> Self {
        let index: HashMap<BackupId, usize> =
            backups.iter().enumerate().map(|(i, b)| (b.id, i)).collect();

        let mut children: HashMap<BackupId, Vec<BackupId>> = HashMap::new();
        let mut roots = Vec::new();
        for backup in &backups {
            match backup.parent_backup_id {
                Some(parent) if parent != backup.id && index.contains_key(&parent) => {
                    children.entry(parent).or_default().push(backup.id);
                }
                _ => roots.push(backup.id),
            }
        }

        Self {
            backups,
            index,
            children,
            roots,
        }
    }

    pub fn get(&self, id: BackupId) -> Option<&Backup> {
        self.index.get(&id).map(|&i| &self.backups[i])
    }

    pub fn contains(&self, id: BackupId) -> bool {
        self.index.contains_key(&id)
    }

    /// Records in listing order.
    pub fn backups(&self) -> &[Backup] {
        &self.backups
    }

    pub fn children(&self, id: BackupId) -> &[BackupId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roots(&self) -> &[BackupId] {
        &self.roots
    }

    /// Every backup reachable from `id` through child links, excluding `id`.
    pub fn descendants(&self, id: BackupId) -> Vec<BackupId> {
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut out = Vec::new();

        while let Some(current) = queue.pop_front() {
            for &child in self.children(current) {
                if seen.insert(child) {
                    out.push(child);
                    queue.push_back(child);
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.backups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }
}
