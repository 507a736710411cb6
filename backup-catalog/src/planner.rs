//! Deletion planning.
//!
//! Deleting a backup deletes every backup that depends on it: an incremental
//! backup cannot be restored once any ancestor is gone. The plan lists the
//! closure children-first and groups it into stages whose members do not
//! depend on each other.

use crate::catalog::backup::{BackupId, BackupStatus};
use crate::graph::BackupGraph;
use crate::utils::errors::{CatalogError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionPlan {
    /// Backups the caller asked for.
    pub targets: Vec<BackupId>,
    /// Removal stages. Every in-plan descendant of a backup sits in an
    /// earlier stage than the backup itself.
    stages: Vec<Vec<BackupId>>,
}

impl DeletionPlan {
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.iter().map(Vec::len).sum()
    }

    pub fn contains(&self, id: BackupId) -> bool {
        self.stages.iter().any(|stage| stage.contains(&id))
    }

    /// Every member, deepest descendants first.
    pub fn order(&self) -> Vec<BackupId> {
        self.stages.iter().flatten().copied().collect()
    }

    pub fn stages(&self) -> &[Vec<BackupId>] {
        &self.stages
    }
}

/// Plan the deletion of `target` and all of its descendants.
///
/// With no target the plan is empty (WAL-only maintenance).
pub fn plan_deletion(graph: &BackupGraph, target: Option<BackupId>) -> Result<DeletionPlan> {
    let Some(target) = target else {
        return Ok(DeletionPlan::default());
    };
    if !graph.contains(target) {
        return Err(CatalogError::NotFound(target));
    }

    let mut members = vec![target];
    members.extend(graph.descendants(target));
    build_plan(graph, vec![target], members)
}

/// Plan the deletion of every backup with `status`, with their descendants.
pub fn plan_status_deletion(graph: &BackupGraph, status: BackupStatus) -> Result<DeletionPlan> {
    let targets: Vec<BackupId> = graph
        .backups()
        .iter()
        .filter(|b| b.status == status)
        .map(|b| b.id)
        .collect();

    let mut members = Vec::new();
    for &target in &targets {
        members.push(target);
        members.extend(graph.descendants(target));
    }
    build_plan(graph, targets, members)
}

/// Plan the deletion of every backup in the graph.
pub fn plan_all(graph: &BackupGraph) -> Result<DeletionPlan> {
    let members: Vec<BackupId> = graph.backups().iter().map(|b| b.id).collect();
    build_plan(graph, graph.roots().to_vec(), members)
}

fn build_plan(
    graph: &BackupGraph,
    targets: Vec<BackupId>,
    members: Vec<BackupId>,
) -> Result<DeletionPlan> {
    let mut seen = HashSet::new();
    let members: Vec<BackupId> = members.into_iter().filter(|id| seen.insert(*id)).collect();

    let running: Vec<String> = members
        .iter()
        .filter_map(|&id| graph.get(id))
        .filter(|b| b.status == BackupStatus::Running)
        .map(|b| b.id.to_string())
        .collect();
    if !running.is_empty() {
        return Err(CatalogError::InUse(format!(
            "backup {} is RUNNING",
            running.join(", ")
        )));
    }

    let heights = heights(graph, &members);
    let mut stages: Vec<Vec<BackupId>> = Vec::new();
    for &id in &members {
        let height = heights.get(&id).copied().unwrap_or(0);
        if stages.len() <= height {
            stages.resize_with(height + 1, Vec::new);
        }
        stages[height].push(id);
    }
    for stage in &mut stages {
        stage.sort_unstable_by(|a, b| b.cmp(a));
    }

    Ok(DeletionPlan { targets, stages })
}

/// Height of each member within the plan: 0 for a member with no in-plan
/// children, otherwise one more than its highest in-plan child.
///
/// Iterative post-order walk. An edge back onto the current path is ignored,
/// so looping parent links cannot hang the planner.
fn heights(graph: &BackupGraph, members: &[BackupId]) -> HashMap<BackupId, usize> {
    let in_plan: HashSet<BackupId> = members.iter().copied().collect();
    let mut heights: HashMap<BackupId, usize> = HashMap::with_capacity(members.len());
    let mut on_path: HashSet<BackupId> = HashSet::new();

    for &start in members {
        if heights.contains_key(&start) {
            continue;
        }
        // (node, children already pushed)
        let mut stack = vec![(start, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                let height = graph
                    .children(id)
                    .iter()
                    .filter_map(|child| heights.get(child))
                    .map(|h| h + 1)
                    .max()
                    .unwrap_or(0);
                heights.insert(id, height);
                on_path.remove(&id);
                continue;
            }
            if heights.contains_key(&id) || !on_path.insert(id) {
                continue;
            }
            stack.push((id, true));
            for &child in graph.children(id) {
                if in_plan.contains(&child) && !heights.contains_key(&child) && !on_path.contains(&child) {
                    stack.push((child, false));
                }
            }
        }
    }
    heights
}
