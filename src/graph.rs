//! Dependency graph over task records.
//!
//! Nodes are task ids; an edge `u -> v` exists iff task v declares u as a
//! dependency. The graph is rebuilt whenever records change and drives both
//! cycle detection (fatal, aborts before any write) and the scheduler's
//! readiness and priority analyses. All containers are ordered so every
//! analysis is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::record::{TaskRecord, TaskStatus};

/// Classification of a task within the current graph and execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// All dependencies satisfied, own status open
    Ready,
    InProgress,
    /// At least one dependency not yet satisfied
    Blocked,
    Completed,
    /// A declared dependency has no record at all
    NeedsAnalysis,
    Deprecated,
}

#[derive(Debug, Clone)]
struct Node {
    status: TaskStatus,
    deprecated: bool,
}

/// Immutable dependency graph built from a record set
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<u32, Node>,
    /// u -> tasks that declare u as a dependency
    dependents: BTreeMap<u32, BTreeSet<u32>>,
    /// v -> dependencies v declares
    deps: BTreeMap<u32, BTreeSet<u32>>,
}

impl DependencyGraph {
    /// Build the graph from a record set
    pub fn build(records: &[TaskRecord]) -> Self {
        let mut nodes = BTreeMap::new();
        let mut dependents: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        let mut deps: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();

        for record in records {
            nodes.insert(
                record.meta.id,
                Node {
                    status: record.meta.status,
                    deprecated: record.meta.deprecated,
                },
            );
            let entry = deps.entry(record.meta.id).or_default();
            for &dep in &record.meta.depends_on {
                entry.insert(dep);
                dependents.entry(dep).or_default().insert(record.meta.id);
            }
        }

        Self {
            nodes,
            dependents,
            deps,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.nodes.keys().copied()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Detect dependency cycles.
    ///
    /// Fatal: callers must abort before any further writes. The error
    /// carries the full cycle as an ordered id list returning to its start,
    /// e.g. `[1, 2, 3, 1]`.
    pub fn detect_cycles(&self) -> Result<()> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();
        let mut on_path = BTreeSet::new();

        for &start in self.nodes.keys() {
            if !visited.contains(&start) {
                self.dfs_cycle(start, &mut visited, &mut path, &mut on_path)?;
            }
        }
        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: u32,
        visited: &mut BTreeSet<u32>,
        path: &mut Vec<u32>,
        on_path: &mut BTreeSet<u32>,
    ) -> Result<()> {
        visited.insert(node);
        path.push(node);
        on_path.insert(node);

        if let Some(next) = self.dependents.get(&node) {
            for &dependent in next {
                if !self.nodes.contains_key(&dependent) {
                    continue;
                }
                if on_path.contains(&dependent) {
                    let start = path.iter().position(|&id| id == dependent).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|id| id.to_string()).collect();
                    cycle.push(dependent.to_string());
                    return Err(Error::CycleDetected { cycle });
                }
                if !visited.contains(&dependent) {
                    self.dfs_cycle(dependent, visited, path, on_path)?;
                }
            }
        }

        path.pop();
        on_path.remove(&node);
        Ok(())
    }

    /// Whether a dependency is satisfied: completed (by record status or by
    /// the scheduler's completed set) or deprecated.
    fn is_satisfied(&self, id: u32, completed: &BTreeSet<u32>) -> bool {
        if completed.contains(&id) {
            return true;
        }
        match self.nodes.get(&id) {
            Some(node) => node.deprecated || node.status == TaskStatus::Completed,
            None => false,
        }
    }

    /// Classify every node given the scheduler's completed set
    pub fn classify(&self, completed: &BTreeSet<u32>) -> BTreeMap<u32, TaskState> {
        let mut states = BTreeMap::new();
        for (&id, node) in &self.nodes {
            let state = if node.deprecated {
                TaskState::Deprecated
            } else if node.status == TaskStatus::Completed || completed.contains(&id) {
                TaskState::Completed
            } else if node.status == TaskStatus::InProgress {
                TaskState::InProgress
            } else {
                let deps = self.deps.get(&id).cloned().unwrap_or_default();
                if deps.iter().any(|dep| !self.contains(*dep)) {
                    TaskState::NeedsAnalysis
                } else if deps.iter().all(|&dep| self.is_satisfied(dep, completed)) {
                    TaskState::Ready
                } else {
                    TaskState::Blocked
                }
            };
            states.insert(id, state);
        }
        states
    }

    /// Ids whose state is Ready, in ascending order
    pub fn ready_set(&self, completed: &BTreeSet<u32>) -> Vec<u32> {
        self.classify(completed)
            .into_iter()
            .filter(|(_, state)| *state == TaskState::Ready)
            .map(|(id, _)| id)
            .collect()
    }

    /// Length of the longest chain of not-yet-satisfied dependents below a
    /// task (the critical path it sits on).
    pub fn critical_path_len(&self, id: u32, completed: &BTreeSet<u32>) -> usize {
        let mut memo = BTreeMap::new();
        self.chain_len(id, completed, &mut memo)
    }

    fn chain_len(
        &self,
        id: u32,
        completed: &BTreeSet<u32>,
        memo: &mut BTreeMap<u32, usize>,
    ) -> usize {
        if let Some(&len) = memo.get(&id) {
            return len;
        }
        // Mark before recursing; cycles are rejected before analysis, this
        // only guards against re-entry on diamonds.
        memo.insert(id, 0);
        let len = self
            .dependents
            .get(&id)
            .map(|next| {
                next.iter()
                    .filter(|&&dep| !self.is_satisfied(dep, completed))
                    .map(|&dep| 1 + self.chain_len(dep, completed, memo))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        memo.insert(id, len);
        len
    }

    /// Number of direct dependents a task would unblock when completed:
    /// dependents whose only unsatisfied dependency is this task.
    pub fn unblock_count(&self, id: u32, completed: &BTreeSet<u32>) -> usize {
        self.dependents
            .get(&id)
            .map(|next| {
                next.iter()
                    .filter(|&&dependent| {
                        self.deps
                            .get(&dependent)
                            .map(|deps| {
                                deps.iter()
                                    .all(|&dep| dep == id || self.is_satisfied(dep, completed))
                            })
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Count of distinct transitive dependents
    pub fn transitive_dependent_count(&self, id: u32) -> usize {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(next) = self.dependents.get(&node) {
                for &dependent in next {
                    if seen.insert(dependent) {
                        stack.push(dependent);
                    }
                }
            }
        }
        seen.remove(&id);
        seen.len()
    }

    /// Advisory parallel-candidate analysis: the mutually independent ready
    /// tasks. Ready tasks never depend on one another, so any ready set of
    /// two or more is a parallel candidate group. This is pure metadata; the
    /// scheduler still executes one task at a time.
    pub fn parallel_candidates(&self, completed: &BTreeSet<u32>) -> Vec<u32> {
        let ready = self.ready_set(completed);
        if ready.len() > 1 {
            ready
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TaskSpec;
    use chrono::Utc;

    fn record(id: u32, deps: &[u32], status: TaskStatus) -> TaskRecord {
        let mut spec = TaskSpec::new(id, format!("task {id}"));
        spec.depends_on = deps.to_vec();
        let mut record = TaskRecord::from_spec(&spec, Utc::now());
        record.meta.status = status;
        record
    }

    #[test]
    fn three_node_cycle_reports_full_path() {
        // 2 depends on 1, 3 depends on 2, 1 depends on 3
        let records = vec![
            record(1, &[3], TaskStatus::Open),
            record(2, &[1], TaskStatus::Open),
            record(3, &[2], TaskStatus::Open),
        ];
        let graph = DependencyGraph::build(&records);
        let err = graph.detect_cycles().expect_err("cycle");
        match err {
            Error::CycleDetected { cycle } => {
                assert_eq!(cycle, vec!["1", "2", "3", "1"]);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn acyclic_chain_passes() {
        let records = vec![
            record(1, &[], TaskStatus::Open),
            record(2, &[1], TaskStatus::Open),
            record(3, &[1, 2], TaskStatus::Open),
        ];
        DependencyGraph::build(&records).detect_cycles().expect("acyclic");
    }

    #[test]
    fn classification_follows_dependencies() {
        let records = vec![
            record(1, &[], TaskStatus::Completed),
            record(2, &[1], TaskStatus::Open),
            record(3, &[2], TaskStatus::Open),
            record(4, &[9], TaskStatus::Open),
            record(5, &[], TaskStatus::InProgress),
        ];
        let graph = DependencyGraph::build(&records);
        let states = graph.classify(&BTreeSet::new());
        assert_eq!(states[&1], TaskState::Completed);
        assert_eq!(states[&2], TaskState::Ready);
        assert_eq!(states[&3], TaskState::Blocked);
        assert_eq!(states[&4], TaskState::NeedsAnalysis);
        assert_eq!(states[&5], TaskState::InProgress);
    }

    #[test]
    fn deprecated_dependency_satisfies_dependents() {
        let mut dep = record(1, &[], TaskStatus::Open);
        dep.deprecate("superseded", Utc::now());
        let records = vec![dep, record(2, &[1], TaskStatus::Open)];
        let graph = DependencyGraph::build(&records);
        let states = graph.classify(&BTreeSet::new());
        assert_eq!(states[&1], TaskState::Deprecated);
        assert_eq!(states[&2], TaskState::Ready);
    }

    #[test]
    fn critical_path_and_unblock_counts() {
        // 1 -> 2 -> 3 and 1 -> 4
        let records = vec![
            record(1, &[], TaskStatus::Open),
            record(2, &[1], TaskStatus::Open),
            record(3, &[2], TaskStatus::Open),
            record(4, &[1], TaskStatus::Open),
        ];
        let graph = DependencyGraph::build(&records);
        let none = BTreeSet::new();
        assert_eq!(graph.critical_path_len(1, &none), 2);
        assert_eq!(graph.critical_path_len(2, &none), 1);
        assert_eq!(graph.critical_path_len(4, &none), 0);
        assert_eq!(graph.unblock_count(1, &none), 2);
        assert_eq!(graph.transitive_dependent_count(1), 3);
    }

    #[test]
    fn parallel_candidates_require_two_ready_tasks() {
        let graph = DependencyGraph::build(&[
            record(1, &[], TaskStatus::Open),
            record(2, &[], TaskStatus::Open),
            record(3, &[1, 2], TaskStatus::Open),
        ]);
        assert_eq!(graph.parallel_candidates(&BTreeSet::new()), vec![1, 2]);

        let single = DependencyGraph::build(&[record(1, &[], TaskStatus::Open)]);
        assert!(single.parallel_candidates(&BTreeSet::new()).is_empty());
    }
}
