//! Priority-based selection of the next ready task.
//!
//! The scheduler is a single logical consumer: it hands one task at a time
//! to an external executor and blocks logically until a completion signal
//! arrives. A task is never selected while any declared dependency is
//! unresolved, and selection is deterministic for a given graph and state.
//!
//! Selection order among ready tasks:
//! 1. a pinned `current_task` when resume was requested
//! 2. longest critical path (deepest chain of unmet dependents)
//! 3. most direct dependents unblocked
//! 4. higher declared priority (P0 before P4)
//! 5. smaller estimated effort
//! 6. deeper transitive dependent count
//! 7. lowest id (documented final tie-break)

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, TaskState};
use crate::record::{priority_rank, TaskRecord, TaskStatus};
use crate::state::{ExecutionState, ExecutionStateStore, RunStatus};
use crate::store::TaskStore;

/// Scheduler over one feature's records, backed by persisted state
#[derive(Debug)]
pub struct Scheduler {
    feature: String,
    store: TaskStore,
    state_store: ExecutionStateStore,
    records: BTreeMap<u32, TaskRecord>,
    graph: DependencyGraph,
    state: ExecutionState,
}

impl Scheduler {
    /// Load records and stored state for a feature.
    ///
    /// Fails with `CycleDetected` before anything else if the dependency
    /// graph has a cycle, and with `FeatureNotFound` when no records exist.
    pub fn new(store: TaskStore, feature: &str) -> Result<Self> {
        let records = store.read_all(feature)?;
        if records.is_empty() {
            return Err(Error::FeatureNotFound(feature.to_string()));
        }
        let graph = DependencyGraph::build(&records);
        graph.detect_cycles()?;

        let state_store = ExecutionStateStore::new(store.clone());
        let total = records.iter().filter(|r| !r.meta.deprecated).count();
        let state = match state_store.load(feature)? {
            Some(state) => state,
            None => ExecutionState::new(feature, total),
        };

        Ok(Self {
            feature: feature.to_string(),
            store,
            state_store,
            records: records.into_iter().map(|r| (r.meta.id, r)).collect(),
            graph,
            state,
        })
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn classifications(&self) -> BTreeMap<u32, TaskState> {
        self.graph.classify(&self.state.completed)
    }

    pub fn ready_set(&self) -> Vec<u32> {
        self.graph.ready_set(&self.state.completed)
    }

    /// Advisory: mutually independent ready tasks. Informational only.
    pub fn parallel_candidates(&self) -> Vec<u32> {
        self.graph.parallel_candidates(&self.state.completed)
    }

    /// Pick the next task without pinning it or touching stored state
    pub fn peek_next(&self, resume: bool) -> Result<Option<u32>> {
        if self.state.status == RunStatus::InProgress {
            if let Some(current) = self.state.current_task {
                if resume {
                    return Ok(Some(current));
                }
                // An interrupted run must be resumed or explicitly reset;
                // silently starting over would redo or skip work.
                return Err(Error::InvalidArgument(format!(
                    "feature '{}' has an interrupted run on task #{current}; \
                     pass --resume or clear the stored state",
                    self.feature
                )));
            }
        }
        Ok(self.rank_ready().first().copied())
    }

    /// Select the next task, pin it in the execution state, and persist
    pub fn select_next(&mut self, resume: bool) -> Result<Option<u32>> {
        let selected = self.peek_next(resume)?;
        match selected {
            Some(task_id) => {
                self.state.start_task(task_id);
                self.state_store.save(&self.state)?;
                Ok(Some(task_id))
            }
            None => Ok(None),
        }
    }

    /// Mark a task completed, persist state and the record, and return the
    /// ids that became ready as a result.
    pub fn on_complete(&mut self, task_id: u32) -> Result<Vec<u32>> {
        let record = self
            .records
            .get_mut(&task_id)
            .ok_or_else(|| Error::TaskNotFound(format!("#{task_id}")))?;
        record.meta.status = TaskStatus::Completed;
        record.meta.updated = chrono::Utc::now();
        let record = record.clone();
        self.store.write(&self.feature, &record)?;

        let before = self.ready_set();
        self.graph = DependencyGraph::build(&self.records.values().cloned().collect::<Vec<_>>());
        let remaining = self.remaining_after(task_id);
        self.state.complete_task(task_id, remaining);
        self.state_store.save(&self.state)?;

        let after = self.ready_set();
        Ok(after
            .into_iter()
            .filter(|id| !before.contains(id) && *id != task_id)
            .collect())
    }

    fn remaining_after(&self, just_completed: u32) -> usize {
        self.records
            .values()
            .filter(|record| {
                !record.meta.deprecated
                    && record.meta.status != TaskStatus::Completed
                    && record.meta.id != just_completed
                    && !self.state.completed.contains(&record.meta.id)
            })
            .count()
    }

    /// Ready tasks in strict selection order
    fn rank_ready(&self) -> Vec<u32> {
        let completed = &self.state.completed;
        let mut ready = self.graph.ready_set(completed);
        ready.sort_by(|&a, &b| {
            let path_a = self.graph.critical_path_len(a, completed);
            let path_b = self.graph.critical_path_len(b, completed);
            let unblock_a = self.graph.unblock_count(a, completed);
            let unblock_b = self.graph.unblock_count(b, completed);
            path_b
                .cmp(&path_a)
                .then_with(|| unblock_b.cmp(&unblock_a))
                .then_with(|| self.rank(a).cmp(&self.rank(b)))
                .then_with(|| self.effort(a).cmp(&self.effort(b)))
                .then_with(|| {
                    self.graph
                        .transitive_dependent_count(b)
                        .cmp(&self.graph.transitive_dependent_count(a))
                })
                .then_with(|| a.cmp(&b))
        });
        ready
    }

    fn rank(&self, id: u32) -> usize {
        self.records
            .get(&id)
            .map(|record| priority_rank(&record.meta.priority))
            .unwrap_or(usize::MAX)
    }

    fn effort(&self, id: u32) -> u32 {
        self.records
            .get(&id)
            .and_then(|record| record.meta.effort_hours)
            .unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TaskSpec;
    use chrono::Utc;
    use tempfile::TempDir;

    fn write_task(store: &TaskStore, id: u32, deps: &[u32]) {
        write_task_full(store, id, deps, "P2", None);
    }

    fn write_task_full(store: &TaskStore, id: u32, deps: &[u32], priority: &str, effort: Option<u32>) {
        let mut spec = TaskSpec::new(id, format!("task number {id}"));
        spec.depends_on = deps.to_vec();
        spec.priority = Some(priority.to_string());
        spec.effort_hours = effort;
        let record = TaskRecord::from_spec(&spec, Utc::now());
        store.write("auth", &record).unwrap();
    }

    fn scheduler(dir: &TempDir) -> Scheduler {
        Scheduler::new(TaskStore::new(dir.path()), "auth").unwrap()
    }

    #[test]
    fn dependency_chain_completes_in_order() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 1, &[]);
        write_task(&store, 2, &[1]);
        write_task(&store, 3, &[1, 2]);

        let mut sched = scheduler(&dir);
        assert_eq!(sched.ready_set(), vec![1]);
        assert_eq!(sched.select_next(false).unwrap(), Some(1));

        let newly_ready = sched.on_complete(1).unwrap();
        assert_eq!(newly_ready, vec![2]);
        assert_eq!(sched.ready_set(), vec![2]);

        let newly_ready = sched.on_complete(2).unwrap();
        assert_eq!(newly_ready, vec![3]);
        assert_eq!(sched.ready_set(), vec![3]);
        assert_eq!(sched.state().status, RunStatus::InProgress);

        sched.on_complete(3).unwrap();
        assert_eq!(sched.state().status, RunStatus::Completed);
    }

    #[test]
    fn task_never_selected_before_dependencies_complete() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 1, &[]);
        write_task(&store, 2, &[1]);
        write_task(&store, 3, &[1, 2]);

        let mut sched = scheduler(&dir);
        let first = sched.select_next(false).unwrap();
        assert_ne!(first, Some(3));
        sched.on_complete(1).unwrap();
        assert!(!sched.ready_set().contains(&3));
    }

    #[test]
    fn critical_path_outranks_priority() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        // Task 1 heads a chain of two; task 4 is a P0 leaf.
        write_task_full(&store, 1, &[], "P3", None);
        write_task(&store, 2, &[1]);
        write_task(&store, 3, &[2]);
        write_task_full(&store, 4, &[], "P0", None);

        let sched = scheduler(&dir);
        assert_eq!(sched.peek_next(false).unwrap(), Some(1));
    }

    #[test]
    fn priority_then_effort_break_ties() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task_full(&store, 1, &[], "P2", Some(8));
        write_task_full(&store, 2, &[], "P1", Some(8));
        write_task_full(&store, 3, &[], "P1", Some(2));

        let sched = scheduler(&dir);
        // Same graph shape: priority P1 wins, then the smaller effort.
        assert_eq!(sched.peek_next(false).unwrap(), Some(3));
    }

    #[test]
    fn equal_tasks_fall_back_to_lowest_id() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 7, &[]);
        write_task(&store, 2, &[]);
        write_task(&store, 5, &[]);

        let sched = scheduler(&dir);
        assert_eq!(sched.peek_next(false).unwrap(), Some(2));
    }

    #[test]
    fn selection_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 1, &[]);
        write_task(&store, 2, &[]);
        write_task(&store, 3, &[1]);

        let first = scheduler(&dir).peek_next(false).unwrap();
        for _ in 0..5 {
            assert_eq!(scheduler(&dir).peek_next(false).unwrap(), first);
        }
    }

    #[test]
    fn resume_returns_pinned_task_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 1, &[]);
        write_task(&store, 2, &[]);

        let mut sched = scheduler(&dir);
        let picked = sched.select_next(false).unwrap().unwrap();

        // Simulate an interrupted run: state is persisted, process restarts
        let resumed = scheduler(&dir);
        assert_eq!(resumed.peek_next(true).unwrap(), Some(picked));
    }

    #[test]
    fn interrupted_run_without_resume_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 1, &[]);

        let mut sched = scheduler(&dir);
        sched.select_next(false).unwrap();

        let restarted = scheduler(&dir);
        let err = restarted.peek_next(false).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn explicit_reset_allows_fresh_start() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 1, &[]);

        let mut sched = scheduler(&dir);
        sched.select_next(false).unwrap();

        ExecutionStateStore::new(store.clone()).clear("auth").unwrap();
        let fresh = scheduler(&dir);
        assert_eq!(fresh.peek_next(false).unwrap(), Some(1));
    }

    #[test]
    fn cyclic_records_abort_scheduling() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 1, &[2]);
        write_task(&store, 2, &[1]);

        let err = Scheduler::new(store, "auth").unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));
    }

    #[test]
    fn completing_unknown_task_fails() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        write_task(&store, 1, &[]);

        let mut sched = scheduler(&dir);
        let err = sched.on_complete(99).unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
    }
}
