//! Persisted scheduler execution state.
//!
//! One JSON file per feature scope, written atomically so an interrupt or
//! crash never leaves a partial state. Interruption leaves
//! `status = in_progress` with the in-flight task recorded; recovery is an
//! explicit resume or reset decision by the caller, never automatic.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lock::write_atomic_str;
use crate::store::TaskStore;

/// Overall status of a scheduling run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::InProgress => write!(f, "in_progress"),
            RunStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Crash-resumable scheduler progress for one feature scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub feature: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<u32>,
    #[serde(default)]
    pub completed: BTreeSet<u32>,
    pub total_tasks: usize,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionState {
    /// Fresh state for a feature about to be scheduled
    pub fn new(feature: impl Into<String>, total_tasks: usize) -> Self {
        Self {
            feature: feature.into(),
            status: RunStatus::Pending,
            current_task: None,
            completed: BTreeSet::new(),
            total_tasks,
            updated_at: Utc::now(),
        }
    }

    /// Record that a task was handed off for execution
    pub fn start_task(&mut self, task_id: u32) {
        self.status = RunStatus::InProgress;
        self.current_task = Some(task_id);
        self.updated_at = Utc::now();
    }

    /// Record task completion; finalizes the run when nothing remains
    pub fn complete_task(&mut self, task_id: u32, remaining: usize) {
        self.completed.insert(task_id);
        if self.current_task == Some(task_id) {
            self.current_task = None;
        }
        self.status = if remaining == 0 {
            RunStatus::Completed
        } else {
            RunStatus::InProgress
        };
        self.updated_at = Utc::now();
    }
}

/// Load/save/clear for execution state files
#[derive(Debug, Clone)]
pub struct ExecutionStateStore {
    store: TaskStore,
}

impl ExecutionStateStore {
    pub fn new(store: TaskStore) -> Self {
        Self { store }
    }

    pub fn path(&self, feature: &str) -> PathBuf {
        self.store.state_file(feature)
    }

    pub fn load(&self, feature: &str) -> Result<Option<ExecutionState>> {
        let path = self.path(feature);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save(&self, state: &ExecutionState) -> Result<()> {
        let path = self.path(&state.feature);
        let json = serde_json::to_string_pretty(state)?;
        write_atomic_str(&path, &json)
    }

    /// Explicit reset: the caller has decided to start fresh rather than
    /// resume an interrupted run.
    pub fn clear(&self, feature: &str) -> Result<()> {
        let path = self.path(feature);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ExecutionStateStore::new(TaskStore::new(dir.path()));

        let mut state = ExecutionState::new("auth", 3);
        state.start_task(1);
        store.save(&state).unwrap();

        let loaded = store.load("auth").unwrap().expect("state");
        assert_eq!(loaded, state);
        assert_eq!(loaded.status, RunStatus::InProgress);
        assert_eq!(loaded.current_task, Some(1));
    }

    #[test]
    fn complete_last_task_finalizes_run() {
        let mut state = ExecutionState::new("auth", 2);
        state.start_task(1);
        state.complete_task(1, 1);
        assert_eq!(state.status, RunStatus::InProgress);
        assert_eq!(state.current_task, None);

        state.start_task(2);
        state.complete_task(2, 0);
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.completed.len(), 2);
    }

    #[test]
    fn clear_removes_state() {
        let dir = TempDir::new().unwrap();
        let store = ExecutionStateStore::new(TaskStore::new(dir.path()));

        store.save(&ExecutionState::new("auth", 1)).unwrap();
        assert!(store.load("auth").unwrap().is_some());

        store.clear("auth").unwrap();
        assert!(store.load("auth").unwrap().is_none());
        // Clearing twice is fine
        store.clear("auth").unwrap();
    }
}
