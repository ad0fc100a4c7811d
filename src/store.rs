//! Task record repository.
//!
//! Records live under `.epc/<feature>/tasks/<id>.md`, one markdown file per
//! task. The reconciliation and scheduling layers only ever see
//! [`TaskRecord`] values through this interface, so the storage medium can
//! be swapped without touching them.
//!
//! # Directory Structure
//!
//! ```text
//! .epc/
//!   <feature>/
//!     tasks/
//!       1.md                  # Task records (frontmatter + sections)
//!       2.md
//!     state.json              # Scheduler execution state
//!     feature.lock            # Reconciliation lock (present while held)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::lock::write_atomic_str;
use crate::record::TaskRecord;

/// Name of the epc state directory at the project root
pub const EPC_DIR: &str = ".epc";

/// Repository for task records and per-feature files
#[derive(Debug, Clone)]
pub struct TaskStore {
    root: PathBuf,
}

impl TaskStore {
    /// Create a store rooted at the project directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn epc_dir(&self) -> PathBuf {
        self.root.join(EPC_DIR)
    }

    pub fn feature_dir(&self, feature: &str) -> PathBuf {
        self.epc_dir().join(feature)
    }

    pub fn tasks_dir(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join("tasks")
    }

    pub fn lock_file(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join("feature.lock")
    }

    pub fn state_file(&self, feature: &str) -> PathBuf {
        self.feature_dir(feature).join("state.json")
    }

    pub fn record_path(&self, feature: &str, id: u32) -> PathBuf {
        self.tasks_dir(feature).join(format!("{id}.md"))
    }

    pub fn ensure_dirs(&self, feature: &str) -> Result<()> {
        fs::create_dir_all(self.tasks_dir(feature))?;
        Ok(())
    }

    /// Whether the feature has any persisted records
    pub fn feature_exists(&self, feature: &str) -> bool {
        self.tasks_dir(feature).is_dir()
    }

    /// Read every task record for a feature, sorted by id.
    ///
    /// Deprecated records are included; filtering is the caller's concern.
    pub fn read_all(&self, feature: &str) -> Result<Vec<TaskRecord>> {
        let dir = self.tasks_dir(feature);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            records.push(TaskRecord::from_markdown(&content, &path)?);
        }
        records.sort_by_key(|record| record.meta.id);
        Ok(records)
    }

    /// Read a single record by id
    pub fn read(&self, feature: &str, id: u32) -> Result<Option<TaskRecord>> {
        let path = self.record_path(feature, id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(TaskRecord::from_markdown(&content, &path)?))
    }

    /// Persist a record atomically (temp file + rename).
    ///
    /// On failure the previous file contents are untouched and the error is
    /// surfaced to the caller.
    pub fn write(&self, feature: &str, record: &TaskRecord) -> Result<()> {
        self.ensure_dirs(feature)?;
        let path = self.record_path(feature, record.meta.id);
        let content = record.to_markdown()?;
        write_atomic_str(&path, &content)
    }
}
