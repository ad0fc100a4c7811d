#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use epc::store::TaskStore;
use tempfile::TempDir;

pub struct TestProject {
    dir: TempDir,
}

impl TestProject {
    pub fn init() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn store(&self) -> TaskStore {
        TaskStore::new(self.dir.path())
    }

    pub fn write_epic(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write epic");
        path
    }

    pub fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join(".epc.toml");
        fs::write(&path, contents).expect("write config");
        path
    }

    pub fn record_files(&self, feature: &str) -> Vec<PathBuf> {
        let dir = self.store().tasks_dir(feature);
        if !dir.is_dir() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .expect("read tasks dir")
            .map(|entry| entry.expect("dir entry").path())
            .collect();
        files.sort();
        files
    }
}

/// Three-task epic: 1 <- 2 <- 3 chain with full metadata on task 1
pub const EPIC_V1: &str = "\
# Epic: Session handling

## Task 1: Build the session store
Status: open
Priority: P1
Effort: 6h
Depends on: none

### Features
- persist sessions across restarts
- expire idle sessions

### Workflow
- design the key scheme
- wire into the server

### Tech Specs
- component: SessionStore
- api

### Metadata
- Target file: src/session.rs
- Purpose: durable session state
- Reused assets: storage helpers
- Requirement refs: R4
- Execution prompt: implement the store described above

## Task 2: Expose the session API
Depends on: #1

### Features
- read endpoint
- write endpoint

## Task 3: Add session metrics hooks
Depends on: #2

### Features
- count active sessions
";
