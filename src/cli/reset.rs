//! epc reset command implementation
//!
//! Discards the stored execution state so the next start begins a fresh
//! scheduling run. Task records are untouched.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::state::ExecutionStateStore;
use crate::store::TaskStore;

/// Options for the reset command
pub struct ResetOptions {
    pub root: PathBuf,
    pub feature: String,
    pub output: OutputOptions,
}

#[derive(Serialize)]
struct ResetReport {
    feature: String,
    cleared: bool,
}

pub fn run(options: ResetOptions) -> Result<()> {
    let store = TaskStore::new(options.root);
    if !store.feature_exists(&options.feature) {
        return Err(Error::FeatureNotFound(options.feature));
    }
    let state_store = ExecutionStateStore::new(store);
    let cleared = state_store.load(&options.feature)?.is_some();
    state_store.clear(&options.feature)?;

    let report = ResetReport {
        feature: options.feature.clone(),
        cleared,
    };
    let header = if cleared {
        format!("Cleared execution state for feature '{}'", options.feature)
    } else {
        format!("No execution state stored for feature '{}'", options.feature)
    };
    let mut human = HumanOutput::new(header);
    human.push_next_step(format!("epc start --feature {}", options.feature));

    emit_success(options.output, "reset", &report, Some(&human))
}
