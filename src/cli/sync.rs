//! epc sync command implementation
//!
//! Re-reconciles an existing feature against its epic document, then
//! mirrors the resulting records through the issue-tracker boundary. The
//! only backend shipped is the recording one; real tracker CRUD lives
//! behind the trait.

use std::path::PathBuf;

use crate::cli::decompose;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputOptions;
use crate::store::TaskStore;
use crate::tracker::{mirror_records, NullTracker, PacedTracker};

/// Options for the sync command
pub struct SyncOptions {
    pub root: PathBuf,
    pub epic: PathBuf,
    pub feature: String,
    pub dry_run: bool,
    pub output: OutputOptions,
}

pub fn run(options: SyncOptions) -> Result<()> {
    let store = TaskStore::new(options.root.clone());
    if !store.feature_exists(&options.feature) {
        return Err(Error::FeatureNotFound(options.feature));
    }
    let report = decompose::reconcile_epic(
        &options.root,
        &options.epic,
        &options.feature,
        options.dry_run,
    )?;

    let mirrored = if options.dry_run {
        None
    } else {
        Some(mirror_to_tracker(&store, &options.root, &options.feature)?)
    };

    decompose::emit_report(
        "sync",
        &options.feature,
        options.dry_run,
        mirrored,
        &report,
        options.output,
    )
}

/// Mirror non-deprecated records into the tracker, persisting any newly
/// assigned references. Returns the number of issues created.
fn mirror_to_tracker(store: &TaskStore, root: &PathBuf, feature: &str) -> Result<usize> {
    let config = Config::load(root)?;
    let tracker = PacedTracker::new(NullTracker::new(), &config.tracker);

    let records: Vec<_> = store
        .read_all(feature)?
        .into_iter()
        .filter(|record| !record.meta.deprecated)
        .collect();
    let created = mirror_records(&tracker, &records)?;

    for (id, issue) in &created {
        if let Some(mut record) = store.read(feature, *id)? {
            record.meta.external_ref = Some(issue.to_string());
            store.write(feature, &record)?;
        }
    }
    Ok(created.len())
}
