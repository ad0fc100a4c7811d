//! epc decompose command implementation
//!
//! Parses an epic document and reconciles the derived task specs against
//! the feature's persisted records.

use std::fs;
use std::path::PathBuf;

use crate::config::Config;
use crate::epic::parse_epic;
use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::reconcile::{Action, ReconcileReport, ReconciliationEngine};
use crate::store::TaskStore;

/// Options for the decompose command
pub struct DecomposeOptions {
    pub root: PathBuf,
    pub epic: PathBuf,
    pub feature: String,
    pub dry_run: bool,
    pub output: OutputOptions,
}

pub fn run(options: DecomposeOptions) -> Result<()> {
    let report = reconcile_epic(
        &options.root,
        &options.epic,
        &options.feature,
        options.dry_run,
    )?;
    emit_report(
        "decompose",
        &options.feature,
        options.dry_run,
        None,
        &report,
        options.output,
    )
}

/// Shared reconciliation path for decompose and sync
pub(crate) fn reconcile_epic(
    root: &PathBuf,
    epic: &PathBuf,
    feature: &str,
    dry_run: bool,
) -> Result<ReconcileReport> {
    let content = fs::read_to_string(epic)?;
    let specs = parse_epic(&content)?;
    let config = Config::load(root)?;
    let store = TaskStore::new(root.clone());
    let engine = ReconciliationEngine::new(config);
    engine.run(&store, feature, &specs, dry_run)
}

pub(crate) fn emit_report(
    command: &str,
    feature: &str,
    dry_run: bool,
    mirrored: Option<usize>,
    report: &ReconcileReport,
    output: OutputOptions,
) -> Result<()> {
    let header = if dry_run {
        format!("Planned reconciliation for feature '{feature}' (dry run)")
    } else {
        format!("Reconciled feature '{feature}'")
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("kept", report.kept.to_string());
    human.push_summary("updated", report.updated.to_string());
    human.push_summary("created", report.created.to_string());
    human.push_summary("deprecated", report.deprecated.to_string());
    if let Some(created) = mirrored {
        human.push_summary("tracker issues created", created.to_string());
    }

    for outcome in &report.outcomes {
        if outcome.action != Action::Keep {
            human.push_detail(format!("#{}: {:?}", outcome.task_id, outcome.action));
        }
        for warning in &outcome.warnings {
            human.push_warning(warning.clone());
        }
    }
    for (a, b) in &report.conflicts {
        human.push_warning(format!("tasks #{a} and #{b} look like overlapping work"));
    }
    for failure in &report.failures {
        human.push_warning(format!("failed: {failure}"));
    }
    if !report.parallel_candidates.is_empty() {
        let ids: Vec<String> = report
            .parallel_candidates
            .iter()
            .map(|id| format!("#{id}"))
            .collect();
        human.push_detail(format!("independent ready tasks: {}", ids.join(", ")));
    }
    if !dry_run {
        human.push_next_step(format!("epc start --feature {feature}"));
    }

    emit_success(output, command, report, Some(&human))
}
