//! epc start command implementation
//!
//! Selects the next ready task by priority and pins it in the stored
//! execution state so an interrupted run can be resumed.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::scheduler::Scheduler;
use crate::store::TaskStore;

/// Options for the start command
pub struct StartOptions {
    pub root: PathBuf,
    pub feature: String,
    pub resume: bool,
    pub dry_run: bool,
    pub output: OutputOptions,
}

#[derive(Serialize)]
struct SelectedTask {
    id: u32,
    title: String,
    priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    effort_hours: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<u32>,
}

#[derive(Serialize)]
struct StartReport {
    feature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    task: Option<SelectedTask>,
    run_status: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parallel_candidates: Vec<u32>,
}

pub fn run(options: StartOptions) -> Result<()> {
    let store = TaskStore::new(options.root);
    let mut scheduler = Scheduler::new(store.clone(), &options.feature)?;

    let selected = if options.dry_run {
        scheduler.peek_next(options.resume)?
    } else {
        scheduler.select_next(options.resume)?
    };

    let task = match selected {
        Some(id) => store.read(&options.feature, id)?.map(|record| SelectedTask {
            id,
            title: record.meta.title,
            priority: record.meta.priority,
            effort_hours: record.meta.effort_hours,
            depends_on: record.meta.depends_on,
        }),
        None => None,
    };

    let report = StartReport {
        feature: options.feature.clone(),
        run_status: scheduler.state().status.to_string(),
        parallel_candidates: scheduler.parallel_candidates(),
        task,
    };

    let mut human = match &report.task {
        Some(task) => {
            let mut human = HumanOutput::new(format!(
                "Selected task #{}: {}",
                task.id, task.title
            ));
            human.push_summary("priority", task.priority.clone());
            if let Some(effort) = task.effort_hours {
                human.push_summary("effort", format!("{effort}h"));
            }
            if options.dry_run {
                human.push_detail("dry run: selection not pinned".to_string());
            } else {
                human.push_next_step(format!(
                    "epc complete {} --feature {}",
                    task.id, options.feature
                ));
            }
            human
        }
        None => HumanOutput::new(format!(
            "No ready task for feature '{}' (run status: {})",
            options.feature, report.run_status
        )),
    };
    if !report.parallel_candidates.is_empty() {
        let ids: Vec<String> = report
            .parallel_candidates
            .iter()
            .map(|id| format!("#{id}"))
            .collect();
        human.push_detail(format!("independent ready tasks: {}", ids.join(", ")));
    }

    emit_success(options.output, "start", &report, Some(&human))
}
