//! epc complete command implementation
//!
//! Marks a task completed, persists the record and scheduler state, and
//! reports which tasks became ready as a result.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::scheduler::Scheduler;
use crate::store::TaskStore;

/// Options for the complete command
pub struct CompleteOptions {
    pub root: PathBuf,
    pub feature: String,
    pub task: u32,
    pub output: OutputOptions,
}

#[derive(Serialize)]
struct CompleteReport {
    feature: String,
    task: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    newly_ready: Vec<u32>,
    run_status: String,
    completed: usize,
    total: usize,
}

pub fn run(options: CompleteOptions) -> Result<()> {
    let store = TaskStore::new(options.root);
    let mut scheduler = Scheduler::new(store, &options.feature)?;
    let newly_ready = scheduler.on_complete(options.task)?;

    let state = scheduler.state();
    let report = CompleteReport {
        feature: options.feature.clone(),
        task: options.task,
        newly_ready,
        run_status: state.status.to_string(),
        completed: state.completed.len(),
        total: state.total_tasks,
    };

    let mut human = HumanOutput::new(format!("Completed task #{}", options.task));
    human.push_summary(
        "progress",
        format!("{}/{} tasks", report.completed, report.total),
    );
    if report.newly_ready.is_empty() {
        if report.run_status == "completed" {
            human.push_detail("all tasks complete".to_string());
        }
    } else {
        let ids: Vec<String> = report
            .newly_ready
            .iter()
            .map(|id| format!("#{id}"))
            .collect();
        human.push_detail(format!("now ready: {}", ids.join(", ")));
        human.push_next_step(format!("epc start --feature {}", options.feature));
    }

    emit_success(options.output, "complete", &report, Some(&human))
}
