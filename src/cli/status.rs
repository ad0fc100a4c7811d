//! epc status command implementation
//!
//! Read-only view of task states and scheduling progress. Works even when
//! the dependency graph is cyclic so the cycle can be inspected.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, TaskState};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::state::ExecutionStateStore;
use crate::store::TaskStore;

/// Options for the status command
pub struct StatusOptions {
    pub root: PathBuf,
    pub feature: String,
    pub output: OutputOptions,
}

#[derive(Serialize)]
struct TaskLine {
    id: u32,
    title: String,
    priority: String,
    state: TaskState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conflicts_with: Vec<u32>,
    needs_manual: bool,
}

#[derive(Serialize)]
struct StatusReport {
    feature: String,
    run_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_task: Option<u32>,
    completed: usize,
    total: usize,
    tasks: Vec<TaskLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cycle: Option<Vec<String>>,
}

pub fn run(options: StatusOptions) -> Result<()> {
    let store = TaskStore::new(options.root);
    let records = store.read_all(&options.feature)?;
    if records.is_empty() {
        return Err(Error::FeatureNotFound(options.feature));
    }

    let state = ExecutionStateStore::new(store.clone()).load(&options.feature)?;
    let completed_set = state
        .as_ref()
        .map(|s| s.completed.clone())
        .unwrap_or_default();

    let graph = DependencyGraph::build(&records);
    let cycle = match graph.detect_cycles() {
        Ok(()) => None,
        Err(Error::CycleDetected { cycle }) => Some(cycle),
        Err(other) => return Err(other),
    };
    let states = graph.classify(&completed_set);

    let tasks: Vec<TaskLine> = records
        .iter()
        .map(|record| TaskLine {
            id: record.meta.id,
            title: record.meta.title.clone(),
            priority: record.meta.priority.clone(),
            state: states[&record.meta.id],
            depends_on: record.meta.depends_on.clone(),
            conflicts_with: record.meta.conflicts_with.clone(),
            needs_manual: record.meta.needs_manual,
        })
        .collect();

    let total = records.iter().filter(|r| !r.meta.deprecated).count();
    let report = StatusReport {
        feature: options.feature.clone(),
        run_status: state
            .as_ref()
            .map(|s| s.status.to_string())
            .unwrap_or_else(|| "pending".to_string()),
        current_task: state.as_ref().and_then(|s| s.current_task),
        completed: completed_set.len(),
        total,
        tasks,
        cycle,
    };

    let mut human = HumanOutput::new(format!("Feature '{}'", options.feature));
    human.push_summary("run", report.run_status.clone());
    human.push_summary(
        "progress",
        format!("{}/{} tasks", report.completed, report.total),
    );
    if let Some(current) = report.current_task {
        human.push_summary("in flight", format!("#{current}"));
    }
    for task in &report.tasks {
        let state_name = serde_json::to_string(&task.state)?;
        let mut line = format!(
            "#{} [{}] {} ({})",
            task.id,
            state_name.trim_matches('"'),
            task.title,
            task.priority
        );
        if task.needs_manual {
            line.push_str(" [needs manual]");
        }
        human.push_detail(line);
    }
    if let Some(cycle) = &report.cycle {
        human.push_warning(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    emit_success(options.output, "status", &report, Some(&human))
}
