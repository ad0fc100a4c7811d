//! Task record and task spec data model.
//!
//! Task records are persisted as markdown files with a TOML frontmatter
//! block delimited by `+++` lines, one file per task under
//! `.epc/<feature>/tasks/`. Task specs are the ephemeral counterpart derived
//! from an Epic document; they exist only within one reconciliation run.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Frontmatter delimiter line
const FRONTMATTER_DELIM: &str = "+++";

const DEFAULT_TASK_PRIORITY: &str = "P2";
const TASK_PRIORITIES: [&str; 5] = ["P0", "P1", "P2", "P3", "P4"];

/// Reason attached to records deprecated by orphan detection
pub const ORPHAN_REASON: &str = "no matching spec found in current source";

fn default_task_priority() -> String {
    DEFAULT_TASK_PRIORITY.to_string()
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
}

impl TaskStatus {
    /// Statuses that shield a record from content updates during
    /// reconciliation: work already started is never rewritten.
    pub fn is_locked_in(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Completed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Open => write!(f, "open"),
            TaskStatus::InProgress => write!(f, "in-progress"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Ok(TaskStatus::Open),
            "in-progress" | "in_progress" => Ok(TaskStatus::InProgress),
            "completed" | "done" => Ok(TaskStatus::Completed),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid task status '{s}'. Expected: open, in-progress, completed"
            ))),
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Open
    }
}

/// Rank a P0-P4 priority string; unknown values sort last
pub fn priority_rank(priority: &str) -> usize {
    let trimmed = priority.trim();
    TASK_PRIORITIES
        .iter()
        .position(|entry| entry.eq_ignore_ascii_case(trimmed))
        .unwrap_or(TASK_PRIORITIES.len())
}

/// Normalize a priority string to its canonical P0-P4 form
pub fn normalize_priority(priority: &str) -> Result<String> {
    let trimmed = priority.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("priority cannot be empty".to_string()));
    }
    let normalized = trimmed.to_ascii_uppercase();
    if TASK_PRIORITIES.iter().any(|value| value == &normalized) {
        Ok(normalized)
    } else {
        Err(Error::InvalidArgument(format!(
            "unknown task priority '{trimmed}' (expected P0-P4)"
        )))
    }
}

/// Required metadata fields on a task spec
///
/// Missing fields never fail a run; the resulting record is flagged for
/// manual completion instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecMetadata {
    pub target_file: Option<String>,
    pub purpose: Option<String>,
    pub reused_assets: Option<String>,
    pub requirement_refs: Option<String>,
    pub execution_prompt: Option<String>,
}

impl SpecMetadata {
    /// Names of required fields that are absent or blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let checks: [(&'static str, &Option<String>); 5] = [
            ("target_file", &self.target_file),
            ("purpose", &self.purpose),
            ("reused_assets", &self.reused_assets),
            ("requirement_refs", &self.requirement_refs),
            ("execution_prompt", &self.execution_prompt),
        ];
        for (name, value) in checks {
            if value.as_deref().map(str::trim).unwrap_or("").is_empty() {
                missing.push(name);
            }
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Ephemeral task description derived from an Epic document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub status_hint: Option<TaskStatus>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub workflow: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<u32>,
    /// Tech-spec categories present in the spec (e.g. component, api, state)
    #[serde(default)]
    pub specs: Vec<String>,
    #[serde(default)]
    pub metadata: SpecMetadata,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub effort_hours: Option<u32>,
}

impl TaskSpec {
    pub fn new(id: u32, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            status_hint: None,
            features: Vec::new(),
            workflow: Vec::new(),
            depends_on: Vec::new(),
            specs: Vec::new(),
            metadata: SpecMetadata::default(),
            priority: None,
            effort_hours: None,
        }
    }

    /// Spec categories as an ordered set
    pub fn spec_categories(&self) -> BTreeSet<String> {
        self.specs
            .iter()
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .collect()
    }
}

/// Frontmatter portion of a persisted task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "default_task_priority")]
    pub priority: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<u32>,
    /// Advisory only: marks the task as safe to run alongside other ready
    /// tasks. Never an instruction to actually run two tasks at once.
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<u32>,
    /// Set when the source spec was missing required metadata
    #[serde(default)]
    pub needs_manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort_hours: Option<u32>,
}

/// Structured body sections of a task record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskBody {
    pub features: Vec<String>,
    pub workflow: Vec<String>,
    pub acceptance: Vec<String>,
    pub specs: Vec<String>,
    pub dependencies: Vec<String>,
    pub effort: Vec<String>,
    pub definition_of_done: Vec<String>,
    pub notes: Vec<String>,
}

const SECTION_FEATURES: &str = "Features";
const SECTION_WORKFLOW: &str = "Workflow";
const SECTION_ACCEPTANCE: &str = "Acceptance Criteria";
const SECTION_SPECS: &str = "Tech Specs";
const SECTION_DEPENDENCIES: &str = "Dependencies";
const SECTION_EFFORT: &str = "Effort";
const SECTION_DOD: &str = "Definition of Done";
const SECTION_NOTES: &str = "Implementation Notes";

/// Persisted on-disk representation of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub meta: RecordMeta,
    pub body: TaskBody,
}

impl TaskRecord {
    /// Create a fresh record from a spec (the CREATE action)
    pub fn from_spec(spec: &TaskSpec, now: DateTime<Utc>) -> Self {
        let priority = spec
            .priority
            .as_deref()
            .and_then(|value| normalize_priority(value).ok())
            .unwrap_or_else(default_task_priority);
        let mut depends_on = spec.depends_on.clone();
        depends_on.sort_unstable();
        depends_on.dedup();
        let dependencies = depends_on.iter().map(|id| format!("#{id}")).collect();
        TaskRecord {
            meta: RecordMeta {
                id: spec.id,
                title: spec.title.clone(),
                status: spec.status_hint.unwrap_or_default(),
                priority,
                created: now,
                updated: now,
                external_ref: None,
                depends_on,
                parallel: false,
                deprecated: false,
                deprecated_reason: None,
                conflicts_with: Vec::new(),
                needs_manual: !spec.metadata.is_complete(),
                effort_hours: spec.effort_hours,
            },
            body: TaskBody {
                features: spec.features.clone(),
                workflow: spec.workflow.clone(),
                acceptance: Vec::new(),
                specs: spec.specs.clone(),
                dependencies,
                effort: spec
                    .effort_hours
                    .map(|hours| vec![format!("Estimated: {hours}h")])
                    .unwrap_or_default(),
                definition_of_done: Vec::new(),
                notes: Vec::new(),
            },
        }
    }

    /// Spec categories present in the record body, as an ordered set.
    /// A category is the text of a Tech Specs bullet up to the first colon.
    pub fn spec_categories(&self) -> BTreeSet<String> {
        self.body
            .specs
            .iter()
            .filter_map(|line| {
                let head = line.split(':').next().unwrap_or(line);
                let category = head.trim().to_lowercase();
                if category.is_empty() {
                    None
                } else {
                    Some(category)
                }
            })
            .collect()
    }

    /// View of this record shaped like a spec, for record-to-record scoring
    pub fn as_spec(&self) -> TaskSpec {
        TaskSpec {
            id: self.meta.id,
            title: self.meta.title.clone(),
            status_hint: Some(self.meta.status),
            features: self.body.features.clone(),
            workflow: self.body.workflow.clone(),
            depends_on: self.meta.depends_on.clone(),
            specs: self.spec_categories().into_iter().collect(),
            metadata: SpecMetadata::default(),
            priority: Some(self.meta.priority.clone()),
            effort_hours: self.meta.effort_hours,
        }
    }

    /// Mark this record deprecated with a reason; never removes content
    pub fn deprecate(&mut self, reason: &str, now: DateTime<Utc>) {
        self.meta.deprecated = true;
        self.meta.deprecated_reason = Some(reason.to_string());
        self.meta.updated = now;
    }

    // =========================================================================
    // File format
    // =========================================================================

    /// Serialize to the markdown+frontmatter file format
    pub fn to_markdown(&self) -> Result<String> {
        let frontmatter = toml::to_string(&self.meta)?;
        let mut out = String::new();
        out.push_str(FRONTMATTER_DELIM);
        out.push('\n');
        out.push_str(&frontmatter);
        out.push_str(FRONTMATTER_DELIM);
        out.push('\n');
        out.push('\n');
        out.push_str(&format!("# Task {}: {}\n", self.meta.id, self.meta.title));

        let sections: [(&str, &Vec<String>); 8] = [
            (SECTION_FEATURES, &self.body.features),
            (SECTION_WORKFLOW, &self.body.workflow),
            (SECTION_ACCEPTANCE, &self.body.acceptance),
            (SECTION_SPECS, &self.body.specs),
            (SECTION_DEPENDENCIES, &self.body.dependencies),
            (SECTION_EFFORT, &self.body.effort),
            (SECTION_DOD, &self.body.definition_of_done),
            (SECTION_NOTES, &self.body.notes),
        ];
        for (heading, lines) in sections {
            if lines.is_empty() {
                continue;
            }
            out.push('\n');
            out.push_str(&format!("## {heading}\n"));
            for line in lines {
                out.push_str(&format!("- {line}\n"));
            }
        }
        Ok(out)
    }

    /// Parse the markdown+frontmatter file format
    pub fn from_markdown(content: &str, path: &std::path::Path) -> Result<Self> {
        let malformed = |reason: &str| Error::MalformedRecord {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let mut lines = content.lines();
        if lines.next().map(str::trim) != Some(FRONTMATTER_DELIM) {
            return Err(malformed("missing opening frontmatter delimiter"));
        }
        let mut frontmatter = String::new();
        let mut closed = false;
        for line in lines.by_ref() {
            if line.trim() == FRONTMATTER_DELIM {
                closed = true;
                break;
            }
            frontmatter.push_str(line);
            frontmatter.push('\n');
        }
        if !closed {
            return Err(malformed("missing closing frontmatter delimiter"));
        }
        let meta: RecordMeta = toml::from_str(&frontmatter)?;

        let mut body = TaskBody::default();
        let mut current: Option<&mut Vec<String>> = None;
        for line in lines {
            let trimmed = line.trim();
            if let Some(heading) = trimmed.strip_prefix("## ") {
                current = match heading.trim() {
                    SECTION_FEATURES => Some(&mut body.features),
                    SECTION_WORKFLOW => Some(&mut body.workflow),
                    SECTION_ACCEPTANCE => Some(&mut body.acceptance),
                    SECTION_SPECS => Some(&mut body.specs),
                    SECTION_DEPENDENCIES => Some(&mut body.dependencies),
                    SECTION_EFFORT => Some(&mut body.effort),
                    SECTION_DOD => Some(&mut body.definition_of_done),
                    SECTION_NOTES => Some(&mut body.notes),
                    _ => None,
                };
                continue;
            }
            if let Some(item) = trimmed.strip_prefix("- ") {
                if let Some(section) = current.as_deref_mut() {
                    section.push(item.to_string());
                }
            }
        }

        Ok(TaskRecord { meta, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TaskRecord {
        let mut spec = TaskSpec::new(3, "Build the session cache");
        spec.features = vec!["[ ] cache reads".to_string(), "[ ] cache writes".to_string()];
        spec.workflow = vec!["design the key scheme".to_string()];
        spec.depends_on = vec![1, 2];
        spec.specs = vec!["component".to_string(), "state".to_string()];
        spec.effort_hours = Some(6);
        TaskRecord::from_spec(&spec, Utc::now())
    }

    #[test]
    fn markdown_round_trip_preserves_record() {
        let mut record = sample_record();
        record.meta.external_ref = Some("TRACK-42".to_string());
        record.meta.conflicts_with = vec![7];
        record.body.notes = vec!["used the existing pool".to_string()];

        let text = record.to_markdown().expect("serialize");
        let parsed =
            TaskRecord::from_markdown(&text, std::path::Path::new("3.md")).expect("parse");
        assert_eq!(parsed, record);
    }

    #[test]
    fn missing_frontmatter_is_malformed() {
        let err = TaskRecord::from_markdown("# no frontmatter", std::path::Path::new("x.md"))
            .expect_err("malformed");
        assert!(matches!(err, Error::MalformedRecord { .. }));
    }

    #[test]
    fn from_spec_flags_incomplete_metadata() {
        let spec = TaskSpec::new(1, "Partial");
        let record = TaskRecord::from_spec(&spec, Utc::now());
        assert!(record.meta.needs_manual);
        assert_eq!(spec.metadata.missing_fields().len(), 5);
    }

    #[test]
    fn spec_categories_strip_details() {
        let mut record = sample_record();
        record.body.specs = vec![
            "component: SessionCache".to_string(),
            "API: get/put".to_string(),
            "state".to_string(),
        ];
        let categories: Vec<String> = record.spec_categories().into_iter().collect();
        assert_eq!(categories, vec!["api", "component", "state"]);
    }

    #[test]
    fn status_parsing_accepts_aliases() {
        assert_eq!(
            TaskStatus::from_str("in_progress").expect("parse"),
            TaskStatus::InProgress
        );
        assert_eq!(TaskStatus::from_str("done").expect("parse"), TaskStatus::Completed);
        assert!(TaskStatus::from_str("bogus").is_err());
    }

    #[test]
    fn priority_rank_orders_p0_first() {
        assert!(priority_rank("P0") < priority_rank("P4"));
        assert_eq!(normalize_priority("p1").expect("normalize"), "P1");
        assert!(normalize_priority("P9").is_err());
    }
}
