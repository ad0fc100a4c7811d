//! Structural parsing of Epic documents into task specs.
//!
//! The Epic format is deliberately mechanical: `## Task N: Title` headings,
//! `Key: value` preamble lines, and `### Section` bullet lists. No prose
//! interpretation happens here; extraction is tokenized text only.
//!
//! ```text
//! # Epic: Session handling
//!
//! ## Task 1: Build the session store
//! Status: open
//! Priority: P1
//! Effort: 6h
//! Depends on: none
//!
//! ### Features
//! - persist sessions across restarts
//!
//! ### Workflow
//! - design the key scheme
//!
//! ### Tech Specs
//! - component: SessionStore
//! - api
//!
//! ### Metadata
//! - Target file: src/session.rs
//! - Purpose: durable session state
//! - Reused assets: storage helpers
//! - Requirement refs: R4
//! - Execution prompt: implement the store described above
//! ```

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::record::{normalize_priority, TaskSpec, TaskStatus};

/// Parse an Epic document into its ordered list of task specs
pub fn parse_epic(content: &str) -> Result<Vec<TaskSpec>> {
    let mut specs: Vec<TaskSpec> = Vec::new();
    let mut seen_ids = BTreeSet::new();
    let mut section = Section::None;

    for (line_no, raw) in content.lines().enumerate() {
        let line = raw.trim();

        if let Some(heading) = line.strip_prefix("## ") {
            let (id, title) = parse_task_heading(heading, line_no + 1)?;
            if !seen_ids.insert(id) {
                return Err(Error::MalformedEpic(format!(
                    "duplicate task id #{id} at line {}",
                    line_no + 1
                )));
            }
            specs.push(TaskSpec::new(id, title));
            section = Section::Preamble;
            continue;
        }

        let Some(spec) = specs.last_mut() else {
            continue;
        };

        if let Some(heading) = line.strip_prefix("### ") {
            section = match heading.trim().to_lowercase().as_str() {
                "features" => Section::Features,
                "workflow" => Section::Workflow,
                "tech specs" => Section::Specs,
                "metadata" => Section::Metadata,
                _ => Section::None,
            };
            continue;
        }

        match section {
            Section::Preamble => parse_preamble_line(spec, line)?,
            Section::Features => {
                if let Some(item) = bullet(line) {
                    spec.features.push(item.to_string());
                }
            }
            Section::Workflow => {
                if let Some(item) = bullet(line) {
                    spec.workflow.push(item.to_string());
                }
            }
            Section::Specs => {
                if let Some(item) = bullet(line) {
                    spec.specs.push(item.to_string());
                }
            }
            Section::Metadata => {
                if let Some(item) = bullet(line) {
                    parse_metadata_line(spec, item);
                }
            }
            Section::None => {}
        }
    }

    if specs.is_empty() {
        return Err(Error::MalformedEpic("no task headings found".to_string()));
    }
    Ok(specs)
}

enum Section {
    None,
    Preamble,
    Features,
    Workflow,
    Specs,
    Metadata,
}

fn bullet(line: &str) -> Option<&str> {
    line.strip_prefix("- ").map(str::trim)
}

fn parse_task_heading(heading: &str, line_no: usize) -> Result<(u32, &str)> {
    let rest = heading.trim().strip_prefix("Task ").ok_or_else(|| {
        Error::MalformedEpic(format!(
            "expected '## Task N: Title' at line {line_no}, got '## {heading}'"
        ))
    })?;
    let (number, title) = rest.split_once(':').ok_or_else(|| {
        Error::MalformedEpic(format!("missing ':' in task heading at line {line_no}"))
    })?;
    let id: u32 = number.trim().trim_start_matches('#').parse().map_err(|_| {
        Error::MalformedEpic(format!("invalid task number '{number}' at line {line_no}"))
    })?;
    let title = title.trim();
    if title.is_empty() {
        return Err(Error::MalformedEpic(format!(
            "empty task title at line {line_no}"
        )));
    }
    Ok((id, title))
}

fn parse_preamble_line(spec: &mut TaskSpec, line: &str) -> Result<()> {
    let Some((key, value)) = line.split_once(':') else {
        return Ok(());
    };
    let value = value.trim();
    match key.trim().to_lowercase().as_str() {
        "status" => {
            spec.status_hint = Some(TaskStatus::from_str(value)?);
        }
        "priority" => {
            spec.priority = Some(normalize_priority(value)?);
        }
        "effort" => {
            let digits = value.trim_end_matches(|ch: char| !ch.is_ascii_digit());
            spec.effort_hours = digits.parse().ok();
        }
        "depends on" => {
            if value.eq_ignore_ascii_case("none") {
                return Ok(());
            }
            for part in value.split(',') {
                let id: u32 = part
                    .trim()
                    .trim_start_matches('#')
                    .parse()
                    .map_err(|_| {
                        Error::MalformedEpic(format!("invalid dependency id '{part}'"))
                    })?;
                spec.depends_on.push(id);
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_metadata_line(spec: &mut TaskSpec, item: &str) {
    let Some((key, value)) = item.split_once(':') else {
        return;
    };
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    let slot = match key.trim().to_lowercase().as_str() {
        "target file" => &mut spec.metadata.target_file,
        "purpose" => &mut spec.metadata.purpose,
        "reused assets" => &mut spec.metadata.reused_assets,
        "requirement refs" => &mut spec.metadata.requirement_refs,
        "execution prompt" => &mut spec.metadata.execution_prompt,
        _ => return,
    };
    *slot = Some(value.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPIC: &str = "\
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
";

    #[test]
    fn parses_tasks_with_sections() {
        let specs = parse_epic(EPIC).expect("parse");
        assert_eq!(specs.len(), 2);

        let first = &specs[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.title, "Build the session store");
        assert_eq!(first.status_hint, Some(TaskStatus::Open));
        assert_eq!(first.priority.as_deref(), Some("P1"));
        assert_eq!(first.effort_hours, Some(6));
        assert!(first.depends_on.is_empty());
        assert_eq!(first.features.len(), 2);
        assert_eq!(first.workflow.len(), 2);
        assert_eq!(first.specs, vec!["component: SessionStore", "api"]);
        assert!(first.metadata.is_complete());

        let second = &specs[1];
        assert_eq!(second.depends_on, vec![1]);
        assert!(!second.metadata.is_complete());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let doc = "## Task 1: A\n\n## Task 1: B\n";
        let err = parse_epic(doc).expect_err("duplicate");
        assert!(matches!(err, Error::MalformedEpic(_)));
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(matches!(
            parse_epic("just prose\n"),
            Err(Error::MalformedEpic(_))
        ));
    }

    #[test]
    fn invalid_dependency_id_is_rejected() {
        let doc = "## Task 1: A\nDepends on: #x\n";
        assert!(matches!(parse_epic(doc), Err(Error::MalformedEpic(_))));
    }
}
