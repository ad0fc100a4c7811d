//! The reconciliation engine.
//!
//! Diffs an Epic's derived task specs against the persisted records for a
//! feature and decides KEEP/UPDATE/CREATE per spec, plus DEPRECATE for
//! orphaned records. Matching is existence-first: a spec that matches an
//! existing record by id or by similarity is never allowed to create a
//! second record, no matter how low the score.
//!
//! A run is guarded by the feature lock, detects dependency cycles before
//! any write, continues past per-spec failures, and reports everything in a
//! single summary.

use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::conflict::ConflictDetector;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::lock::FeatureLock;
use crate::record::{TaskRecord, TaskSpec, TaskStatus, ORPHAN_REASON};
use crate::similarity::{normalize_phrase, SimilarityEngine};
use crate::store::TaskStore;

/// Reconciliation decision for one spec or record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Keep,
    Update,
    Create,
    Deprecate,
}

/// Per-spec outcome in the run report
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub task_id: u32,
    pub action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Summary of one reconciliation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub feature: String,
    pub kept: usize,
    pub updated: usize,
    pub created: usize,
    pub deprecated: usize,
    pub outcomes: Vec<Outcome>,
    /// Per-spec and per-write failures; the run continues past these
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    /// Conflict pairs flagged by the secondary similarity pass
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<(u32, u32)>,
    /// Advisory: ready tasks that could run independently
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parallel_candidates: Vec<u32>,
    /// True when no file was modified (second run over unchanged input)
    pub unchanged: bool,
}

/// Engine holding the scoring configuration
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    engine: SimilarityEngine,
    config: Config,
}

/// A match found for a spec, with any warning raised while matching
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub record_id: Option<u32>,
    pub warning: Option<String>,
    /// Other records that also cleared the threshold (ambiguous match)
    pub runners_up: Vec<u32>,
}

impl ReconciliationEngine {
    pub fn new(config: Config) -> Self {
        Self {
            engine: SimilarityEngine::new(config.weights.clone()),
            config,
        }
    }

    pub fn similarity(&self) -> &SimilarityEngine {
        &self.engine
    }

    // =========================================================================
    // Matching
    // =========================================================================

    /// Find the existing record a spec corresponds to: exact id first, then
    /// title similarity, then content similarity. Returns the best match or
    /// none; two or more candidates above a threshold is an ambiguity
    /// warning, resolved in favor of the highest score (lowest id on ties).
    pub fn match_existing(&self, spec: &TaskSpec, records: &[TaskRecord]) -> MatchResult {
        if records.iter().any(|record| record.meta.id == spec.id) {
            return MatchResult {
                record_id: Some(spec.id),
                warning: None,
                runners_up: Vec::new(),
            };
        }

        let by_title = self.best_above(records, |record| {
            self.engine.title_similarity(&spec.title, &record.meta.title)
        }, self.config.thresholds.title);
        if let Some(result) = self.resolve_candidates(spec, by_title, "title") {
            return result;
        }

        let by_content = self.best_above(records, |record| {
            self.engine.score(spec, record).composite
        }, self.config.thresholds.content);
        if let Some(result) = self.resolve_candidates(spec, by_content, "content") {
            return result;
        }

        MatchResult {
            record_id: None,
            warning: None,
            runners_up: Vec::new(),
        }
    }

    /// Candidates scoring at or above a threshold, best first
    fn best_above<F>(&self, records: &[TaskRecord], score: F, threshold: f64) -> Vec<(u32, f64)>
    where
        F: Fn(&TaskRecord) -> f64,
    {
        let mut candidates: Vec<(u32, f64)> = records
            .iter()
            .filter(|record| !record.meta.deprecated)
            .map(|record| (record.meta.id, score(record)))
            .filter(|(_, value)| *value >= threshold)
            .collect();
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates
    }

    fn resolve_candidates(
        &self,
        spec: &TaskSpec,
        candidates: Vec<(u32, f64)>,
        dimension: &str,
    ) -> Option<MatchResult> {
        match candidates.len() {
            0 => None,
            1 => Some(MatchResult {
                record_id: Some(candidates[0].0),
                warning: None,
                runners_up: Vec::new(),
            }),
            _ => {
                let ids: Vec<String> = candidates
                    .iter()
                    .map(|(id, _)| format!("#{id}"))
                    .collect();
                Some(MatchResult {
                    record_id: Some(candidates[0].0),
                    warning: Some(format!(
                        "spec #{} matches multiple records by {dimension} ({}); using #{}",
                        spec.id,
                        ids.join(", "),
                        candidates[0].0
                    )),
                    runners_up: candidates[1..].iter().map(|(id, _)| *id).collect(),
                })
            }
        }
    }

    // =========================================================================
    // Decisions
    // =========================================================================

    /// Decide the action for a spec given its match.
    ///
    /// Existence-first invariant: a matched record never yields CREATE. A
    /// tentative CREATE re-scans the current record set once more before
    /// committing, switching to UPDATE if a match has appeared.
    pub fn decide_action(
        &self,
        spec: &TaskSpec,
        matched: Option<&TaskRecord>,
        records: &[TaskRecord],
    ) -> (Action, Option<u32>) {
        let Some(matched) = matched else {
            // Re-verify before creating: a record may have appeared since
            // the first scan (e.g. created for an earlier spec this run).
            let rescan = self.match_existing(spec, records);
            return match rescan.record_id {
                Some(id) => (Action::Update, Some(id)),
                None => (Action::Create, None),
            };
        };

        if matched.meta.status.is_locked_in() {
            return (Action::Keep, Some(matched.meta.id));
        }
        let score = self.engine.score(spec, matched);
        if score.missing_specs >= 2 && matched.meta.status == TaskStatus::Open {
            return (Action::Update, Some(matched.meta.id));
        }
        if score.composite >= self.config.thresholds.keep {
            (Action::Keep, Some(matched.meta.id))
        } else {
            (Action::Update, Some(matched.meta.id))
        }
    }

    // =========================================================================
    // Merging
    // =========================================================================

    /// Merge a spec into an existing record: add what is missing, never
    /// remove. Completed checklist items and implementation notes survive
    /// untouched. The updated timestamp is the caller's concern so that an
    /// unchanged merge stays byte-identical.
    pub fn merge(&self, existing: &TaskRecord, spec: &TaskSpec) -> TaskRecord {
        let mut merged = existing.clone();

        append_missing_phrases(&mut merged.body.features, &spec.features);
        append_missing_phrases(&mut merged.body.workflow, &spec.workflow);

        let existing_categories = merged.spec_categories();
        for entry in &spec.specs {
            let category = entry
                .split(':')
                .next()
                .unwrap_or(entry)
                .trim()
                .to_lowercase();
            if !category.is_empty() && !existing_categories.contains(&category) {
                merged.body.specs.push(entry.clone());
            }
        }

        for &dep in &spec.depends_on {
            if !merged.meta.depends_on.contains(&dep) {
                merged.meta.depends_on.push(dep);
                merged.body.dependencies.push(format!("#{dep}"));
            }
        }
        merged.meta.depends_on.sort_unstable();

        // A spec that reappeared revives an orphaned record
        if merged.meta.deprecated {
            merged.meta.deprecated = false;
            merged.meta.deprecated_reason = None;
        }
        merged.meta.needs_manual = !spec.metadata.is_complete();

        merged
    }

    // =========================================================================
    // Orphans
    // =========================================================================

    /// Records with no id, title, or content match against any current spec
    pub fn detect_orphans(&self, records: &[TaskRecord], specs: &[TaskSpec]) -> Vec<u32> {
        records
            .iter()
            .filter(|record| !record.meta.deprecated)
            .filter(|record| !self.record_has_spec(record, specs))
            .map(|record| record.meta.id)
            .collect()
    }

    fn record_has_spec(&self, record: &TaskRecord, specs: &[TaskSpec]) -> bool {
        specs.iter().any(|spec| {
            spec.id == record.meta.id
                || self.engine.title_similarity(&spec.title, &record.meta.title)
                    >= self.config.thresholds.title
                || self.engine.score(spec, record).composite >= self.config.thresholds.content
        })
    }

    // =========================================================================
    // The batch run
    // =========================================================================

    /// Reconcile a spec set against a feature's records.
    ///
    /// Acquires the feature lock for the whole run, decides every action in
    /// memory, rejects dependency cycles before any write, then persists
    /// changed records one by one, continuing past individual write
    /// failures and aggregating them into the report. With `dry_run` the
    /// full report is produced but nothing is written.
    pub fn run(
        &self,
        store: &TaskStore,
        feature: &str,
        specs: &[TaskSpec],
        dry_run: bool,
    ) -> Result<ReconcileReport> {
        store.ensure_dirs(feature)?;
        let _lock = FeatureLock::acquire(store.lock_file(feature), feature, &self.config.lock)?;

        let existing = store.read_all(feature)?;
        let mut working = existing.clone();
        let mut report = ReconcileReport {
            feature: feature.to_string(),
            ..ReconcileReport::default()
        };
        let mut touched: Vec<(u32, Option<u32>)> = Vec::new();
        let now = Utc::now();

        for spec in specs {
            let mut warnings = Vec::new();
            let mut forced_update = false;
            let matched = self.match_existing(spec, &working);
            if let Some(warning) = matched.warning {
                tracing::warn!(spec = spec.id, "{warning}");
                warnings.push(warning);
            }
            let matched_record = matched
                .record_id
                .and_then(|id| working.iter().find(|r| r.meta.id == id).cloned());
            let (mut action, matched_id) =
                self.decide_action(spec, matched_record.as_ref(), &working);

            // An ambiguous match is recorded as a conflict between the
            // chosen record and every runner-up, and resolved as an update
            // rather than a silent keep.
            if let Some(chosen) = matched.record_id {
                let mut linked = false;
                for &other in &matched.runners_up {
                    linked |= link_pair(&mut working, chosen, other);
                    report.conflicts.push(ordered_pair(chosen, other));
                }
                let locked_in = matched_record
                    .as_ref()
                    .map(|record| record.meta.status.is_locked_in())
                    .unwrap_or(false);
                if linked && !locked_in {
                    action = Action::Update;
                    forced_update = true;
                }
            }

            if !spec.metadata.is_complete() {
                let missing = spec.metadata.missing_fields().join(", ");
                warnings.push(format!(
                    "spec #{} is missing required metadata ({missing}); record flagged for manual completion",
                    spec.id
                ));
            }

            match action {
                Action::Keep => {
                    report.kept += 1;
                    report.outcomes.push(Outcome {
                        task_id: matched_id.unwrap_or(spec.id),
                        action: Action::Keep,
                        warnings,
                    });
                }
                Action::Create => {
                    let record = TaskRecord::from_spec(spec, now);
                    touched.push((record.meta.id, None));
                    working.push(record);
                    report.created += 1;
                    report.outcomes.push(Outcome {
                        task_id: spec.id,
                        action: Action::Create,
                        warnings,
                    });
                }
                Action::Update => {
                    let Some(id) = matched_id else {
                        report
                            .failures
                            .push(format!("spec #{}: update without a matched record", spec.id));
                        continue;
                    };
                    let index = working.iter().position(|r| r.meta.id == id);
                    let Some(index) = index else {
                        report
                            .failures
                            .push(format!("spec #{}: matched record #{id} disappeared", spec.id));
                        continue;
                    };
                    let merged = self.merge(&working[index], spec);
                    if merged == working[index] && !forced_update {
                        // Nothing to add: an unchanged update is a keep
                        report.kept += 1;
                        report.outcomes.push(Outcome {
                            task_id: id,
                            action: Action::Keep,
                            warnings,
                        });
                    } else {
                        working[index] = merged;
                        touched.push((id, Some(id)));
                        report.updated += 1;
                        report.outcomes.push(Outcome {
                            task_id: id,
                            action: Action::Update,
                            warnings,
                        });
                    }
                }
                Action::Deprecate => unreachable!("deprecation is decided per record, not per spec"),
            }
        }

        // Orphaned records are deprecated, never deleted
        for orphan_id in self.detect_orphans(&working, specs) {
            if let Some(record) = working.iter_mut().find(|r| r.meta.id == orphan_id) {
                record.deprecate(ORPHAN_REASON, now);
                touched.push((orphan_id, Some(orphan_id)));
                report.deprecated += 1;
                report.outcomes.push(Outcome {
                    task_id: orphan_id,
                    action: Action::Deprecate,
                    warnings: Vec::new(),
                });
            }
        }

        // Secondary pass: flag near-duplicate work across unrelated records
        let created_or_updated: Vec<(u32, Option<u32>)> = report
            .outcomes
            .iter()
            .filter(|outcome| matches!(outcome.action, Action::Create | Action::Update))
            .map(|outcome| {
                touched
                    .iter()
                    .find(|(id, _)| *id == outcome.task_id)
                    .copied()
                    .unwrap_or((outcome.task_id, None))
            })
            .collect();
        let detector =
            ConflictDetector::new(self.engine.clone(), self.config.thresholds.clone());
        let conflict_report = detector.annotate(&created_or_updated, &mut working);
        report.conflicts.extend(conflict_report.flagged.iter().copied());
        report.conflicts.sort_unstable();
        report.conflicts.dedup();

        // Fatal: a dependency cycle aborts before any file is written
        let graph = DependencyGraph::build(&working);
        graph.detect_cycles()?;

        // Advisory parallel-capability flags; never an instruction to run
        // two tasks at once
        let candidates = graph.parallel_candidates(&Default::default());
        for record in &mut working {
            if !record.meta.deprecated {
                record.meta.parallel = candidates.contains(&record.meta.id);
            }
        }
        report.parallel_candidates = candidates;

        // Persist every record that differs from what is on disk
        let mut wrote_any = false;
        for record in &mut working {
            let on_disk = existing.iter().find(|r| r.meta.id == record.meta.id);
            let changed = match on_disk {
                Some(previous) => previous != record,
                None => true,
            };
            if !changed {
                continue;
            }
            if dry_run {
                wrote_any = true;
                continue;
            }
            if on_disk.is_some() {
                record.meta.updated = now;
            }
            if let Err(err) = store.write(feature, record) {
                tracing::warn!(task = record.meta.id, error = %err, "failed to persist record");
                report
                    .failures
                    .push(format!("task #{}: {err}", record.meta.id));
                continue;
            }
            wrote_any = true;
        }
        report.unchanged = !wrote_any;

        Ok(report)
    }
}

/// Cross-link `conflicts_with` on both records; true if the first changed
fn link_pair(records: &mut [TaskRecord], a: u32, b: u32) -> bool {
    let mut changed = false;
    if let Some(record) = records.iter_mut().find(|r| r.meta.id == a) {
        changed = crate::conflict::link(record, b);
    }
    if let Some(record) = records.iter_mut().find(|r| r.meta.id == b) {
        crate::conflict::link(record, a);
    }
    changed
}

fn ordered_pair(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Append phrases whose normalized form is not already present
fn append_missing_phrases(target: &mut Vec<String>, incoming: &[String]) {
    let existing: std::collections::BTreeSet<String> =
        target.iter().map(|line| normalize_phrase(line)).collect();
    for phrase in incoming {
        let normalized = normalize_phrase(phrase);
        if !normalized.is_empty() && !existing.contains(&normalized) {
            target.push(phrase.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SpecMetadata;

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(Config::default())
    }

    fn complete_metadata() -> SpecMetadata {
        SpecMetadata {
            target_file: Some("src/x.rs".to_string()),
            purpose: Some("do the thing".to_string()),
            reused_assets: Some("helpers".to_string()),
            requirement_refs: Some("R1".to_string()),
            execution_prompt: Some("build it".to_string()),
        }
    }

    fn spec(id: u32, title: &str) -> TaskSpec {
        let mut spec = TaskSpec::new(id, title);
        spec.metadata = complete_metadata();
        spec
    }

    fn full_spec(id: u32, title: &str) -> TaskSpec {
        let mut s = spec(id, title);
        s.features = vec!["alpha feature".to_string(), "beta feature".to_string()];
        s.workflow = vec!["step one".to_string(), "step two".to_string()];
        s.depends_on = vec![9];
        s.specs = vec!["component".to_string(), "api".to_string()];
        s
    }

    fn record_for(spec: &TaskSpec) -> TaskRecord {
        TaskRecord::from_spec(spec, Utc::now())
    }

    #[test]
    fn exact_id_match_wins() {
        let engine = engine();
        let records = vec![record_for(&spec(1, "totally different title"))];
        let result = engine.match_existing(&spec(1, "new work item"), &records);
        assert_eq!(result.record_id, Some(1));
    }

    #[test]
    fn ambiguous_title_match_prefers_lowest_id() {
        let engine = engine();
        let records = vec![
            record_for(&spec(2, "rotate session signing keys")),
            record_for(&spec(7, "rotate session signing keys")),
        ];
        let result = engine.match_existing(&spec(5, "rotate session signing keys"), &records);
        assert_eq!(result.record_id, Some(2));
        assert_eq!(result.runners_up, vec![7]);
        assert!(result.warning.expect("warning").contains("#2, #7"));
    }

    #[test]
    fn matched_record_never_creates() {
        let engine = engine();
        // Low similarity, but matched by id: must be KEEP or UPDATE
        let existing = record_for(&full_spec(1, "legacy import pipeline"));
        let incoming = spec(1, "completely unrelated thing");
        let (action, _) = engine.decide_action(&incoming, Some(&existing), &[existing.clone()]);
        assert_ne!(action, Action::Create);
    }

    #[test]
    fn unmatched_spec_creates_after_rescan() {
        let engine = engine();
        let (action, matched) = engine.decide_action(&spec(4, "brand new work"), None, &[]);
        assert_eq!(action, Action::Create);
        assert_eq!(matched, None);
    }

    #[test]
    fn rescan_switches_create_to_update() {
        let engine = engine();
        // The record set already contains an exact-id record the caller
        // did not pass as matched (appeared mid-batch).
        let records = vec![record_for(&spec(4, "brand new work"))];
        let (action, matched) = engine.decide_action(&spec(4, "brand new work"), None, &records);
        assert_eq!(action, Action::Update);
        assert_eq!(matched, Some(4));
    }

    #[test]
    fn keep_boundary_is_exact() {
        let engine = engine();
        // Identical title/features/workflow/deps, empty specs: 0.85 exactly
        let mut incoming = full_spec(1, "alpha sync job");
        incoming.specs = Vec::new();
        let mut existing = record_for(&incoming);
        existing.meta.status = TaskStatus::Open;
        let (action, _) = engine.decide_action(&incoming, Some(&existing), &[existing.clone()]);
        assert_eq!(action, Action::Keep);

        // Nudge just below the boundary: a 9999/10000 workflow overlap
        // leaves the composite at 0.84998
        let mut below = incoming.clone();
        below.workflow = (0..10_000).map(|n| format!("step {n}")).collect();
        let mut existing_below = record_for(&below);
        existing_below.body.workflow.pop();
        let (action, _) =
            engine.decide_action(&below, Some(&existing_below), &[existing_below.clone()]);
        assert_eq!(action, Action::Update);
    }

    #[test]
    fn locked_in_status_keeps_regardless_of_score() {
        let engine = engine();
        let existing_spec = full_spec(1, "alpha sync job");
        for status in [TaskStatus::InProgress, TaskStatus::Completed] {
            let mut existing = record_for(&existing_spec);
            existing.meta.status = status;
            let incoming = spec(1, "quite different now");
            let (action, _) =
                engine.decide_action(&incoming, Some(&existing), &[existing.clone()]);
            assert_eq!(action, Action::Keep);
        }
    }

    #[test]
    fn missing_specs_force_update_on_open_records() {
        let engine = engine();
        // High composite but three spec categories absent from the record
        let mut incoming = full_spec(1, "alpha sync job");
        incoming.specs = vec![
            "component".to_string(),
            "api".to_string(),
            "state".to_string(),
        ];
        let mut existing = record_for(&incoming);
        existing.body.specs = Vec::new();
        existing.meta.status = TaskStatus::Open;
        let (action, _) = engine.decide_action(&incoming, Some(&existing), &[existing.clone()]);
        assert_eq!(action, Action::Update);
    }

    #[test]
    fn merge_preserves_completed_items_and_notes() {
        let engine = engine();
        let incoming = full_spec(1, "alpha sync job");
        let mut existing = record_for(&incoming);
        existing.body.features = vec!["[x] alpha feature".to_string()];
        existing.body.notes = vec!["wired through the pool".to_string()];

        let merged = engine.merge(&existing, &incoming);
        assert!(merged.body.features.contains(&"[x] alpha feature".to_string()));
        assert!(merged.body.features.iter().any(|f| f.contains("beta feature")));
        assert_eq!(merged.body.notes, vec!["wired through the pool".to_string()]);
    }

    #[test]
    fn merge_is_idempotent() {
        let engine = engine();
        let incoming = full_spec(1, "alpha sync job");
        let existing = record_for(&incoming);
        let once = engine.merge(&existing, &incoming);
        let twice = engine.merge(&once, &incoming);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_unions_dependencies() {
        let engine = engine();
        let mut incoming = full_spec(1, "alpha sync job");
        incoming.depends_on = vec![2, 3];
        let mut existing = record_for(&full_spec(1, "alpha sync job"));
        existing.meta.depends_on = vec![3, 4];

        let merged = engine.merge(&existing, &incoming);
        assert_eq!(merged.meta.depends_on, vec![2, 3, 4]);
    }

    #[test]
    fn orphan_detection_ignores_matched_records() {
        let engine = engine();
        let matched_spec = full_spec(1, "alpha sync job");
        let records = vec![
            record_for(&matched_spec),
            record_for(&full_spec(8, "abandoned migration shim")),
        ];
        let orphans = engine.detect_orphans(&records, &[matched_spec]);
        assert_eq!(orphans, vec![8]);
    }
}
