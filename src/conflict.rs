//! Near-duplicate detection across unrelated records.
//!
//! After reconciliation decides its actions, every created or updated
//! record is scored against all *other* records (excluding the one it was
//! matched with). Scores in the conflict band get a `conflicts_with` link on
//! both sides; scores at or above the keep threshold are logged as likely
//! duplicates for manual review. This pass is informational only: it never
//! merges, deletes, or changes a decided action.

use std::collections::BTreeSet;

use crate::config::ThresholdConfig;
use crate::record::TaskRecord;
use crate::similarity::SimilarityEngine;

/// Result of a conflict pass
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    /// Pairs flagged in the conflict band, lower id first
    pub flagged: Vec<(u32, u32)>,
    /// Pairs at or above the keep threshold, reported but not linked
    pub likely_duplicates: Vec<(u32, u32)>,
    /// Ids whose `conflicts_with` list changed
    pub changed: BTreeSet<u32>,
}

/// Secondary similarity pass over touched records
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    engine: SimilarityEngine,
    thresholds: ThresholdConfig,
}

impl ConflictDetector {
    pub fn new(engine: SimilarityEngine, thresholds: ThresholdConfig) -> Self {
        Self { engine, thresholds }
    }

    /// Annotate `records` with conflict links for every touched record.
    ///
    /// `touched` pairs a created/updated record id with the id it was
    /// matched against, if any; the matched record is never treated as a
    /// conflict of its own spec.
    pub fn annotate(
        &self,
        touched: &[(u32, Option<u32>)],
        records: &mut [TaskRecord],
    ) -> ConflictReport {
        let mut report = ConflictReport::default();

        for &(touched_id, matched_id) in touched {
            let Some(subject_idx) = records.iter().position(|r| r.meta.id == touched_id) else {
                continue;
            };
            let subject = records[subject_idx].clone();

            for other_idx in 0..records.len() {
                let other_id = records[other_idx].meta.id;
                if other_id == touched_id || Some(other_id) == matched_id {
                    continue;
                }
                if records[other_idx].meta.deprecated {
                    continue;
                }
                let score = self.engine.score_records(&subject, &records[other_idx]);
                let pair = ordered(touched_id, other_id);

                if score.composite >= self.thresholds.keep {
                    tracing::warn!(
                        task = touched_id,
                        duplicate_of = other_id,
                        composite = score.composite,
                        "likely duplicate task, review manually"
                    );
                    if !report.likely_duplicates.contains(&pair) {
                        report.likely_duplicates.push(pair);
                    }
                } else if score.composite >= self.thresholds.content {
                    if link(&mut records[subject_idx], other_id) {
                        report.changed.insert(touched_id);
                    }
                    if link(&mut records[other_idx], touched_id) {
                        report.changed.insert(other_id);
                    }
                    if !report.flagged.contains(&pair) {
                        report.flagged.push(pair);
                    }
                }
            }
        }

        report
    }
}

fn ordered(a: u32, b: u32) -> (u32, u32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Append a conflict link if absent; returns true when the record changed
pub(crate) fn link(record: &mut TaskRecord, other: u32) -> bool {
    if record.meta.conflicts_with.contains(&other) {
        return false;
    }
    record.meta.conflicts_with.push(other);
    record.meta.conflicts_with.sort_unstable();
    true
}
