//! Weighted similarity scoring between task specs and task records.
//!
//! Each dimension is a Jaccard-style ratio `matched / max(|A|, |B|)` over
//! normalized sets. The composite is a weighted sum; default weights come
//! from [`crate::config::WeightConfig`] and sum to 1.0. All set types are
//! ordered so identical inputs always produce identical scores.

use std::collections::BTreeSet;

use crate::config::WeightConfig;
use crate::record::{TaskRecord, TaskSpec};

/// Words carrying no signal in task titles
const STOPWORDS: [&str; 22] = [
    "a", "an", "and", "as", "at", "by", "for", "from", "in", "into", "is", "of", "on", "or",
    "the", "to", "with", "add", "create", "implement", "new", "task",
];

/// Composite similarity with its five named sub-scores
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScore {
    pub composite: f64,
    pub title: f64,
    pub features: f64,
    pub workflow: f64,
    pub deps: f64,
    pub specs: f64,
    /// Spec categories present in the spec but absent from the record
    pub missing_specs: usize,
}

/// Scoring engine carrying the configured dimension weights
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    weights: WeightConfig,
}

impl SimilarityEngine {
    pub fn new(weights: WeightConfig) -> Self {
        Self { weights }
    }

    /// Score a spec against a persisted record
    pub fn score(&self, spec: &TaskSpec, record: &TaskRecord) -> SimilarityScore {
        let title = set_similarity(
            &title_tokens(&spec.title),
            &title_tokens(&record.meta.title),
        );
        let features = set_similarity(
            &phrase_set(&spec.features),
            &phrase_set(&record.body.features),
        );
        let workflow = set_similarity(
            &phrase_set(&spec.workflow),
            &phrase_set(&record.body.workflow),
        );
        let deps = set_similarity(
            &id_set(&spec.depends_on),
            &id_set(&record.meta.depends_on),
        );
        let spec_categories = spec.spec_categories();
        let record_categories = record.spec_categories();
        let specs = set_similarity(&spec_categories, &record_categories);
        let missing_specs = spec_categories.difference(&record_categories).count();

        let composite = self.weights.title * title
            + self.weights.features * features
            + self.weights.workflow * workflow
            + self.weights.deps * deps
            + self.weights.specs * specs;

        SimilarityScore {
            composite,
            title,
            features,
            workflow,
            deps,
            specs,
            missing_specs,
        }
    }

    /// Score two records against each other (used by conflict detection)
    pub fn score_records(&self, a: &TaskRecord, b: &TaskRecord) -> SimilarityScore {
        self.score(&a.as_spec(), b)
    }

    /// Title-only similarity, used for the 0.70 matching rule
    pub fn title_similarity(&self, spec_title: &str, record_title: &str) -> f64 {
        set_similarity(&title_tokens(spec_title), &title_tokens(record_title))
    }
}

/// Jaccard-style ratio over two ordered sets.
///
/// Two empty sets score 0.0, not 1.0: two hollow items are not evidence of
/// a match.
fn set_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 0.0;
    }
    let matched = a.intersection(b).count();
    matched as f64 / larger as f64
}

/// Tokenize a title: lowercase, split on non-alphanumerics, drop stopwords
pub fn title_tokens(title: &str) -> BTreeSet<String> {
    title
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty() && !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Normalize a feature/workflow phrase for comparison: strip checkbox and
/// bullet prefixes, lowercase, collapse whitespace.
pub fn normalize_phrase(phrase: &str) -> String {
    let mut text = phrase.trim();
    for prefix in ["[x]", "[X]", "[ ]", "-", "*"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
        }
    }
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn phrase_set(phrases: &[String]) -> BTreeSet<String> {
    phrases
        .iter()
        .map(|phrase| normalize_phrase(phrase))
        .filter(|phrase| !phrase.is_empty())
        .collect()
}

fn id_set(ids: &[u32]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}
