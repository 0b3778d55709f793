//! Fuzzy name matching for entity resolution.
//!
//! Pure functions over in-memory candidate sets. Similarity is the better of
//! a character-level and a token-sorted normalized Levenshtein comparison, so
//! both typos ("Jon Smith") and word reordering ("Smith, John") score high.
//! Bad input never errors; it yields an empty result.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use carryover_types::matching::{MatchExplanation, MatchResult, MatchType, NameCandidate};

pub const DEFAULT_THRESHOLD: f64 = 0.4;
pub const DEFAULT_SCORE_WEIGHT: f64 = 20.0;

/// Field name reported in every fuzzy [`MatchExplanation`].
pub const NAME_FIELD: &str = "name";

/// Tuning knobs for [`fuzzy_match_name`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Largest accepted distance: 0 accepts exact matches only, 1 accepts
    /// anything. Clamped to `[0, 1]`.
    pub threshold: f64,
    /// Score awarded to a perfect match.
    pub score_weight: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            score_weight: DEFAULT_SCORE_WEIGHT,
        }
    }
}

impl MatchOptions {
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_score_weight(mut self, score_weight: f64) -> Self {
        self.score_weight = score_weight;
        self
    }

    fn effective_threshold(&self) -> f64 {
        if self.threshold.is_nan() {
            DEFAULT_THRESHOLD
        } else {
            self.threshold.clamp(0.0, 1.0)
        }
    }

    fn effective_weight(&self) -> f64 {
        if self.score_weight.is_finite() && self.score_weight >= 0.0 {
            self.score_weight
        } else {
            DEFAULT_SCORE_WEIGHT
        }
    }
}

/// Lowercase, replace non-alphanumerics with spaces, collapse whitespace.
#[must_use]
pub fn normalize(value: &str) -> String {
    let mapped: String = value
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn token_sorted(normalized: &str) -> String {
    let mut tokens: Vec<&str> = normalized.split(' ').collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Similarity in `[0, 1]` between two already-normalized strings.
fn normalized_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let direct = strsim::normalized_levenshtein(a, b);
    let reordered = strsim::normalized_levenshtein(&token_sorted(a), &token_sorted(b));
    direct.max(reordered)
}

/// Similarity in `[0, 1]` between two raw names. `1.0` means equal after
/// normalization; empty input scores `0.0`.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_similarity(&normalize(a), &normalize(b))
}

/// Match `query` against every candidate, best first.
///
/// Candidates whose distance (`1 - similarity`) exceeds the threshold are
/// dropped. Survivors score `score_weight * similarity` and are ordered by
/// descending score, then verbatim equality with `query`, then ascending
/// candidate index. Case and word-order variants score the same as the
/// verbatim name but never outrank it.
#[must_use]
pub fn fuzzy_match_name(
    query: &str,
    candidates: &[NameCandidate],
    options: &MatchOptions,
) -> Vec<MatchResult> {
    let normalized_query = normalize(query);
    if normalized_query.is_empty() || candidates.is_empty() {
        return Vec::new();
    }
    let threshold = options.effective_threshold();
    let weight = options.effective_weight();

    let mut results: Vec<MatchResult> = candidates
        .iter()
        .filter_map(|candidate| {
            let normalized_candidate = normalize(&candidate.value);
            if normalized_candidate.is_empty() {
                return None;
            }
            let sim = normalized_similarity(&normalized_query, &normalized_candidate);
            if 1.0 - sim > threshold {
                return None;
            }
            let score = weight * sim;
            Some(MatchResult {
                candidate_index: candidate.index,
                candidate_value: candidate.value.clone(),
                normalized_score: score,
                explanation: MatchExplanation {
                    field: NAME_FIELD.to_string(),
                    match_type: MatchType::Fuzzy,
                    score_contribution: score,
                    legacy_value: query.to_string(),
                    candidate_value: candidate.value.clone(),
                },
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.normalized_score
            .partial_cmp(&a.normalized_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| (b.candidate_value == query).cmp(&(a.candidate_value == query)))
            .then_with(|| a.candidate_index.cmp(&b.candidate_index))
    });
    results
}

/// Run [`fuzzy_match_name`] for each legacy name, keyed by legacy index.
///
/// Blank legacy values get no entry at all. Non-blank values with no
/// surviving candidate map to an empty list.
#[must_use]
pub fn batch_fuzzy_match_names(
    legacy: &[NameCandidate],
    candidates: &[NameCandidate],
    options: &MatchOptions,
) -> BTreeMap<usize, Vec<MatchResult>> {
    legacy
        .iter()
        .filter(|name| !name.value.trim().is_empty())
        .map(|name| {
            (
                name.index,
                fuzzy_match_name(&name.value, candidates, options),
            )
        })
        .collect()
}
