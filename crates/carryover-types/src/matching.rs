//! Fuzzy match result types.

use serde::{Deserialize, Serialize};

/// A candidate value addressed by its position in the caller's list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameCandidate {
    pub index: usize,
    pub value: String,
}

impl NameCandidate {
    #[must_use]
    pub fn new(index: usize, value: impl Into<String>) -> Self {
        Self {
            index,
            value: value.into(),
        }
    }
}

/// How a match was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Fuzzy,
}

/// Audit record explaining a score without recomputing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchExplanation {
    pub field: String,
    pub match_type: MatchType,
    pub score_contribution: f64,
    pub legacy_value: String,
    pub candidate_value: String,
}

/// One surviving candidate of a fuzzy match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub candidate_index: usize,
    pub candidate_value: String,
    /// Linear score in `0..=score_weight`.
    pub normalized_score: f64,
    pub explanation: MatchExplanation,
}
