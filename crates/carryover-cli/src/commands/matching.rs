use std::path::Path;

use anyhow::{Context, Result};
use carryover_engine::matcher::{fuzzy_match_name, MatchOptions};
use carryover_types::matching::NameCandidate;

/// Execute the `match` command: score `name` against a candidate file.
pub fn execute(name: &str, candidates_path: &Path, threshold: f64, score_weight: f64) -> Result<()> {
    let raw = std::fs::read_to_string(candidates_path).with_context(|| {
        format!(
            "Failed to read candidates file: {}",
            candidates_path.display()
        )
    })?;
    let candidates: Vec<NameCandidate> = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| NameCandidate::new(i + 1, line.trim()))
        .collect();

    let options = MatchOptions::default()
        .with_threshold(threshold)
        .with_score_weight(score_weight);
    let results = fuzzy_match_name(name, &candidates, &options);

    if results.is_empty() {
        println!("No candidates within threshold {threshold}.");
        return Ok(());
    }
    for result in &results {
        println!(
            "{:>7.2}  line {:<5} {}",
            result.normalized_score, result.candidate_index, result.candidate_value
        );
    }
    Ok(())
}
