use carryover_engine::matcher::{batch_fuzzy_match_names, fuzzy_match_name, MatchOptions};
use carryover_types::matching::{MatchType, NameCandidate};
use proptest::prelude::*;

fn candidates(values: &[String]) -> Vec<NameCandidate> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| NameCandidate::new(i, v.clone()))
        .collect()
}

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z .,'-]{0,24}"
}

proptest! {
    #[test]
    fn empty_query_matches_nothing(values in prop::collection::vec(name(), 0..8), t in 0.0_f64..=1.0) {
        let options = MatchOptions::default().with_threshold(t);
        prop_assert!(fuzzy_match_name("", &candidates(&values), &options).is_empty());
    }

    #[test]
    fn empty_candidates_match_nothing(query in name(), t in 0.0_f64..=1.0) {
        let options = MatchOptions::default().with_threshold(t);
        prop_assert!(fuzzy_match_name(&query, &[], &options).is_empty());
    }

    #[test]
    fn widening_threshold_never_loses_results(
        query in name(),
        values in prop::collection::vec(name(), 0..10),
        t1 in 0.0_f64..=1.0,
        delta in 0.0_f64..=1.0,
    ) {
        let c = candidates(&values);
        let t2 = (t1 + delta).min(1.0);
        let strict = fuzzy_match_name(&query, &c, &MatchOptions::default().with_threshold(t1));
        let lenient = fuzzy_match_name(&query, &c, &MatchOptions::default().with_threshold(t2));
        prop_assert!(strict.len() <= lenient.len());
    }

    #[test]
    fn exact_candidate_ranks_first_with_full_weight(
        query in "[A-Za-z]{1,8}( [A-Za-z]{1,8}){0,2}",
        others in prop::collection::vec(name(), 0..6),
        weight in 1.0_f64..100.0,
    ) {
        let mut values = others;
        values.push(query.clone());
        let options = MatchOptions::default().with_score_weight(weight);
        let results = fuzzy_match_name(&query, &candidates(&values), &options);
        prop_assert!(!results.is_empty());
        prop_assert!((results[0].normalized_score - weight).abs() < 1e-9);
        prop_assert_eq!(results[0].candidate_value.as_str(), query.as_str());
    }

    #[test]
    fn exact_name_outranks_case_and_order_variants(
        tokens in prop::collection::vec("[A-Za-z]{1,8}", 1..4),
        others in prop::collection::vec(name(), 0..6).prop_shuffle(),
        slots in prop::collection::vec(any::<prop::sample::Index>(), 3),
        weight in 1.0_f64..100.0,
    ) {
        let query = tokens.join(" ");
        let reordered = tokens.iter().rev().cloned().collect::<Vec<_>>().join(", ");
        let mut values = others;
        for (value, slot) in [query.to_uppercase(), reordered, query.clone()]
            .into_iter()
            .zip(&slots)
        {
            let at = slot.index(values.len() + 1);
            values.insert(at, value);
        }
        let options = MatchOptions::default().with_score_weight(weight);
        let results = fuzzy_match_name(&query, &candidates(&values), &options);
        prop_assert!(results.len() >= 3);
        prop_assert_eq!(results[0].candidate_value.as_str(), query.as_str());
        prop_assert!((results[0].normalized_score - weight).abs() < 1e-9);
    }

    #[test]
    fn results_sorted_and_explained(query in name(), values in prop::collection::vec(name(), 0..10)) {
        let results = fuzzy_match_name(&query, &candidates(&values), &MatchOptions::default());
        for pair in results.windows(2) {
            prop_assert!(pair[0].normalized_score >= pair[1].normalized_score);
        }
        for r in &results {
            prop_assert_eq!(r.explanation.match_type, MatchType::Fuzzy);
            prop_assert_eq!(r.explanation.field.as_str(), "name");
            prop_assert_eq!(r.explanation.legacy_value.as_str(), query.as_str());
            prop_assert_eq!(&r.explanation.candidate_value, &r.candidate_value);
            prop_assert!(r.normalized_score >= 0.0 && r.normalized_score <= 20.0 + 1e-9);
        }
    }

    #[test]
    fn batch_omits_blank_legacy_values(
        legacy in prop::collection::vec(prop_oneof![Just(String::new()), Just("   ".to_string()), name()], 0..10),
        values in prop::collection::vec(name(), 0..6),
    ) {
        let legacy_names = candidates(&legacy);
        let map = batch_fuzzy_match_names(&legacy_names, &candidates(&values), &MatchOptions::default());
        for (i, value) in legacy.iter().enumerate() {
            prop_assert_eq!(map.contains_key(&i), !value.trim().is_empty());
        }
    }
}

#[test]
fn exact_match_reports_candidate_value() {
    let c = vec![
        NameCandidate::new(0, "Jon Smith"),
        NameCandidate::new(1, "John Smith"),
    ];
    let results = fuzzy_match_name("John Smith", &c, &MatchOptions::default());
    assert_eq!(results[0].candidate_value, "John Smith");
    assert!((results[0].normalized_score - 20.0).abs() < f64::EPSILON);
}
