//! Deterministic classification of a failure into a category and a ranked
//! list of candidate strategies.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::core::rules::{category_evidence, category_rank, detect_domains, domain_rank};
use crate::core::types::{
    DEFAULT_STRATEGY, ErrorCategory, ProblemClassification, StrategyCapability,
};

const CONFIDENCE_FLOOR: f64 = 0.3;
const CONFIDENCE_CEILING: f64 = 0.95;
/// Diagnostic length at which the specificity factor saturates.
const SPECIFICITY_SATURATION_CHARS: usize = 1_000;

/// Classify `request_text + diagnostic_text` against the registered
/// capabilities.
///
/// - Primary category: most distinct rule hits; ties broken by
///   [`crate::core::rules::CATEGORY_PRIORITY`]. No evidence ⇒ `other`.
/// - Secondary categories: every other category with evidence, in priority order.
/// - Candidates: capabilities whose categories intersect `{primary} ∪ secondary`
///   and whose domains are empty or intersect the detected domains. Domain
///   specialists come first, then `base_confidence` descending, then id.
/// - Never returns an empty candidate list; falls back to [`DEFAULT_STRATEGY`].
pub fn classify(
    request_text: &str,
    diagnostic_text: &str,
    capabilities: &[StrategyCapability],
) -> ProblemClassification {
    let text = format!("{request_text}\n{diagnostic_text}");
    let evidence = category_evidence(&text);

    let mut ranked: Vec<(ErrorCategory, usize)> = evidence.into_iter().collect();
    ranked.sort_by(|(a, a_hits), (b, b_hits)| {
        b_hits
            .cmp(a_hits)
            .then_with(|| category_rank(*a).cmp(&category_rank(*b)))
    });

    let (primary_category, primary_hits) = ranked
        .first()
        .copied()
        .unwrap_or((ErrorCategory::Other, 0));
    let mut secondary_categories: Vec<ErrorCategory> =
        ranked.iter().skip(1).map(|(category, _)| *category).collect();
    secondary_categories.sort_by_key(|category| category_rank(*category));

    let domains = detect_domains(&text);

    let mut wanted: BTreeSet<ErrorCategory> = secondary_categories.iter().copied().collect();
    wanted.insert(primary_category);

    let mut matched: Vec<(&StrategyCapability, usize)> = capabilities
        .iter()
        .filter(|cap| !cap.supported_categories.is_disjoint(&wanted))
        .filter_map(|cap| domain_match_rank(cap, &domains).map(|rank| (cap, rank)))
        .collect();
    matched.sort_by(|(a, a_rank), (b, b_rank)| compare_candidates(a, *a_rank, b, *b_rank));

    let mut candidate_strategies: Vec<String> =
        matched.iter().map(|(cap, _)| cap.id.clone()).collect();
    let fell_back = candidate_strategies.is_empty();
    if fell_back {
        candidate_strategies.push(DEFAULT_STRATEGY.to_string());
    }

    let confidence = confidence_for(diagnostic_text.len(), candidate_strategies.len());

    let rationale = format!(
        "primary={primary_category} ({primary_hits} signal(s)); secondary=[{}]; domains=[{}]; {} candidate(s){}",
        join(secondary_categories.iter().map(|c| c.as_str())),
        join(domains.iter().map(String::as_str)),
        candidate_strategies.len(),
        if fell_back {
            " (no specialist matched, using default)"
        } else {
            ""
        }
    );

    ProblemClassification {
        primary_category,
        secondary_categories,
        domains,
        candidate_strategies,
        confidence,
        rationale,
    }
}

/// `clamp(0.3, 0.95, f(len) * (1 - 0.1 * (candidates - 1)))`.
///
/// `f` grows linearly from 0.4 to 0.95 over the first
/// [`SPECIFICITY_SATURATION_CHARS`] characters of diagnostic text.
pub fn confidence_for(diagnostic_len: usize, candidate_count: usize) -> f64 {
    let specificity = diagnostic_len.min(SPECIFICITY_SATURATION_CHARS) as f64
        / SPECIFICITY_SATURATION_CHARS as f64;
    let base = 0.4 + 0.55 * specificity;
    let spread = 1.0 - 0.1 * candidate_count.saturating_sub(1) as f64;
    (base * spread).clamp(CONFIDENCE_FLOOR, CONFIDENCE_CEILING)
}

/// `Some(rank)` when the capability applies to the detected domains.
/// Generic capabilities rank after every domain specialist.
fn domain_match_rank(cap: &StrategyCapability, domains: &[String]) -> Option<usize> {
    if !cap.is_domain_specific() {
        return Some(usize::MAX);
    }
    domains
        .iter()
        .filter(|domain| cap.supported_domains.contains(domain.as_str()))
        .map(|domain| domain_rank(domain))
        .min()
}

fn compare_candidates(
    a: &StrategyCapability,
    a_rank: usize,
    b: &StrategyCapability,
    b_rank: usize,
) -> Ordering {
    a_rank
        .cmp(&b_rank)
        .then_with(|| {
            b.base_confidence
                .partial_cmp(&a.base_confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.id.cmp(&b.id))
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items.collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ErrorCategory as C;

    fn caps() -> Vec<StrategyCapability> {
        vec![
            StrategyCapability::new("general", &C::ALL, &[], 0.5, 3),
            StrategyCapability::new("test-repair", &[C::Test, C::Logic], &[], 0.7, 3),
            StrategyCapability::new("session-auth", &[C::Test, C::Runtime], &["auth"], 0.6, 3),
            StrategyCapability::new("ui", &[C::Test, C::Runtime], &["ui"], 0.8, 3),
            StrategyCapability::new("build-repair", &[C::Build, C::Syntax], &[], 0.9, 3),
        ]
    }

    #[test]
    fn failing_unit_tests_classify_as_test() {
        let classification = classify(
            "fix the failing unit tests",
            "AssertionError: Expected 'foo' but got 'bar'",
            &caps(),
        );
        assert_eq!(classification.primary_category, C::Test);
        assert!(classification.secondary_categories.is_empty());
        assert_eq!(
            classification.candidate_strategies,
            vec!["test-repair".to_string(), "general".to_string()]
        );
    }

    #[test]
    fn domain_specialists_precede_generic_strategies() {
        let classification = classify(
            "login form test fails",
            "AssertionError: session cookie missing after render",
            &caps(),
        );
        assert_eq!(classification.domains, vec!["auth", "ui"]);
        assert_eq!(
            classification.candidate_strategies,
            vec!["session-auth", "ui", "test-repair", "general"]
        );
    }

    #[test]
    fn ties_are_broken_by_category_priority() {
        // One build signal and one test signal: build outranks test.
        let classification = classify("build", "test", &[]);
        assert_eq!(classification.primary_category, C::Build);
        assert_eq!(classification.secondary_categories, vec![C::Test]);
    }

    #[test]
    fn secondary_categories_do_not_change_primary() {
        let classification = classify(
            "fix the tests",
            "AssertionError: expected 1 but got 2\nTypeError somewhere",
            &caps(),
        );
        assert_eq!(classification.primary_category, C::Test);
        assert_eq!(classification.secondary_categories, vec![C::Type]);
    }

    #[test]
    fn no_match_falls_back_to_default_strategy() {
        let classification = classify("make it nicer", "", &[]);
        assert_eq!(classification.primary_category, C::Other);
        assert_eq!(classification.candidate_strategies, vec![DEFAULT_STRATEGY]);
        assert!(classification.rationale.contains("using default"));
    }

    #[test]
    fn confidence_is_clamped_and_penalizes_candidates() {
        assert!((confidence_for(0, 1) - 0.4).abs() < 1e-9);
        assert!((confidence_for(5_000, 1) - 0.95).abs() < 1e-9);
        assert!(confidence_for(5_000, 3) < confidence_for(5_000, 1));
        assert!((confidence_for(0, 50) - 0.3).abs() < 1e-9);
    }
}
