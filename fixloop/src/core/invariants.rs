//! Run-level invariants checked before Completion.

use crate::core::types::{IterationRecord, ProblemClassification};

/// Check that iteration records form `1..=k` with `k <= max_iterations`.
pub fn validate_iteration_records(records: &[IterationRecord], max_iterations: u32) -> Vec<String> {
    let mut errors = Vec::new();
    for (pos, record) in records.iter().enumerate() {
        let expected = pos as u32 + 1;
        if record.index != expected {
            errors.push(format!(
                "record {pos}: index {} breaks sequence (expected {expected})",
                record.index
            ));
        }
        if record.index > max_iterations {
            errors.push(format!(
                "record {pos}: index {} exceeds max_iterations {max_iterations}",
                record.index
            ));
        }
    }
    errors
}

/// Check classification shape: non-empty candidates, bounded confidence,
/// primary not repeated among secondaries.
pub fn validate_classification(classification: &ProblemClassification) -> Vec<String> {
    let mut errors = Vec::new();
    if classification.candidate_strategies.is_empty() {
        errors.push("candidate_strategies must not be empty".to_string());
    }
    if !(0.0..=1.0).contains(&classification.confidence) {
        errors.push(format!(
            "confidence {} outside [0,1]",
            classification.confidence
        ));
    }
    if classification
        .secondary_categories
        .contains(&classification.primary_category)
    {
        errors.push(format!(
            "primary category {} repeated in secondary categories",
            classification.primary_category
        ));
    }
    errors
}
