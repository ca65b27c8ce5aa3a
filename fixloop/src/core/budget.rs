//! Iteration budget selection for a run.

use crate::core::rules::keyword_tier;
use crate::core::types::{ComplexityTier, ProblemClassification};

/// Decide the complexity tier from the request and its initial classification.
///
/// Keyword evidence wins when present. Otherwise the number of secondary
/// categories decides: none ⇒ simple, one ⇒ moderate, more ⇒ complex.
pub fn decide_tier(request_text: &str, initial: &ProblemClassification) -> ComplexityTier {
    if let Some(tier) = keyword_tier(request_text) {
        return tier;
    }
    match initial.secondary_categories.len() {
        0 => ComplexityTier::Simple,
        1 => ComplexityTier::Moderate,
        _ => ComplexityTier::Complex,
    }
}

/// Outer iteration budget: an explicit override wins over the tier default.
pub fn max_iterations(tier: ComplexityTier, override_max: Option<u32>) -> u32 {
    override_max
        .filter(|max| *max > 0)
        .unwrap_or_else(|| tier.max_iterations())
}
