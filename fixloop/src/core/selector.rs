//! Deterministic suggestion selection inside a strategy's bounded loop.

use crate::core::types::FixSuggestion;

/// Applied suggestions with confidence above this count as local success.
/// The decayed score only orders the picks.
pub const SUCCESS_THRESHOLD: f64 = 0.8;

/// `confidence × (1 − 0.1 × (iteration − 1))`, floored at zero.
pub fn suggestion_score(confidence: f64, iteration: u32) -> f64 {
    let decay = 1.0 - 0.1 * iteration.saturating_sub(1) as f64;
    (confidence * decay).max(0.0)
}

/// Index of the highest-scoring suggestion not yet used.
///
/// Ties keep proposal order. Returns `None` when every suggestion was used.
pub fn best_unused(suggestions: &[FixSuggestion], used: &[bool], iteration: u32) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, suggestion) in suggestions.iter().enumerate() {
        if used.get(idx).copied().unwrap_or(false) {
            continue;
        }
        let score = suggestion_score(suggestion.confidence, iteration);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((idx, score)),
        }
    }
    best.map(|(idx, _)| idx)
}
