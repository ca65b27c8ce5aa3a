//! Strategy execution contract and the per-strategy bounded loop.
//!
//! A strategy ("specialist") proposes fixes without side effects and applies
//! one suggestion at a time. [`execute_strategy`] drives a strategy for up to
//! its declared iteration budget and never returns an error: every failure is
//! captured in the returned [`StrategyRun`].

use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::selector::{SUCCESS_THRESHOLD, best_unused, suggestion_score};
use crate::core::types::{
    AttemptOutcome, FixSuggestion, IterationRecord, ProblemClassification, StrategyCapability,
    StrategyId,
};

/// Everything a strategy may look at when proposing fixes.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub request_text: String,
    pub diagnostic_text: String,
    pub classification: ProblemClassification,
    /// Outer iteration records accumulated so far in this run.
    pub prior_iterations: Vec<IterationRecord>,
    /// Approach that worked for a similar past request, if memory has one.
    pub memory_hint: Option<String>,
}

/// Uniform lifecycle for a pluggable repair strategy.
pub trait Strategy {
    /// Static self-description.
    fn capability(&self) -> StrategyCapability;

    /// Pure analysis: propose candidate fixes for the context.
    fn propose_fixes(&self, context: &StrategyContext) -> Result<Vec<FixSuggestion>>;

    /// Apply one suggestion. Returns `false` on any failure to write the edit.
    fn apply_fix(&self, suggestion: &FixSuggestion) -> bool;
}

/// One suggestion tried inside a strategy's loop.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyAttempt {
    /// 1-indexed position within the strategy's own budget.
    pub iteration: u32,
    pub description: String,
    pub score: f64,
    pub outcome: AttemptOutcome,
    pub files: Vec<PathBuf>,
    pub error: Option<String>,
}

impl StrategyAttempt {
    pub fn applied(&self) -> bool {
        self.outcome != AttemptOutcome::Failure
    }
}

/// Result of running one strategy's bounded loop.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyRun {
    pub strategy_id: StrategyId,
    /// A suggestion with confidence above [`SUCCESS_THRESHOLD`] was applied.
    /// Verification still decides whether the run passes.
    pub succeeded: bool,
    pub iterations_used: u32,
    pub attempts: Vec<StrategyAttempt>,
    /// Descriptions of applied suggestions.
    pub changes: Vec<String>,
    pub modified_files: Vec<PathBuf>,
    pub error: Option<String>,
}

impl StrategyRun {
    /// A run that never got to apply anything.
    pub fn failed(strategy_id: &str, error: impl Into<String>) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            succeeded: false,
            iterations_used: 0,
            attempts: Vec::new(),
            changes: Vec::new(),
            modified_files: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn applied_any(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Drive `strategy` for up to `capability.iteration_budget` iterations.
///
/// Each iteration applies the highest-scoring unused suggestion, where
/// `score = confidence × (1 − 0.1 × (iteration − 1))`. The score only orders
/// the picks: the loop stops with local success once an applied suggestion's
/// confidence is above [`SUCCESS_THRESHOLD`], or with failure when
/// suggestions run out.
pub fn execute_strategy(
    strategy: &dyn Strategy,
    capability: &StrategyCapability,
    context: &StrategyContext,
) -> StrategyRun {
    let id = capability.id.as_str();
    let mut suggestions = match strategy.propose_fixes(context) {
        Ok(suggestions) => suggestions,
        Err(err) => {
            warn!(strategy = id, err = %format!("{err:#}"), "proposal failed");
            return StrategyRun::failed(id, format!("proposal failed: {err:#}"));
        }
    };
    if suggestions.is_empty() {
        debug!(strategy = id, "no suggestions proposed");
        return StrategyRun::failed(id, "no suggestions proposed");
    }
    for suggestion in &mut suggestions {
        suggestion.strategy_id = id.to_string();
    }

    let mut run = StrategyRun {
        strategy_id: id.to_string(),
        succeeded: false,
        iterations_used: 0,
        attempts: Vec::new(),
        changes: Vec::new(),
        modified_files: Vec::new(),
        error: None,
    };
    let mut used = vec![false; suggestions.len()];

    for iteration in 1..=capability.iteration_budget {
        let Some(idx) = best_unused(&suggestions, &used, iteration) else {
            break;
        };
        used[idx] = true;
        run.iterations_used = iteration;

        let suggestion = &suggestions[idx];
        let score = suggestion_score(suggestion.confidence, iteration);
        let files = touched_files(suggestion);

        if !strategy.apply_fix(suggestion) {
            debug!(strategy = id, iteration, description = %suggestion.description, "suggestion failed to apply");
            run.attempts.push(StrategyAttempt {
                iteration,
                description: suggestion.description.clone(),
                score,
                outcome: AttemptOutcome::Failure,
                files,
                error: Some("failed to apply".to_string()),
            });
            continue;
        }

        info!(strategy = id, iteration, score, description = %suggestion.description, "suggestion applied");
        run.changes.push(suggestion.description.clone());
        for file in &files {
            if !run.modified_files.contains(file) {
                run.modified_files.push(file.clone());
            }
        }
        run.attempts.push(StrategyAttempt {
            iteration,
            description: suggestion.description.clone(),
            score,
            outcome: AttemptOutcome::Partial,
            files,
            error: None,
        });

        if suggestion.confidence > SUCCESS_THRESHOLD {
            run.succeeded = true;
            break;
        }
    }

    if !run.succeeded {
        run.error = Some(if run.changes.is_empty() {
            format!("all {} suggestion(s) failed to apply", run.attempts.len())
        } else {
            format!("no applied suggestion had confidence above {SUCCESS_THRESHOLD}")
        });
    }
    run
}

fn touched_files(suggestion: &FixSuggestion) -> Vec<PathBuf> {
    let mut files = suggestion.target_files.clone();
    for edit in &suggestion.edits {
        if !files.contains(edit.file()) {
            files.push(edit.file().clone());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::classify;
    use crate::core::types::ErrorCategory;
    use crate::test_support::{ScriptedStrategy, capability, suggestion};

    fn context() -> StrategyContext {
        StrategyContext {
            request_text: "fix the failing unit tests".to_string(),
            diagnostic_text: "AssertionError".to_string(),
            classification: classify("fix the failing unit tests", "AssertionError", &[]),
            prior_iterations: Vec::new(),
            memory_hint: None,
        }
    }

    fn cap(budget: u32) -> StrategyCapability {
        capability("test-repair", &[ErrorCategory::Test], &[], 0.7, budget)
    }

    #[test]
    fn high_confidence_suggestion_succeeds_on_first_iteration() {
        let strategy = ScriptedStrategy::new(cap(3))
            .with_suggestions(vec![suggestion("low", 0.4), suggestion("high", 0.9)]);
        let run = execute_strategy(&strategy, &cap(3), &context());
        assert!(run.succeeded);
        assert_eq!(run.iterations_used, 1);
        assert_eq!(run.changes, vec!["high"]);
        assert_eq!(run.attempts[0].outcome, AttemptOutcome::Partial);
    }

    #[test]
    fn decay_orders_picks_but_confidence_decides_success() {
        // 0.85 at iteration 2 scores 0.765, yet its confidence clears 0.8.
        let strategy = ScriptedStrategy::new(cap(2))
            .with_suggestions(vec![suggestion("first", 0.86), suggestion("second", 0.85)])
            .with_apply_results(vec![false, true]);
        let run = execute_strategy(&strategy, &cap(2), &context());
        assert!(run.succeeded);
        assert_eq!(run.iterations_used, 2);
        assert_eq!(run.changes, vec!["second"]);
        assert!((run.attempts[1].score - 0.765).abs() < 1e-9);
        assert_eq!(run.error, None);
    }

    #[test]
    fn applied_low_confidence_suggestions_are_not_local_success() {
        let strategy = ScriptedStrategy::new(cap(2))
            .with_suggestions(vec![suggestion("a", 0.8), suggestion("b", 0.6)]);
        let run = execute_strategy(&strategy, &cap(2), &context());
        assert!(!run.succeeded);
        assert_eq!(run.changes, vec!["a", "b"]);
        assert!(run.error.as_deref().unwrap_or_default().contains("confidence above"));
    }

    #[test]
    fn no_suggestions_fails_without_consuming_iterations() {
        let strategy = ScriptedStrategy::new(cap(3));
        let run = execute_strategy(&strategy, &cap(3), &context());
        assert!(!run.succeeded);
        assert_eq!(run.iterations_used, 0);
        assert_eq!(run.error.as_deref(), Some("no suggestions proposed"));
    }

    #[test]
    fn all_apply_failures_report_consumed_iterations() {
        let strategy = ScriptedStrategy::new(cap(5))
            .with_suggestions(vec![suggestion("a", 0.9), suggestion("b", 0.9)])
            .with_apply_results(vec![false, false]);
        let run = execute_strategy(&strategy, &cap(5), &context());
        assert!(!run.succeeded);
        assert_eq!(run.iterations_used, 2);
        assert!(!run.applied_any());
        assert_eq!(
            run.error.as_deref(),
            Some("all 2 suggestion(s) failed to apply")
        );
    }

    #[test]
    fn proposal_errors_are_captured() {
        let strategy = ScriptedStrategy::new(cap(3)).with_propose_error("backend offline");
        let run = execute_strategy(&strategy, &cap(3), &context());
        assert!(!run.succeeded);
        assert!(run.error.as_deref().unwrap_or_default().contains("backend offline"));
    }

    #[test]
    fn budget_bounds_the_loop() {
        let strategy = ScriptedStrategy::new(cap(1))
            .with_suggestions(vec![suggestion("a", 0.5), suggestion("b", 0.4)]);
        let run = execute_strategy(&strategy, &cap(1), &context());
        assert_eq!(run.iterations_used, 1);
        assert_eq!(run.attempts.len(), 1);
    }
}
