//! Multi-strategy orchestration for one outer iteration.
//!
//! Classifies the failure, asks memory for a known-good approach, then runs
//! the candidate strategies in order until one reports local success. A
//! strategy that errors or panics is recorded as a failed run and the next
//! candidate is tried.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use tracing::{info, instrument, warn};

use crate::core::classifier::classify;
use crate::core::invariants::validate_classification;
use crate::core::types::{IterationRecord, ProblemClassification, StrategyId};
use crate::memory::ExecutionMemory;
use crate::registry::StrategyRegistry;
use crate::strategy::{StrategyContext, StrategyRun, execute_strategy};

#[derive(Debug, Clone, Copy)]
pub struct OrchestrationRequest<'a> {
    /// Memory entry of the current run.
    pub entry_id: &'a str,
    pub request_text: &'a str,
    pub diagnostic_text: &'a str,
    pub prior_iterations: &'a [IterationRecord],
    /// Approaches already known not to work in this run.
    pub failed_approaches: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationOutcome {
    /// Some strategy reported local success.
    pub succeeded: bool,
    /// Strategies actually executed, in order.
    pub strategy_chain: Vec<StrategyId>,
    pub total_iterations_consumed: u32,
    pub changes: Vec<String>,
    pub modified_files: Vec<PathBuf>,
    pub classification: ProblemClassification,
    pub runs: Vec<StrategyRun>,
    /// Recommended strategies with no registered implementation.
    pub skipped: Vec<StrategyId>,
    pub memory_hint: Option<String>,
}

impl OrchestrationOutcome {
    /// True when any strategy applied at least one edit.
    pub fn attempted_fix(&self) -> bool {
        self.runs.iter().any(StrategyRun::applied_any)
    }

    pub fn last_strategy(&self) -> Option<&str> {
        self.strategy_chain.last().map(String::as_str)
    }

    /// Combined failure description, `None` on success.
    pub fn error(&self) -> Option<String> {
        if self.succeeded {
            return None;
        }
        let mut parts: Vec<String> = self
            .runs
            .iter()
            .filter_map(|run| {
                run.error
                    .as_ref()
                    .map(|err| format!("{}: {err}", run.strategy_id))
            })
            .collect();
        if self.runs.is_empty() {
            parts.push(format!(
                "no implemented strategy among candidates [{}]",
                self.classification.candidate_strategies.join(", ")
            ));
        }
        Some(parts.join("; "))
    }
}

pub struct Orchestrator<'a> {
    registry: &'a StrategyRegistry,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a StrategyRegistry) -> Self {
        Self { registry }
    }

    #[instrument(skip_all, fields(entry = request.entry_id))]
    pub fn execute(
        &self,
        request: &OrchestrationRequest<'_>,
        memory: Option<&ExecutionMemory>,
    ) -> OrchestrationOutcome {
        let capabilities = self.registry.capabilities();
        let classification =
            classify(request.request_text, request.diagnostic_text, &capabilities);
        info!(
            primary = %classification.primary_category,
            candidates = ?classification.candidate_strategies,
            confidence = classification.confidence,
            "failure classified"
        );
        for violation in validate_classification(&classification) {
            warn!(violation = %violation, "classification invariant violated");
        }

        // Candidates bound the hint; every strategy sees it before proposing.
        let memory_hint = memory.and_then(|memory| {
            memory.suggest_next_approach(
                request.entry_id,
                request.failed_approaches,
                &classification.candidate_strategies,
            )
        });
        if let Some(hint) = &memory_hint {
            info!(hint = %hint, "memory suggests a known approach");
        }

        let context = StrategyContext {
            request_text: request.request_text.to_string(),
            diagnostic_text: request.diagnostic_text.to_string(),
            classification: classification.clone(),
            prior_iterations: request.prior_iterations.to_vec(),
            memory_hint: memory_hint.clone(),
        };

        let mut outcome = OrchestrationOutcome {
            succeeded: false,
            strategy_chain: Vec::new(),
            total_iterations_consumed: 0,
            changes: Vec::new(),
            modified_files: Vec::new(),
            classification,
            runs: Vec::new(),
            skipped: Vec::new(),
            memory_hint,
        };

        let candidates = outcome.classification.candidate_strategies.clone();
        for id in &candidates {
            let Some(entry) = self.registry.get(id) else {
                warn!(strategy = %id, "recommended strategy is not registered");
                outcome.skipped.push(id.clone());
                continue;
            };
            let Some(implementation) = entry.implementation.as_deref() else {
                warn!(strategy = %id, "recommended strategy has no implementation");
                outcome.skipped.push(id.clone());
                continue;
            };

            outcome.strategy_chain.push(id.clone());
            let run = catch_unwind(AssertUnwindSafe(|| {
                execute_strategy(implementation, &entry.capability, &context)
            }))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(strategy = %id, panic = %message, "strategy panicked");
                StrategyRun::failed(id, format!("strategy panicked: {message}"))
            });

            outcome.total_iterations_consumed += run.iterations_used;
            outcome.changes.extend(run.changes.iter().cloned());
            for file in &run.modified_files {
                if !outcome.modified_files.contains(file) {
                    outcome.modified_files.push(file.clone());
                }
            }
            let succeeded = run.succeeded;
            outcome.runs.push(run);
            if succeeded {
                outcome.succeeded = true;
                break;
            }
        }

        info!(
            succeeded = outcome.succeeded,
            chain = ?outcome.strategy_chain,
            iterations = outcome.total_iterations_consumed,
            "orchestration finished"
        );
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
