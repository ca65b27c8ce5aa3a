//! Run lifecycle: `Probe → Loop → Completion`.
//!
//! Probe validates the check and fixes the iteration budget. Loop alternates
//! verification and orchestration until the check passes, the budget runs
//! out, or no strategy manages to change anything. Completion always runs
//! once the loop has started: it persists the memory entry, removes
//! artifacts when configured, and produces the [`RunReport`].

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::budget::{decide_tier, max_iterations};
use crate::core::classifier::classify;
use crate::core::invariants::validate_iteration_records;
use crate::core::types::{
    AttemptOutcome, ComplexityTier, IterationRecord, ProblemClassification, StrategyId,
};
use crate::io::config::FixloopConfig;
use crate::io::init::FixloopPaths;
use crate::io::iteration_log::{IterationMeta, remove_run_dir, write_iteration};
use crate::io::memory_log::{MemoryLog, persist_entry};
use crate::io::verification::{CheckDefinition, Verifier};
use crate::memory::{ExecutionMemory, MemoryAttempt};
use crate::orchestrator::{OrchestrationOutcome, OrchestrationRequest, Orchestrator};
use crate::registry::StrategyRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Probe,
    Loop,
    Completion,
}

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    PhaseEntered(Phase),
    Iteration(IterationRecord),
}

/// The check could not be validated; the run never started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeError {
    pub reason: String,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "probe failed: {}", self.reason)
    }
}

impl std::error::Error for ProbeError {}

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStop {
    /// Verification passed on `iteration`.
    Passed { iteration: u32 },
    /// Every iteration in the budget ran without a passing check.
    Exhausted { max_iterations: u32 },
    /// No strategy applied anything on `iteration`.
    Stalled { iteration: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub succeeded: bool,
    pub stop: RunStop,
    pub tier: ComplexityTier,
    pub iterations_used: u32,
    pub max_iterations: u32,
    pub elapsed_ms: u64,
    pub strategy_chain: Vec<StrategyId>,
    pub changes: Vec<String>,
    pub modified_files: Vec<PathBuf>,
    pub records: Vec<IterationRecord>,
    /// Request-only classification taken at Probe.
    pub classification: ProblemClassification,
    /// Non-fatal problems (artifact writes, memory persistence).
    pub warnings: Vec<String>,
}

/// One run's inputs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub request_text: String,
    pub check: CheckDefinition,
    /// Defaults to a fresh id derived from the current time.
    pub run_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    /// Overrides the tier budget when set.
    pub max_iterations: Option<u32>,
    pub verification_timeout: Duration,
    pub cleanup_on_completion: bool,
    /// Parent of per-run artifact directories. `None` disables artifacts.
    pub iterations_dir: Option<PathBuf>,
    pub memory_log: Option<MemoryLog>,
}

impl ProtocolSettings {
    pub fn from_config(cfg: &FixloopConfig, paths: &FixloopPaths) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            verification_timeout: Duration::from_millis(cfg.verification_timeout_ms),
            cleanup_on_completion: cfg.cleanup_on_completion,
            iterations_dir: Some(paths.iterations_dir.clone()),
            memory_log: Some(MemoryLog::new(paths.resolve(&cfg.memory.path))),
        }
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            max_iterations: None,
            verification_timeout: Duration::from_millis(
                FixloopConfig::default().verification_timeout_ms,
            ),
            cleanup_on_completion: false,
            iterations_dir: None,
            memory_log: None,
        }
    }
}

/// Execute one run against `verifier` with the strategies in `registry`.
///
/// Returns `Err` only when Probe fails (wrapping [`ProbeError`]); every
/// later problem ends up in the report.
#[instrument(skip_all)]
pub fn run_protocol<V: Verifier + ?Sized, F: FnMut(&ProtocolEvent)>(
    verifier: &V,
    registry: &StrategyRegistry,
    memory: &mut ExecutionMemory,
    settings: &ProtocolSettings,
    request: &RunRequest,
    mut on_event: F,
) -> Result<RunReport> {
    let started = Instant::now();

    // Probe
    on_event(&ProtocolEvent::PhaseEntered(Phase::Probe));
    verifier.probe(&request.check).map_err(|err| ProbeError {
        reason: format!("{err:#}"),
    })?;
    let run_id = request
        .run_id
        .clone()
        .unwrap_or_else(|| memory.next_run_id(Utc::now()));
    memory
        .create_entry(&run_id, &request.request_text)
        .map_err(|err| ProbeError {
            reason: format!("{err:#}"),
        })?;
    let capabilities = registry.capabilities();
    if registry
        .entries()
        .iter()
        .all(|entry| entry.implementation.is_none())
    {
        warn!("no registered strategy has an implementation");
    }
    let initial = classify(&request.request_text, "", &capabilities);
    let tier = decide_tier(&request.request_text, &initial);
    let budget = max_iterations(tier, settings.max_iterations);
    let run_dir = settings
        .iterations_dir
        .as_ref()
        .map(|dir| dir.join(&run_id));
    info!(run_id = %run_id, tier = %tier, max_iterations = budget, check = %request.check.display_command(), "probe passed");

    // Loop
    on_event(&ProtocolEvent::PhaseEntered(Phase::Loop));
    let orchestrator = Orchestrator::new(registry);
    let mut state = LoopState::default();
    let mut stop = None;

    for iteration in 1..=budget {
        let outcome = verifier.run(&request.check, settings.verification_timeout);
        info!(iteration, passed = outcome.passed, duration_ms = outcome.duration_ms, "verification finished");

        if outcome.passed {
            state.confirm_pending(memory, &run_id);
            if let Some(dir) = &run_dir {
                let meta = IterationMeta {
                    run_id: run_id.clone(),
                    iteration,
                    verification_passed: true,
                    verification_ms: outcome.duration_ms,
                    primary_category: None,
                    candidate_strategies: Vec::new(),
                    skipped_strategies: Vec::new(),
                    record: None,
                };
                state.note(write_iteration(dir, &meta, &outcome.output).map(drop));
            }
            stop = Some(RunStop::Passed { iteration });
            break;
        }
        state.reject_pending();

        let diagnostic = outcome.diagnostic_text();
        let orchestration = orchestrator.execute(
            &OrchestrationRequest {
                entry_id: &run_id,
                request_text: &request.request_text,
                diagnostic_text: &diagnostic,
                prior_iterations: &state.records,
                failed_approaches: &state.failed_approaches,
            },
            Some(&*memory),
        );
        state.absorb(memory, &run_id, iteration, &orchestration);

        let record = IterationRecord {
            index: iteration,
            strategy_id: orchestration
                .last_strategy()
                .or_else(|| {
                    orchestration
                        .classification
                        .candidate_strategies
                        .first()
                        .map(String::as_str)
                })
                .unwrap_or_default()
                .to_string(),
            suggestion_description: orchestration.changes.join("; "),
            files_touched: orchestration.modified_files.clone(),
            succeeded: orchestration.succeeded,
            error: orchestration.error(),
        };
        if let Some(dir) = &run_dir {
            let meta = IterationMeta {
                run_id: run_id.clone(),
                iteration,
                verification_passed: false,
                verification_ms: outcome.duration_ms,
                primary_category: Some(orchestration.classification.primary_category),
                candidate_strategies: orchestration.classification.candidate_strategies.clone(),
                skipped_strategies: orchestration.skipped.clone(),
                record: Some(record.clone()),
            };
            let log = format!("{}\n{}", outcome.output, outcome.diagnostic);
            state.note(write_iteration(dir, &meta, &log).map(drop));
        }
        on_event(&ProtocolEvent::Iteration(record.clone()));
        state.records.push(record);

        if !orchestration.attempted_fix() {
            let reason = orchestration
                .error()
                .unwrap_or_else(|| "no strategy applied a fix".to_string());
            warn!(iteration, reason = %reason, "loop stalled");
            stop = Some(RunStop::Stalled { iteration, reason });
            break;
        }
    }

    // Completion
    on_event(&ProtocolEvent::PhaseEntered(Phase::Completion));
    let stop = stop.unwrap_or(RunStop::Exhausted {
        max_iterations: budget,
    });
    let (succeeded, iterations_used) = match &stop {
        RunStop::Passed { iteration } => (true, *iteration),
        RunStop::Exhausted { max_iterations } => (false, *max_iterations),
        RunStop::Stalled { iteration, .. } => (false, *iteration),
    };

    for violation in validate_iteration_records(&state.records, budget) {
        error!(violation = %violation, "iteration record invariant violated");
        state.warnings.push(violation);
    }
    state.note(memory.finish_entry(&run_id, succeeded, iterations_used));
    if let Some(log) = &settings.memory_log {
        state.note(persist_entry(log, memory, &run_id));
    }
    if settings.cleanup_on_completion
        && let Some(dir) = &run_dir
    {
        state.note(remove_run_dir(dir));
    }

    let report = RunReport {
        run_id,
        succeeded,
        stop,
        tier,
        iterations_used,
        max_iterations: budget,
        elapsed_ms: started.elapsed().as_millis() as u64,
        strategy_chain: state.strategy_chain,
        changes: state.changes,
        modified_files: state.modified_files,
        records: state.records,
        classification: initial,
        warnings: state.warnings,
    };
    info!(run_id = %report.run_id, succeeded, iterations_used, "run finished");
    Ok(report)
}

/// Accumulators carried across loop iterations.
#[derive(Default)]
struct LoopState {
    records: Vec<IterationRecord>,
    strategy_chain: Vec<StrategyId>,
    changes: Vec<String>,
    modified_files: Vec<PathBuf>,
    failed_approaches: Vec<String>,
    /// Approaches applied in the previous iteration, awaiting verification.
    pending: Vec<(StrategyId, String, u32)>,
    warnings: Vec<String>,
}

impl LoopState {
    fn note(&mut self, result: Result<()>) {
        if let Err(err) = result {
            let message = format!("{err:#}");
            warn!(err = %message, "non-fatal run error");
            self.warnings.push(message);
        }
    }

    /// Verification passed: the previous iteration's approaches worked.
    fn confirm_pending(&mut self, memory: &mut ExecutionMemory, run_id: &str) {
        for (strategy_id, approach, iteration) in std::mem::take(&mut self.pending) {
            debug!(strategy = %strategy_id, approach = %approach, "approach confirmed");
            self.note(memory.record_attempt(
                run_id,
                MemoryAttempt {
                    strategy_id,
                    approach,
                    outcome: AttemptOutcome::Success,
                    iteration,
                    error: None,
                },
            ));
        }
    }

    /// Verification still fails: the previous iteration's approaches did not work.
    fn reject_pending(&mut self) {
        for (_, approach, _) in std::mem::take(&mut self.pending) {
            if !self.failed_approaches.contains(&approach) {
                self.failed_approaches.push(approach);
            }
        }
    }

    fn absorb(
        &mut self,
        memory: &mut ExecutionMemory,
        run_id: &str,
        iteration: u32,
        orchestration: &OrchestrationOutcome,
    ) {
        for id in &orchestration.strategy_chain {
            if !self.strategy_chain.contains(id) {
                self.strategy_chain.push(id.clone());
            }
        }
        self.changes.extend(orchestration.changes.iter().cloned());
        for file in &orchestration.modified_files {
            if !self.modified_files.contains(file) {
                self.modified_files.push(file.clone());
            }
        }

        for run in &orchestration.runs {
            for attempt in &run.attempts {
                self.note(memory.record_attempt(
                    run_id,
                    MemoryAttempt {
                        strategy_id: run.strategy_id.clone(),
                        approach: attempt.description.clone(),
                        outcome: attempt.outcome,
                        iteration,
                        error: attempt.error.clone(),
                    },
                ));
                if !attempt.applied() {
                    if !self.failed_approaches.contains(&attempt.description) {
                        self.failed_approaches.push(attempt.description.clone());
                    }
                    continue;
                }
                for file in &attempt.files {
                    self.note(memory.record_applied_edit(
                        run_id,
                        file.clone(),
                        &attempt.description,
                    ));
                }
                self.pending.push((
                    run.strategy_id.clone(),
                    attempt.description.clone(),
                    iteration,
                ));
            }
        }
    }
}
