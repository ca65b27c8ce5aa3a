//! Run-level tests for the Probe → Loop → Completion lifecycle.
//!
//! Verification and strategies are scripted so each test controls exactly
//! which iteration passes and what every strategy proposes.

use std::fs;

use fixloop::core::types::{AttemptOutcome, ErrorCategory, FixSuggestion, StrategyCapability};
use fixloop::io::memory_log::{MemoryLog, load_memory};
use fixloop::memory::ExecutionMemory;
use fixloop::protocol::{ProtocolSettings, RunRequest, RunStop, run_protocol};
use fixloop::registry::StrategyRegistry;
use fixloop::test_support::{
    PanickingStrategy, ScriptedStrategy, ScriptedVerifier, TestWorkspace, capability, suggestion,
};

const TEST_REQUEST: &str = "fix the failing unit tests";
const KNOWN_APPROACH: &str = "fix implementation to match test expectations";

fn general_cap() -> StrategyCapability {
    capability("general", &ErrorCategory::ALL, &[], 0.5, 3)
}

fn test_repair_cap() -> StrategyCapability {
    capability("test-repair", &[ErrorCategory::Test, ErrorCategory::Logic], &[], 0.7, 3)
}

fn registry(strategies: Vec<ScriptedStrategy>) -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    for strategy in strategies {
        registry.register_strategy(Box::new(strategy)).expect("register");
    }
    registry
}

fn applying(cap: StrategyCapability, fixes: Vec<FixSuggestion>) -> ScriptedStrategy {
    ScriptedStrategy::new(cap).with_suggestions(fixes)
}

fn request(workspace: &TestWorkspace, text: &str, run_id: &str) -> RunRequest {
    RunRequest {
        request_text: text.to_string(),
        check: workspace.check(),
        run_id: Some(run_id.to_string()),
    }
}

/// A check that never passes consumes the whole tier budget, one record per
/// iteration.
#[test]
fn always_failing_check_exhausts_the_budget() {
    let workspace = TestWorkspace::new().expect("workspace");
    let registry = registry(vec![applying(general_cap(), vec![suggestion("tweak", 0.9)])]);
    let verifier = ScriptedVerifier::always_failing();
    let mut memory = ExecutionMemory::new(10);

    let report = run_protocol(
        &verifier,
        &registry,
        &mut memory,
        &ProtocolSettings::default(),
        &request(&workspace, "fix the typo", "run-exhaust"),
        |_| {},
    )
    .expect("run");

    assert!(!report.succeeded);
    assert_eq!(report.max_iterations, 5);
    assert_eq!(report.stop, RunStop::Exhausted { max_iterations: 5 });
    assert_eq!(report.records.len(), 5);
    assert_eq!(report.iterations_used, 5);
    assert_eq!(verifier.runs(), 5);
    let indices: Vec<u32> = report.records.iter().map(|record| record.index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);

    let entry = memory.entry("run-exhaust").expect("entry");
    assert!(!entry.succeeded);
    assert_eq!(entry.total_iterations, 5);
}

/// Passing on iteration i stops the loop at i without invoking strategies again.
#[test]
fn passing_check_stops_without_further_strategy_calls() {
    let workspace = TestWorkspace::new().expect("workspace");
    let strategy = applying(general_cap(), vec![suggestion("tweak", 0.9)]);
    let log = strategy.log();
    let registry = registry(vec![strategy]);
    let verifier = ScriptedVerifier::passing_on(3);
    let mut memory = ExecutionMemory::new(10);

    let report = run_protocol(
        &verifier,
        &registry,
        &mut memory,
        &ProtocolSettings::default(),
        &request(&workspace, "fix the typo", "run-pass"),
        |_| {},
    )
    .expect("run");

    assert!(report.succeeded);
    assert_eq!(report.stop, RunStop::Passed { iteration: 3 });
    assert_eq!(report.iterations_used, 3);
    assert_eq!(report.records.len(), 2);
    assert_eq!(log.proposals(), 2);
    assert_eq!(verifier.runs(), 3);
}

/// A check that passes immediately needs no strategy at all.
#[test]
fn already_passing_check_succeeds_on_first_iteration() {
    let workspace = TestWorkspace::new().expect("workspace");
    let strategy = applying(general_cap(), vec![suggestion("tweak", 0.9)]);
    let log = strategy.log();
    let registry = registry(vec![strategy]);
    let mut memory = ExecutionMemory::new(10);

    let report = run_protocol(
        &ScriptedVerifier::passing_on(1),
        &registry,
        &mut memory,
        &ProtocolSettings::default(),
        &request(&workspace, "fix the typo", "run-green"),
        |_| {},
    )
    .expect("run");

    assert_eq!(report.stop, RunStop::Passed { iteration: 1 });
    assert!(report.records.is_empty());
    assert_eq!(log.proposals(), 0);
}

/// When no strategy applies anything the loop stops instead of burning budget.
#[test]
fn loop_stalls_when_nothing_is_applied() {
    let workspace = TestWorkspace::new().expect("workspace");
    let registry = registry(vec![ScriptedStrategy::new(general_cap())]);
    let verifier = ScriptedVerifier::always_failing();
    let mut memory = ExecutionMemory::new(10);

    let report = run_protocol(
        &verifier,
        &registry,
        &mut memory,
        &ProtocolSettings::default(),
        &request(&workspace, "fix the typo", "run-stall"),
        |_| {},
    )
    .expect("run");

    assert!(!report.succeeded);
    match &report.stop {
        RunStop::Stalled { iteration, reason } => {
            assert_eq!(*iteration, 1);
            assert!(reason.contains("no suggestions proposed"));
        }
        other => panic!("expected stall, got {other:?}"),
    }
    assert_eq!(report.records.len(), 1);
    assert_eq!(verifier.runs(), 1);
}

/// A successful approach from a past run is offered to the next similar run
/// before any strategy analysis happens.
#[test]
fn memory_suggests_known_approach_on_similar_request() {
    let workspace = TestWorkspace::new().expect("workspace");
    let log_path = workspace.paths.fixloop_dir.join("memory.jsonl");
    let settings = ProtocolSettings {
        memory_log: Some(MemoryLog::new(&log_path)),
        ..ProtocolSettings::default()
    };

    let first = registry(vec![applying(
        test_repair_cap(),
        vec![suggestion(KNOWN_APPROACH, 0.9)],
    )]);
    let mut memory = ExecutionMemory::new(10);
    let report = run_protocol(
        &ScriptedVerifier::passing_on(2),
        &first,
        &mut memory,
        &settings,
        &request(&workspace, TEST_REQUEST, "run-first"),
        |_| {},
    )
    .expect("first run");
    assert!(report.succeeded);

    // Fresh process: memory comes back from the log.
    let mut memory = load_memory(&MemoryLog::new(&log_path), 10).expect("reload");
    let entry = memory.entry("run-first").expect("persisted");
    assert!(entry.succeeded);
    assert!(entry
        .attempts
        .iter()
        .any(|attempt| attempt.approach == KNOWN_APPROACH
            && attempt.outcome == AttemptOutcome::Success));

    let second_strategy = applying(test_repair_cap(), vec![suggestion("something else", 0.9)]);
    let seen = second_strategy.log();
    let second = registry(vec![second_strategy]);
    run_protocol(
        &ScriptedVerifier::passing_on(2),
        &second,
        &mut memory,
        &settings,
        &request(&workspace, TEST_REQUEST, "run-second"),
        |_| {},
    )
    .expect("second run");

    let contexts = seen.contexts.borrow();
    assert_eq!(contexts[0].memory_hint.as_deref(), Some(KNOWN_APPROACH));
}

/// Memory never holds more than its capacity, and the log is compacted.
#[test]
fn memory_stays_within_capacity_across_runs() {
    let workspace = TestWorkspace::new().expect("workspace");
    let log_path = workspace.paths.fixloop_dir.join("memory.jsonl");
    let settings = ProtocolSettings {
        memory_log: Some(MemoryLog::new(&log_path)),
        ..ProtocolSettings::default()
    };
    let registry = registry(vec![applying(general_cap(), vec![suggestion("tweak", 0.9)])]);
    let mut memory = ExecutionMemory::new(3);

    for n in 0..5 {
        run_protocol(
            &ScriptedVerifier::passing_on(2),
            &registry,
            &mut memory,
            &settings,
            &request(&workspace, "fix the typo", &format!("run-{n}")),
            |_| {},
        )
        .expect("run");
        assert!(memory.len() <= 3);
    }

    assert!(memory.entry("run-0").is_none());
    assert!(memory.entry("run-4").is_some());
    let lines = fs::read_to_string(&log_path).expect("read log").lines().count();
    assert_eq!(lines, 3);
}

/// Declared specialists without an implementation are skipped and the gap
/// is recorded in the iteration artifacts.
#[test]
fn unimplemented_specialist_is_skipped_with_recorded_gap() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut registry = StrategyRegistry::new();
    registry
        .register(
            "session-auth",
            capability("session-auth", &[ErrorCategory::Test], &["auth"], 0.85, 3),
            None,
        )
        .expect("declare");
    registry
        .register_strategy(Box::new(applying(
            general_cap(),
            vec![suggestion("refresh the session token", 0.9)],
        )))
        .expect("register");
    let settings = ProtocolSettings {
        iterations_dir: Some(workspace.paths.iterations_dir.clone()),
        ..ProtocolSettings::default()
    };
    let mut memory = ExecutionMemory::new(10);

    let report = run_protocol(
        &ScriptedVerifier::passing_on(2),
        &registry,
        &mut memory,
        &settings,
        &request(
            &workspace,
            "users lose their session when the token expires",
            "run-gap",
        ),
        |_| {},
    )
    .expect("run");

    assert!(report.succeeded);
    assert_eq!(report.strategy_chain, vec!["general"]);
    let meta: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(workspace.paths.run_dir("run-gap").join("1/meta.json"))
            .expect("read meta"),
    )
    .expect("parse meta");
    assert_eq!(meta["candidate_strategies"][0], "session-auth");
    assert_eq!(meta["skipped_strategies"][0], "session-auth");
}

/// A panicking strategy is contained and the next candidate still runs.
#[test]
fn panicking_strategy_does_not_abort_the_run() {
    let workspace = TestWorkspace::new().expect("workspace");
    let mut registry = StrategyRegistry::new();
    registry
        .register_strategy(Box::new(PanickingStrategy::new(test_repair_cap())))
        .expect("register");
    registry
        .register_strategy(Box::new(applying(
            general_cap(),
            vec![suggestion("tweak", 0.9)],
        )))
        .expect("register");
    let mut memory = ExecutionMemory::new(10);

    let report = run_protocol(
        &ScriptedVerifier::passing_on(2),
        &registry,
        &mut memory,
        &ProtocolSettings::default(),
        &request(&workspace, TEST_REQUEST, "run-panic"),
        |_| {},
    )
    .expect("run");

    assert!(report.succeeded);
    assert_eq!(report.strategy_chain, vec!["test-repair", "general"]);
    assert_eq!(report.records[0].strategy_id, "general");
}
