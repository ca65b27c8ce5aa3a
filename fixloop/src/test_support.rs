//! Test doubles and builders shared by unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{
    ErrorCategory, FixSuggestion, StrategyCapability, VerificationOutcome,
};
use crate::io::init::{FixloopPaths, InitOptions, init_fixloop};
use crate::io::verification::{CheckDefinition, Verifier};
use crate::strategy::{Strategy, StrategyContext};

/// Diagnostic used for scripted verification failures.
pub const FAILING_DIAGNOSTIC: &str =
    "test result: FAILED. 1 passed; 1 failed\nassertion failed: `(left == right)`";

pub fn capability(
    id: &str,
    categories: &[ErrorCategory],
    domains: &[&str],
    base_confidence: f64,
    iteration_budget: u32,
) -> StrategyCapability {
    StrategyCapability::new(id, categories, domains, base_confidence, iteration_budget)
}

/// Suggestion with no edits; scripted strategies decide whether it applies.
pub fn suggestion(description: &str, confidence: f64) -> FixSuggestion {
    FixSuggestion {
        strategy_id: String::new(),
        description: description.to_string(),
        target_files: Vec::new(),
        edits: Vec::new(),
        confidence,
    }
}

/// Verifier returning a scripted sequence of pass/fail results.
///
/// Once the script runs out the last result repeats (failure if empty).
pub struct ScriptedVerifier {
    results: RefCell<VecDeque<bool>>,
    last: Cell<bool>,
    runs: Cell<u32>,
    probe_error: Option<String>,
}

impl ScriptedVerifier {
    pub fn new(results: Vec<bool>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            last: Cell::new(false),
            runs: Cell::new(0),
            probe_error: None,
        }
    }

    pub fn always_failing() -> Self {
        Self::new(Vec::new())
    }

    /// Passes on run `n` (1-indexed) and fails before it.
    pub fn passing_on(n: u32) -> Self {
        let mut results = vec![false; n.saturating_sub(1) as usize];
        results.push(true);
        Self::new(results)
    }

    pub fn with_probe_error(mut self, reason: &str) -> Self {
        self.probe_error = Some(reason.to_string());
        self
    }

    pub fn runs(&self) -> u32 {
        self.runs.get()
    }
}

impl Verifier for ScriptedVerifier {
    fn probe(&self, _check: &CheckDefinition) -> Result<()> {
        match &self.probe_error {
            Some(reason) => Err(anyhow!("{reason}")),
            None => Ok(()),
        }
    }

    fn run(&self, _check: &CheckDefinition, _timeout: Duration) -> VerificationOutcome {
        self.runs.set(self.runs.get() + 1);
        let passed = self
            .results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.last.get());
        self.last.set(passed);
        VerificationOutcome {
            passed,
            output: if passed { "ok".to_string() } else { String::new() },
            diagnostic: if passed {
                String::new()
            } else {
                FAILING_DIAGNOSTIC.to_string()
            },
            duration_ms: 1,
        }
    }
}

/// What a [`ScriptedStrategy`] observed. Shared so tests can inspect it after
/// the strategy is boxed into a registry.
#[derive(Default)]
pub struct StrategyLog {
    pub contexts: RefCell<Vec<StrategyContext>>,
    pub applied: RefCell<Vec<String>>,
}

impl StrategyLog {
    pub fn proposals(&self) -> usize {
        self.contexts.borrow().len()
    }
}

/// Strategy returning the same suggestions on every proposal.
///
/// Applications succeed unless scripted otherwise.
pub struct ScriptedStrategy {
    capability: StrategyCapability,
    suggestions: Vec<FixSuggestion>,
    apply_results: RefCell<VecDeque<bool>>,
    propose_error: Option<String>,
    log: Rc<StrategyLog>,
}

impl ScriptedStrategy {
    pub fn new(capability: StrategyCapability) -> Self {
        Self {
            capability,
            suggestions: Vec::new(),
            apply_results: RefCell::new(VecDeque::new()),
            propose_error: None,
            log: Rc::new(StrategyLog::default()),
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<FixSuggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_apply_results(self, results: Vec<bool>) -> Self {
        *self.apply_results.borrow_mut() = results.into();
        self
    }

    pub fn with_propose_error(mut self, message: &str) -> Self {
        self.propose_error = Some(message.to_string());
        self
    }

    pub fn log(&self) -> Rc<StrategyLog> {
        Rc::clone(&self.log)
    }
}

impl Strategy for ScriptedStrategy {
    fn capability(&self) -> StrategyCapability {
        self.capability.clone()
    }

    fn propose_fixes(&self, context: &StrategyContext) -> Result<Vec<FixSuggestion>> {
        self.log.contexts.borrow_mut().push(context.clone());
        if let Some(message) = &self.propose_error {
            return Err(anyhow!("{message}"));
        }
        Ok(self.suggestions.clone())
    }

    fn apply_fix(&self, suggestion: &FixSuggestion) -> bool {
        let applied = self.apply_results.borrow_mut().pop_front().unwrap_or(true);
        if applied {
            self.log
                .applied
                .borrow_mut()
                .push(suggestion.description.clone());
        }
        applied
    }
}

/// Strategy whose proposal step panics.
pub struct PanickingStrategy {
    capability: StrategyCapability,
}

impl PanickingStrategy {
    pub fn new(capability: StrategyCapability) -> Self {
        Self { capability }
    }
}

impl Strategy for PanickingStrategy {
    fn capability(&self) -> StrategyCapability {
        self.capability.clone()
    }

    fn propose_fixes(&self, _context: &StrategyContext) -> Result<Vec<FixSuggestion>> {
        panic!("strategy backend crashed");
    }

    fn apply_fix(&self, _suggestion: &FixSuggestion) -> bool {
        false
    }
}

/// Temporary project with an initialized `.fixloop/` directory.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub paths: FixloopPaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = init_fixloop(dir.path(), &InitOptions::default())?;
        Ok(Self { dir, paths })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Check definition that never reaches a real process.
    pub fn check(&self) -> CheckDefinition {
        CheckDefinition {
            command: vec!["scripted-check".to_string()],
            workdir: self.root().to_path_buf(),
        }
    }
}
