//! Shared deterministic types for the repair controller.
//!
//! These types define stable contracts between the classifier, strategies,
//! the orchestrator, and the protocol. They do not depend on external state
//! or I/O.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifier of a registered repair strategy ("specialist").
pub type StrategyId = String;

/// Strategy used when classification finds no matching specialist.
pub const DEFAULT_STRATEGY: &str = "general";

/// Closed set of failure categories assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Syntax,
    Type,
    Dependency,
    Logic,
    Test,
    Build,
    Lint,
    Runtime,
    Other,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 9] = [
        ErrorCategory::Syntax,
        ErrorCategory::Type,
        ErrorCategory::Dependency,
        ErrorCategory::Logic,
        ErrorCategory::Test,
        ErrorCategory::Build,
        ErrorCategory::Lint,
        ErrorCategory::Runtime,
        ErrorCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syntax => "syntax",
            Self::Type => "type",
            Self::Dependency => "dependency",
            Self::Logic => "logic",
            Self::Test => "test",
            Self::Build => "build",
            Self::Lint => "lint",
            Self::Runtime => "runtime",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one run of the external verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub passed: bool,
    /// Captured stdout.
    pub output: String,
    /// Captured stderr, or a controller-side explanation (timeout, spawn failure).
    pub diagnostic: String,
    pub duration_ms: u64,
}

impl VerificationOutcome {
    /// Text handed to the classifier: diagnostic first, then stdout.
    pub fn diagnostic_text(&self) -> String {
        match (self.diagnostic.trim().is_empty(), self.output.trim().is_empty()) {
            (true, _) => self.output.clone(),
            (false, true) => self.diagnostic.clone(),
            (false, false) => format!("{}\n{}", self.diagnostic, self.output),
        }
    }
}

/// Decision of which failure category applies and which strategies to try.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemClassification {
    pub primary_category: ErrorCategory,
    pub secondary_categories: Vec<ErrorCategory>,
    /// Domains detected in the request/diagnostic, strongest first.
    pub domains: Vec<String>,
    /// Ordered, never empty.
    pub candidate_strategies: Vec<StrategyId>,
    /// Heuristic scalar in `[0.3, 0.95]`.
    pub confidence: f64,
    pub rationale: String,
}

/// A single textual edit to a file under the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Edit {
    /// Replace the first exact occurrence of `find` with `replace`.
    Replace {
        file: PathBuf,
        find: String,
        replace: String,
    },
    /// Overwrite (or create) the whole file.
    Write { file: PathBuf, contents: String },
    /// Append to the file, creating it if missing.
    Append { file: PathBuf, contents: String },
}

impl Edit {
    pub fn file(&self) -> &PathBuf {
        match self {
            Self::Replace { file, .. } | Self::Write { file, .. } | Self::Append { file, .. } => {
                file
            }
        }
    }
}

/// Proposed change produced by a strategy. Ephemeral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixSuggestion {
    pub strategy_id: StrategyId,
    pub description: String,
    #[serde(default)]
    pub target_files: Vec<PathBuf>,
    #[serde(default)]
    pub edits: Vec<Edit>,
    pub confidence: f64,
}

/// Outcome of one outer loop iteration. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-indexed, strictly increasing within a run.
    pub index: u32,
    pub strategy_id: StrategyId,
    pub suggestion_description: String,
    pub files_touched: Vec<PathBuf>,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How one strategy attempt ended.
///
/// `Partial` means the edit was applied but verification has not confirmed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Partial,
}

/// Static self-description of a strategy, declared at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyCapability {
    pub id: StrategyId,
    pub supported_categories: BTreeSet<ErrorCategory>,
    /// Empty means domain-agnostic (generality-optimized).
    pub supported_domains: BTreeSet<String>,
    pub base_confidence: f64,
    pub iteration_budget: u32,
}

impl StrategyCapability {
    pub fn new(
        id: &str,
        categories: &[ErrorCategory],
        domains: &[&str],
        base_confidence: f64,
        iteration_budget: u32,
    ) -> Self {
        Self {
            id: id.to_string(),
            supported_categories: categories.iter().copied().collect(),
            supported_domains: domains.iter().map(|d| d.to_string()).collect(),
            base_confidence,
            iteration_budget,
        }
    }

    /// True when the strategy declares at least one domain.
    pub fn is_domain_specific(&self) -> bool {
        !self.supported_domains.is_empty()
    }
}

/// Complexity tier fixed once per run; selects the outer iteration budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    Simple,
    Moderate,
    Complex,
    MultiStrategy,
}

impl ComplexityTier {
    pub fn max_iterations(&self) -> u32 {
        match self {
            Self::Simple => 5,
            Self::Moderate => 8,
            Self::Complex => 12,
            Self::MultiStrategy => 15,
        }
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::MultiStrategy => "multi_strategy",
        };
        f.write_str(s)
    }
}
