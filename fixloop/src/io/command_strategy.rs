//! Strategy backed by an external command.
//!
//! The command receives the rendered strategy prompt on stdin and must print a
//! suggestions document on stdout. The document is validated against the
//! embedded `suggestions.v1` schema before any suggestion is accepted.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Edit, FixSuggestion, StrategyCapability};
use crate::io::edits::apply_edits;
use crate::io::process::run_with_timeout;
use crate::io::prompt::render_strategy_prompt;
use crate::strategy::{Strategy, StrategyContext};

const SUGGESTIONS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/suggestions.v1.schema.json"
));

static SUGGESTIONS_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(SUGGESTIONS_SCHEMA).expect("suggestions schema should be valid json");
    jsonschema::validator_for(&schema).expect("suggestions schema should compile")
});

#[derive(Debug, Deserialize)]
struct SuggestionsDocument {
    suggestions: Vec<ProposedFix>,
}

#[derive(Debug, Deserialize)]
struct ProposedFix {
    description: String,
    #[serde(default)]
    target_files: Vec<PathBuf>,
    #[serde(default)]
    edits: Vec<Edit>,
    confidence: f64,
}

/// Runs `command` in `workdir` to propose fixes and applies them as file edits.
#[derive(Debug, Clone)]
pub struct CommandStrategy {
    pub capability: StrategyCapability,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Strategy for CommandStrategy {
    fn capability(&self) -> StrategyCapability {
        self.capability.clone()
    }

    #[instrument(skip_all, fields(strategy = %self.capability.id))]
    fn propose_fixes(&self, context: &StrategyContext) -> Result<Vec<FixSuggestion>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("strategy command is empty"))?;
        let prompt = render_strategy_prompt(&self.capability, context)?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let captured = run_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run strategy command {}", self.command.join(" ")))?;

        if captured.timed_out {
            return Err(anyhow!(
                "strategy command timed out after {} ms",
                self.timeout.as_millis()
            ));
        }
        if !captured.succeeded() {
            return Err(anyhow!(
                "strategy command exited with {:?}: {}",
                captured.exit_code,
                captured.stderr.trim()
            ));
        }
        let suggestions = parse_suggestions(&self.capability.id, &captured.stdout)?;
        info!(count = suggestions.len(), "strategy proposed fixes");
        Ok(suggestions)
    }

    fn apply_fix(&self, suggestion: &FixSuggestion) -> bool {
        if suggestion.edits.is_empty() {
            warn!(strategy = %self.capability.id, description = %suggestion.description, "suggestion has no edits");
            return false;
        }
        match apply_edits(&self.workdir, &suggestion.edits) {
            Ok(files) => {
                debug!(strategy = %self.capability.id, files = files.len(), "edits applied");
                true
            }
            Err(err) => {
                warn!(strategy = %self.capability.id, err = %format!("{err:#}"), "failed to apply edits");
                false
            }
        }
    }
}

/// Parse and validate a suggestions document printed by a strategy command.
///
/// Accepts the document alone or surrounded by other text; confidences are
/// clamped to `[0, 1]`.
pub fn parse_suggestions(strategy_id: &str, stdout: &str) -> Result<Vec<FixSuggestion>> {
    let value = extract_document(stdout)?;
    let messages: Vec<String> = SUGGESTIONS_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(anyhow!(
            "suggestions schema validation failed: {}",
            messages.join("; ")
        ));
    }
    let document: SuggestionsDocument =
        serde_json::from_value(value).context("deserialize suggestions")?;
    Ok(document
        .suggestions
        .into_iter()
        .map(|proposed| FixSuggestion {
            strategy_id: strategy_id.to_string(),
            description: proposed.description,
            target_files: proposed.target_files,
            edits: proposed.edits,
            confidence: proposed.confidence.clamp(0.0, 1.0),
        })
        .collect())
}

fn extract_document(stdout: &str) -> Result<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("strategy command printed nothing"));
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(anyhow!("strategy output contains no JSON object"));
    };
    if end < start {
        return Err(anyhow!("strategy output contains no JSON object"));
    }
    serde_json::from_str(&trimmed[start..=end]).context("parse strategy output as JSON")
}
