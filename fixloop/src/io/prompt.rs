//! Template rendering for strategy prompts and run reports.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::{ErrorCategory, IterationRecord, StrategyCapability};
use crate::protocol::{RunReport, RunStop};
use crate::strategy::StrategyContext;

const STRATEGY_TEMPLATE: &str = include_str!("prompts/strategy.md");
const REPORT_TEMPLATE: &str = include_str!("prompts/report.txt");

/// Diagnostic tail kept in prompts; older output is dropped first.
const DIAGNOSTIC_PROMPT_CHARS: usize = 8_000;

#[derive(Debug, Serialize)]
struct StrategySummary<'a> {
    id: &'a str,
    categories: Vec<&'static str>,
    domains: Vec<&'a str>,
}

impl<'a> StrategySummary<'a> {
    fn from_capability(capability: &'a StrategyCapability) -> Self {
        Self {
            id: &capability.id,
            categories: capability
                .supported_categories
                .iter()
                .map(ErrorCategory::as_str)
                .collect(),
            domains: capability.supported_domains.iter().map(String::as_str).collect(),
        }
    }
}

struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("strategy", STRATEGY_TEMPLATE)
            .expect("strategy template should be valid");
        env.add_template("report", REPORT_TEMPLATE)
            .expect("report template should be valid");
        Self { env }
    }
}

/// Render the stdin prompt handed to a command-backed strategy.
pub fn render_strategy_prompt(
    capability: &StrategyCapability,
    context: &StrategyContext,
) -> Result<String> {
    let engine = TemplateEngine::new();
    let template = engine.env.get_template("strategy")?;
    let prior: &[IterationRecord] = &context.prior_iterations;
    let rendered = template.render(context! {
        strategy => StrategySummary::from_capability(capability),
        request => context.request_text.trim(),
        classification => &context.classification,
        memory_hint => context.memory_hint.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        prior => prior,
        diagnostic => tail_chars(context.diagnostic_text.trim(), DIAGNOSTIC_PROMPT_CHARS),
    })?;
    Ok(rendered)
}

/// Render the human-readable summary printed by `fixloop run`.
pub fn render_report(report: &RunReport) -> Result<String> {
    let engine = TemplateEngine::new();
    let template = engine.env.get_template("report")?;
    let (status, stalled_reason) = match &report.stop {
        RunStop::Passed { .. } => ("passed", None),
        RunStop::Exhausted { .. } => ("exhausted", None),
        RunStop::Stalled { reason, .. } => ("stalled", Some(reason.as_str())),
    };
    let modified_files: Vec<String> = report
        .modified_files
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    let rendered = template.render(context! {
        run_id => &report.run_id,
        status => status,
        stalled_reason => stalled_reason,
        tier => report.tier.to_string(),
        iterations_used => report.iterations_used,
        max_iterations => report.max_iterations,
        elapsed_ms => report.elapsed_ms,
        strategy_chain => &report.strategy_chain,
        changes => &report.changes,
        modified_files => modified_files,
        warnings => &report.warnings,
    })?;
    Ok(rendered)
}

fn tail_chars(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - limit).collect();
    format!("[... {} earlier characters omitted]\n{skipped}", count - limit)
}
