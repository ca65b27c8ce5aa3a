//! Controller configuration stored under `.fixloop/config.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{ErrorCategory, StrategyCapability};

/// Controller configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values in
/// [`FixloopConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FixloopConfig {
    /// Overrides the complexity-tier iteration budget when set.
    pub max_iterations: Option<u32>,

    /// Wall-clock limit for one verification run, in milliseconds.
    pub verification_timeout_ms: u64,

    /// Remove the run's iteration artifacts once the run completes.
    pub cleanup_on_completion: bool,

    /// Directory the check and strategies run in, relative to the project root.
    pub working_directory: PathBuf,

    /// Truncate captured check/strategy output beyond this many bytes per stream.
    pub output_limit_bytes: usize,

    pub check: CheckConfig,

    pub memory: MemoryConfig,

    /// Strategy table. Entries override the built-in capability with the same
    /// id and add new ones.
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckConfig {
    /// Verification command (e.g. `["cargo","test"]`).
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memory log location, relative to the project root.
    pub path: PathBuf,
    /// Rolling history cap.
    pub capacity: usize,
}

/// One `[[strategies]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    pub id: String,
    pub categories: Vec<ErrorCategory>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default = "default_base_confidence")]
    pub base_confidence: f64,
    #[serde(default = "default_iteration_budget")]
    pub iteration_budget: u32,
    /// Backend command. Strategies without one are declared but not instantiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Per-proposal timeout; defaults to `verification_timeout_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_base_confidence() -> f64 {
    0.5
}

fn default_iteration_budget() -> u32 {
    3
}

impl StrategyConfig {
    pub fn capability(&self) -> StrategyCapability {
        StrategyCapability {
            id: self.id.clone(),
            supported_categories: self.categories.iter().copied().collect(),
            supported_domains: self.domains.iter().cloned().collect::<BTreeSet<_>>(),
            base_confidence: self.base_confidence,
            iteration_budget: self.iteration_budget,
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            command: vec!["cargo".to_string(), "test".to_string()],
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".fixloop/memory.jsonl"),
            capacity: 100,
        }
    }
}

impl Default for FixloopConfig {
    fn default() -> Self {
        Self {
            max_iterations: None,
            verification_timeout_ms: 10 * 60 * 1000,
            cleanup_on_completion: false,
            working_directory: PathBuf::from("."),
            output_limit_bytes: 100_000,
            check: CheckConfig::default(),
            memory: MemoryConfig::default(),
            strategies: Vec::new(),
        }
    }
}

impl FixloopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.verification_timeout_ms == 0 {
            return Err(anyhow!("verification_timeout_ms must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.max_iterations == Some(0) {
            return Err(anyhow!("max_iterations must be > 0 when set"));
        }
        if self.memory.capacity == 0 {
            return Err(anyhow!("memory.capacity must be > 0"));
        }
        let mut seen = BTreeSet::new();
        for strategy in &self.strategies {
            if strategy.id.trim().is_empty() {
                return Err(anyhow!("strategies: id must be non-empty"));
            }
            if !seen.insert(strategy.id.as_str()) {
                return Err(anyhow!("strategies: duplicate id '{}'", strategy.id));
            }
            if strategy.categories.is_empty() {
                return Err(anyhow!(
                    "strategies.{}: categories must be non-empty",
                    strategy.id
                ));
            }
            if !(0.0..=1.0).contains(&strategy.base_confidence) {
                return Err(anyhow!(
                    "strategies.{}: base_confidence must be within [0,1]",
                    strategy.id
                ));
            }
            if strategy.iteration_budget == 0 {
                return Err(anyhow!(
                    "strategies.{}: iteration_budget must be > 0",
                    strategy.id
                ));
            }
            if let Some(command) = &strategy.command
                && command.first().is_none_or(|program| program.trim().is_empty())
            {
                return Err(anyhow!(
                    "strategies.{}: command must be a non-empty array",
                    strategy.id
                ));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FixloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<FixloopConfig> {
    if !path.exists() {
        let cfg = FixloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FixloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FixloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
