//! Iteration artifacts under `.fixloop/iterations/<run-id>/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{ErrorCategory, IterationRecord, StrategyId};

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iteration: u32,
    pub verification_passed: bool,
    pub verification_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<ErrorCategory>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidate_strategies: Vec<StrategyId>,
    /// Registered strategies skipped for lack of an implementation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_strategies: Vec<StrategyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<IterationRecord>,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub verify_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(run_dir: &Path, iteration: u32) -> Self {
        let dir = run_dir.join(iteration.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            verify_log_path: dir.join("verify.log"),
            dir,
        }
    }
}

/// Write `meta.json` and `verify.log` for one iteration.
pub fn write_iteration(
    run_dir: &Path,
    meta: &IterationMeta,
    verify_log: &str,
) -> Result<IterationPaths> {
    let paths = IterationPaths::new(run_dir, meta.iteration);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    let mut buf = serde_json::to_string_pretty(meta)?;
    buf.push('\n');
    fs::write(&paths.meta_path, buf)
        .with_context(|| format!("write {}", paths.meta_path.display()))?;
    fs::write(&paths.verify_log_path, verify_log)
        .with_context(|| format!("write {}", paths.verify_log_path.display()))?;
    Ok(paths)
}

/// Remove a run's artifacts. Missing directories are fine.
pub fn remove_run_dir(run_dir: &Path) -> Result<()> {
    if !run_dir.exists() {
        return Ok(());
    }
    fs::remove_dir_all(run_dir).with_context(|| format!("remove {}", run_dir.display()))
}
