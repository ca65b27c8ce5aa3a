//! Canonical `.fixloop/` paths and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{FixloopConfig, write_config};

const FIXLOOP_GITIGNORE: &str = "iterations/\n";

/// All canonical paths within `.fixloop/` for a project root.
#[derive(Debug, Clone)]
pub struct FixloopPaths {
    pub root: PathBuf,
    pub fixloop_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

impl FixloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let fixloop_dir = root.join(".fixloop");
        Self {
            root: root.clone(),
            iterations_dir: fixloop_dir.join("iterations"),
            gitignore_path: fixloop_dir.join(".gitignore"),
            config_path: fixloop_dir.join("config.toml"),
            fixloop_dir,
        }
    }

    /// Iteration artifacts for one run.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.iterations_dir.join(run_id)
    }

    /// Resolve a config-relative path against the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Options for `init_fixloop`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Overwrite an existing config.
    pub force: bool,
}

/// Create `.fixloop/` with a default config and gitignore.
///
/// Fails if the config already exists unless `options.force` is set.
pub fn init_fixloop(root: &Path, options: &InitOptions) -> Result<FixloopPaths> {
    let paths = FixloopPaths::new(root);
    if paths.fixloop_dir.exists() && !paths.fixloop_dir.is_dir() {
        return Err(anyhow!("fixloop init: .fixloop exists but is not a directory"));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "fixloop init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    fs::create_dir_all(&paths.iterations_dir)
        .with_context(|| format!("create {}", paths.iterations_dir.display()))?;
    fs::write(&paths.gitignore_path, FIXLOOP_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &FixloopConfig::default())?;
    Ok(paths)
}
