//! Strategy registry: explicit table of capability descriptors and optional
//! implementations, looked up by id.
//!
//! A strategy can be declared (capability only) without an implementation.
//! The classifier may still recommend it; the orchestrator skips it and logs
//! the gap.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::debug;

use crate::core::types::{DEFAULT_STRATEGY, ErrorCategory, StrategyCapability};
use crate::io::command_strategy::CommandStrategy;
use crate::io::config::FixloopConfig;
use crate::strategy::Strategy;

pub struct RegisteredStrategy {
    pub capability: StrategyCapability,
    pub implementation: Option<Box<dyn Strategy>>,
}

/// Insertion-ordered table keyed by strategy id.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: Vec<RegisteredStrategy>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `capability` under `id`. Ids are unique; the capability's own
    /// id is overwritten with `id`.
    pub fn register(
        &mut self,
        id: &str,
        mut capability: StrategyCapability,
        implementation: Option<Box<dyn Strategy>>,
    ) -> Result<()> {
        if id.trim().is_empty() {
            return Err(anyhow!("strategy id must be non-empty"));
        }
        if self.get(id).is_some() {
            return Err(anyhow!("strategy '{id}' is already registered"));
        }
        capability.id = id.to_string();
        debug!(strategy = id, implemented = implementation.is_some(), "strategy registered");
        self.entries.push(RegisteredStrategy {
            capability,
            implementation,
        });
        Ok(())
    }

    /// Register an implementation under its self-declared capability.
    pub fn register_strategy(&mut self, strategy: Box<dyn Strategy>) -> Result<()> {
        let capability = strategy.capability();
        let id = capability.id.clone();
        self.register(&id, capability, Some(strategy))
    }

    /// Replace the capability and implementation of `id`, registering it if new.
    pub fn upsert(
        &mut self,
        capability: StrategyCapability,
        implementation: Option<Box<dyn Strategy>>,
    ) {
        match self.entries.iter_mut().find(|entry| entry.capability.id == capability.id) {
            Some(existing) => {
                existing.capability = capability;
                existing.implementation = implementation;
            }
            None => self.entries.push(RegisteredStrategy {
                capability,
                implementation,
            }),
        }
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredStrategy> {
        self.entries.iter().find(|entry| entry.capability.id == id)
    }

    pub fn capabilities(&self) -> Vec<StrategyCapability> {
        self.entries
            .iter()
            .map(|entry| entry.capability.clone())
            .collect()
    }

    pub fn entries(&self) -> &[RegisteredStrategy] {
        &self.entries
    }

    /// Built-in capability table, declared without implementations, plus the
    /// strategies configured in `cfg`. Configured entries with a `command` are
    /// instantiated as [`CommandStrategy`].
    pub fn from_config(cfg: &FixloopConfig, workdir: &Path) -> Result<Self> {
        let mut registry = Self::new();
        for capability in builtin_capabilities() {
            let id = capability.id.clone();
            registry.register(&id, capability, None)?;
        }
        for strategy in &cfg.strategies {
            let capability = strategy.capability();
            let implementation = strategy.command.as_ref().map(|command| {
                let timeout_ms = strategy.timeout_ms.unwrap_or(cfg.verification_timeout_ms);
                Box::new(CommandStrategy {
                    capability: capability.clone(),
                    command: command.clone(),
                    workdir: workdir.to_path_buf(),
                    timeout: Duration::from_millis(timeout_ms),
                    output_limit_bytes: cfg.output_limit_bytes,
                }) as Box<dyn Strategy>
            });
            registry.upsert(capability, implementation);
        }
        Ok(registry)
    }
}

/// Default specialists. Domain specialists first, then generic repairers,
/// then the catch-all fallback.
pub fn builtin_capabilities() -> Vec<StrategyCapability> {
    use ErrorCategory::{Build, Dependency, Lint, Logic, Runtime, Syntax, Test, Type};
    vec![
        StrategyCapability::new("session-auth", &[Test, Runtime, Logic, Type], &["auth"], 0.85, 3),
        StrategyCapability::new("ui", &[Test, Runtime, Logic, Lint, Type], &["ui"], 0.8, 3),
        StrategyCapability::new("data", &[Test, Runtime, Logic, Type], &["data"], 0.75, 3),
        StrategyCapability::new("test-repair", &[Test, Logic], &[], 0.7, 3),
        StrategyCapability::new(
            "build-repair",
            &[Syntax, Type, Dependency, Build, Lint],
            &[],
            0.7,
            3,
        ),
        StrategyCapability::new(DEFAULT_STRATEGY, &ErrorCategory::ALL, &[], 0.5, 3),
    ]
}
