//! Iterative repair controller.
//!
//! Given a natural-language request and an executable check, `fixloop`
//! repeatedly runs the check, classifies the failure, dispatches ranked
//! repair strategies to apply fixes, and remembers which approaches worked
//! for similar requests in the past.
//!
//! - **[`core`]**: pure, deterministic logic (classification rules, tier
//!   budgets, suggestion scoring, similarity, invariants).
//! - **[`io`]**: side effects (config, child processes, file edits, iteration
//!   artifacts, the memory log, templates).
//!
//! [`strategy`], [`registry`], [`orchestrator`], [`memory`] and [`protocol`]
//! tie the two together into a run.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod memory;
pub mod orchestrator;
pub mod protocol;
pub mod registry;
pub mod strategy;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
