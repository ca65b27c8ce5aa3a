//! Deterministic, pure logic shared by the repair controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod invariants;
pub mod rules;
pub mod selector;
pub mod similarity;
pub mod types;
