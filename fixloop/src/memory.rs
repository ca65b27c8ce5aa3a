//! Execution memory: bounded history of past runs and what fixed them.
//!
//! Entries are keyed by run id. Similar past successes are ranked by Jaccard
//! similarity of their request text; the store keeps at most `capacity`
//! entries and evicts the oldest by timestamp as soon as it overflows.
//! Persistence lives in [`crate::io::memory_log`].

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::similarity::request_similarity;
use crate::core::types::{AttemptOutcome, StrategyId};

/// Minimum request similarity for a past success to count as "similar".
pub const SIMILARITY_THRESHOLD: f64 = 0.5;

/// Default rolling history cap.
pub const DEFAULT_CAPACITY: usize = 100;

/// One approach tried during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAttempt {
    pub strategy_id: StrategyId,
    pub approach: String,
    pub outcome: AttemptOutcome,
    /// Outer iteration the attempt happened in.
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedEdit {
    pub file: PathBuf,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

/// History of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMemoryEntry {
    pub id: String,
    pub original_request: String,
    #[serde(default)]
    pub attempts: Vec<MemoryAttempt>,
    #[serde(default)]
    pub applied_edits: Vec<AppliedEdit>,
    #[serde(default)]
    pub succeeded: bool,
    #[serde(default)]
    pub total_iterations: u32,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionMemoryEntry {
    pub fn new(id: &str, original_request: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            original_request: original_request.to_string(),
            attempts: Vec::new(),
            applied_edits: Vec::new(),
            succeeded: false,
            total_iterations: 0,
            timestamp,
        }
    }

    /// Approaches that verification confirmed.
    pub fn successful_approaches(&self) -> impl Iterator<Item = &MemoryAttempt> {
        self.attempts
            .iter()
            .filter(|attempt| attempt.outcome == AttemptOutcome::Success)
    }
}

/// Bounded in-process memory store.
#[derive(Debug, Clone)]
pub struct ExecutionMemory {
    entries: Vec<ExecutionMemoryEntry>,
    capacity: usize,
    evicted: usize,
}

impl Default for ExecutionMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ExecutionMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    /// Build a store from persisted entries, pruning to `capacity`.
    pub fn from_entries(entries: Vec<ExecutionMemoryEntry>, capacity: usize) -> Self {
        let mut memory = Self::new(capacity);
        memory.entries = entries;
        memory.prune_memory(memory.capacity);
        memory
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> &[ExecutionMemoryEntry] {
        &self.entries
    }

    pub fn entry(&self, id: &str) -> Option<&ExecutionMemoryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted since the store was built.
    pub fn evicted_count(&self) -> usize {
        self.evicted
    }

    /// Start tracking a run. Evicts the oldest entries when over capacity.
    pub fn create_entry(&mut self, id: &str, original_request: &str) -> Result<()> {
        self.create_entry_at(id, original_request, Utc::now())
    }

    pub fn create_entry_at(
        &mut self,
        id: &str,
        original_request: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        if self.entry(id).is_some() {
            return Err(anyhow!("memory entry '{id}' already exists"));
        }
        self.entries
            .push(ExecutionMemoryEntry::new(id, original_request, timestamp));
        if self.entries.len() > self.capacity {
            self.prune_retaining(self.capacity, Some(id));
        }
        Ok(())
    }

    pub fn record_attempt(&mut self, id: &str, attempt: MemoryAttempt) -> Result<()> {
        self.entry_mut(id)?.attempts.push(attempt);
        Ok(())
    }

    pub fn record_applied_edit(&mut self, id: &str, file: PathBuf, description: &str) -> Result<()> {
        self.entry_mut(id)?.applied_edits.push(AppliedEdit {
            file,
            description: description.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Close out a run with its final status.
    pub fn finish_entry(&mut self, id: &str, succeeded: bool, total_iterations: u32) -> Result<()> {
        let entry = self.entry_mut(id)?;
        entry.succeeded = succeeded;
        entry.total_iterations = total_iterations;
        Ok(())
    }

    pub fn mark_succeeded(&mut self, id: &str, total_iterations: u32) -> Result<()> {
        self.finish_entry(id, true, total_iterations)
    }

    /// Succeeded entries whose request is more than
    /// [`SIMILARITY_THRESHOLD`] similar to `request_text`.
    ///
    /// With `strategy_id`, only entries holding an attempt by that strategy
    /// qualify, whatever the attempt's outcome. Ordered by `total_iterations`
    /// descending, then newest first.
    pub fn find_similar_successes(
        &self,
        request_text: &str,
        strategy_id: Option<&str>,
    ) -> Vec<&ExecutionMemoryEntry> {
        let mut similar: Vec<&ExecutionMemoryEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.succeeded)
            .filter(|entry| {
                strategy_id.is_none_or(|wanted| {
                    entry
                        .attempts
                        .iter()
                        .any(|attempt| attempt.strategy_id == wanted)
                })
            })
            .filter(|entry| {
                request_similarity(request_text, &entry.original_request) > SIMILARITY_THRESHOLD
            })
            .collect();
        similar.sort_by(|a, b| {
            b.total_iterations
                .cmp(&a.total_iterations)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        similar
    }

    /// First successful approach from a similar past run that belongs to one
    /// of `candidates` and has not been tried in entry `id` yet.
    ///
    /// An empty `candidates` slice allows every strategy.
    pub fn suggest_next_approach(
        &self,
        id: &str,
        failed_approaches: &[String],
        candidates: &[StrategyId],
    ) -> Option<String> {
        let current = self.entry(id)?;
        let tried = |approach: &str| {
            failed_approaches.iter().any(|failed| failed == approach)
                || current.attempts.iter().any(|attempt| attempt.approach == approach)
        };
        let allowed = |strategy: &str| {
            candidates.is_empty() || candidates.iter().any(|candidate| candidate == strategy)
        };

        self.find_similar_successes(&current.original_request, None)
            .into_iter()
            .filter(|entry| entry.id != id)
            .flat_map(ExecutionMemoryEntry::successful_approaches)
            .find(|attempt| allowed(attempt.strategy_id.as_str()) && !tried(attempt.approach.as_str()))
            .map(|attempt| attempt.approach.clone())
    }

    /// Keep the `keep` newest entries by timestamp. Returns how many were evicted.
    pub fn prune_memory(&mut self, keep: usize) -> usize {
        self.prune_retaining(keep, None)
    }

    /// Like [`prune_memory`](Self::prune_memory), but entry `protected` always
    /// survives and takes one of the `keep` slots.
    fn prune_retaining(&mut self, keep: usize, protected: Option<&str>) -> usize {
        if self.entries.len() <= keep {
            return 0;
        }
        let mut order: Vec<usize> = (0..self.entries.len()).collect();
        // Protected first, then newest; later insertions win timestamp ties.
        order.sort_by(|&a, &b| {
            let is_protected = |idx: usize| Some(self.entries[idx].id.as_str()) == protected;
            is_protected(b)
                .cmp(&is_protected(a))
                .then_with(|| self.entries[b].timestamp.cmp(&self.entries[a].timestamp))
                .then_with(|| b.cmp(&a))
        });
        let mut retained = vec![false; self.entries.len()];
        for &idx in order.iter().take(keep.max(usize::from(protected.is_some()))) {
            retained[idx] = true;
        }
        let before = self.entries.len();
        let mut idx = 0;
        self.entries.retain(|_| {
            let keep_it = retained[idx];
            idx += 1;
            keep_it
        });
        let evicted = before - self.entries.len();
        self.evicted += evicted;
        debug!(evicted, kept = self.entries.len(), "memory pruned");
        evicted
    }

    /// Next free run id for `now`: `run-<yyyymmddhhmmss>-<n>`.
    pub fn next_run_id(&self, now: DateTime<Utc>) -> String {
        let stamp = now.format("%Y%m%d%H%M%S");
        (1..)
            .map(|n| format!("run-{stamp}-{n}"))
            .find(|candidate| self.entry(candidate).is_none())
            .unwrap_or_else(|| format!("run-{stamp}"))
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut ExecutionMemoryEntry> {
        self.entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or_else(|| anyhow!("unknown memory entry '{id}'"))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid date")
            + Duration::seconds(seconds)
    }

    fn attempt(strategy: &str, approach: &str, outcome: AttemptOutcome) -> MemoryAttempt {
        MemoryAttempt {
            strategy_id: strategy.to_string(),
            approach: approach.to_string(),
            outcome,
            iteration: 1,
            error: None,
        }
    }

    fn seeded_success(
        memory: &mut ExecutionMemory,
        id: &str,
        request: &str,
        iterations: u32,
        seconds: i64,
    ) {
        memory.create_entry_at(id, request, at(seconds)).expect("create");
        memory
            .record_attempt(
                id,
                attempt("test-repair", &format!("approach from {id}"), AttemptOutcome::Success),
            )
            .expect("attempt");
        memory.mark_succeeded(id, iterations).expect("finish");
    }

    #[test]
    fn suggests_approach_from_similar_success() {
        let mut memory = ExecutionMemory::new(10);
        memory.create_entry_at("past", "fix the failing unit tests", at(0)).expect("create");
        memory
            .record_attempt(
                "past",
                attempt(
                    "test-repair",
                    "fix implementation to match test expectations",
                    AttemptOutcome::Success,
                ),
            )
            .expect("attempt");
        memory.mark_succeeded("past", 2).expect("finish");

        memory.create_entry_at("now", "fix the failing unit tests", at(10)).expect("create");
        let hint = memory.suggest_next_approach("now", &[], &["test-repair".to_string()]);
        assert_eq!(
            hint.as_deref(),
            Some("fix implementation to match test expectations")
        );

        // Excluded once tried or when the strategy is not a candidate.
        let failed = vec!["fix implementation to match test expectations".to_string()];
        assert_eq!(memory.suggest_next_approach("now", &failed, &[]), None);
        assert_eq!(
            memory.suggest_next_approach("now", &[], &["ui".to_string()]),
            None
        );
    }

    #[test]
    fn similar_successes_require_success_and_similarity() {
        let mut memory = ExecutionMemory::new(10);
        seeded_success(&mut memory, "a", "fix the failing unit tests", 1, 0);
        memory.create_entry_at("b", "fix the failing unit tests", at(1)).expect("create");
        memory.finish_entry("b", false, 5).expect("finish");
        seeded_success(&mut memory, "c", "render the dashboard chart", 1, 2);

        let found = memory.find_similar_successes("fix failing unit tests", None);
        let ids: Vec<&str> = found.iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);

        assert!(memory
            .find_similar_successes("fix failing unit tests", Some("ui"))
            .is_empty());
    }

    #[test]
    fn strategy_filter_matches_any_attempt_by_that_strategy() {
        let mut memory = ExecutionMemory::new(10);
        seeded_success(&mut memory, "a", "fix the failing unit tests", 2, 0);
        memory
            .record_attempt("a", attempt("ui", "restyle the button", AttemptOutcome::Failure))
            .expect("attempt");

        let found = memory.find_similar_successes("fix the failing unit tests", Some("ui"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[test]
    fn similar_successes_rank_by_total_iterations_descending() {
        let mut memory = ExecutionMemory::new(10);
        seeded_success(&mut memory, "quick", "fix the failing unit tests", 1, 0);
        seeded_success(&mut memory, "slow", "fix the failing unit tests", 4, 1);
        seeded_success(&mut memory, "slow-newer", "fix the failing unit tests", 4, 2);

        let ids: Vec<&str> = memory
            .find_similar_successes("fix the failing unit tests", None)
            .iter()
            .map(|entry| entry.id.as_str())
            .collect();
        assert_eq!(ids, vec!["slow-newer", "slow", "quick"]);
    }

    #[test]
    fn prune_keeps_newest_by_timestamp() {
        let mut memory = ExecutionMemory::new(10);
        for (id, seconds) in [("b", 20), ("a", 10), ("d", 40), ("c", 30)] {
            memory.create_entry_at(id, "request", at(seconds)).expect("create");
        }
        assert_eq!(memory.prune_memory(2), 2);
        let ids: Vec<&str> = memory.entries().iter().map(|entry| entry.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "c"]);
        assert_eq!(memory.prune_memory(5), 0);
        assert_eq!(memory.evicted_count(), 2);
    }

    #[test]
    fn create_entry_prunes_eagerly_at_capacity() {
        let mut memory = ExecutionMemory::new(3);
        for n in 0..5 {
            memory
                .create_entry_at(&format!("run-{n}"), "request", at(n))
                .expect("create");
            assert!(memory.len() <= 3);
        }
        assert!(memory.entry("run-0").is_none());
        assert!(memory.entry("run-4").is_some());
    }

    #[test]
    fn new_entry_survives_eager_prune_even_when_older_than_the_rest() {
        let mut memory = ExecutionMemory::new(2);
        memory.create_entry_at("b", "request", at(20)).expect("create");
        memory.create_entry_at("c", "request", at(30)).expect("create");

        // Clock skew: the run being created is older than everything stored.
        memory.create_entry_at("skewed", "request", at(10)).expect("create");

        assert_eq!(memory.len(), 2);
        assert!(memory.entry("skewed").is_some());
        assert!(memory.entry("c").is_some());
        assert!(memory.entry("b").is_none());
        memory.mark_succeeded("skewed", 1).expect("entry still writable");
    }

    #[test]
    fn unknown_and_duplicate_ids_are_errors() {
        let mut memory = ExecutionMemory::new(3);
        memory.create_entry("x", "request").expect("create");
        assert!(memory.create_entry("x", "request").is_err());
        assert!(memory.mark_succeeded("missing", 1).is_err());
        assert_eq!(memory.suggest_next_approach("missing", &[], &[]), None);
    }

    #[test]
    fn run_ids_skip_taken_suffixes() {
        let mut memory = ExecutionMemory::new(5);
        let now = at(0);
        let first = memory.next_run_id(now);
        assert_eq!(first, "run-20260101000000-1");
        memory.create_entry_at(&first, "request", now).expect("create");
        assert_eq!(memory.next_run_id(now), "run-20260101000000-2");
    }
}
