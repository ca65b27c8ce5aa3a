//! Execution memory persistence: a JSONL log under `.fixloop/`.
//!
//! Each line is `{"schema_version": 1, "entry": {...}}`. Later lines with the
//! same entry id supersede earlier ones. Lines with an unknown schema version
//! are skipped with a warning; malformed lines are errors naming the line.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::memory::{ExecutionMemory, ExecutionMemoryEntry};

pub const MEMORY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MemoryRecord {
    schema_version: u32,
    entry: ExecutionMemoryEntry,
}

/// Append-mostly memory log at `path`.
#[derive(Debug, Clone)]
pub struct MemoryLog {
    path: PathBuf,
}

impl MemoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every current entry in first-seen order. A missing file is empty.
    pub fn load(&self) -> Result<Vec<ExecutionMemoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read memory log {}", self.path.display()))?;

        let mut entries: Vec<ExecutionMemoryEntry> = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line).with_context(|| {
                format!("parse memory log {} line {line_no}", self.path.display())
            })?;
            let version = value
                .get("schema_version")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    anyhow!(
                        "memory log {} line {line_no}: missing schema_version",
                        self.path.display()
                    )
                })?;
            if version != u64::from(MEMORY_SCHEMA_VERSION) {
                warn!(line = line_no, version, "skipping memory record with unknown schema version");
                continue;
            }
            let record: MemoryRecord = serde_json::from_value(value).with_context(|| {
                format!("decode memory log {} line {line_no}", self.path.display())
            })?;
            match entries.iter_mut().find(|entry| entry.id == record.entry.id) {
                Some(existing) => *existing = record.entry,
                None => entries.push(record.entry),
            }
        }
        debug!(path = %self.path.display(), entries = entries.len(), "memory log loaded");
        Ok(entries)
    }

    /// Append one entry as a new line.
    pub fn append(&self, entry: &ExecutionMemoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open memory log {}", self.path.display()))?;
        let line = encode_line(entry)?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append memory log {}", self.path.display()))
    }

    /// Replace the whole log with `entries` (atomic).
    pub fn rewrite(&self, entries: &[ExecutionMemoryEntry]) -> Result<()> {
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&encode_line(entry)?);
        }
        super::write_atomic(&self.path, &buf)
    }
}

fn encode_line(entry: &ExecutionMemoryEntry) -> Result<String> {
    let record = MemoryRecord {
        schema_version: MEMORY_SCHEMA_VERSION,
        entry: entry.clone(),
    };
    let mut line = serde_json::to_string(&record).context("serialize memory record")?;
    line.push('\n');
    Ok(line)
}

/// Load the log into a store bounded by `capacity`.
pub fn load_memory(log: &MemoryLog, capacity: usize) -> Result<ExecutionMemory> {
    Ok(ExecutionMemory::from_entries(log.load()?, capacity))
}

/// Persist entry `id`: append it, or compact the log when the store has
/// evicted anything since it was loaded.
pub fn persist_entry(log: &MemoryLog, memory: &ExecutionMemory, id: &str) -> Result<()> {
    if memory.evicted_count() > 0 {
        debug!(evicted = memory.evicted_count(), "compacting memory log");
        return log.rewrite(memory.entries());
    }
    let entry = memory
        .entry(id)
        .ok_or_else(|| anyhow!("unknown memory entry '{id}'"))?;
    log.append(entry)
}
