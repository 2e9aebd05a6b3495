//! Append-only stage event log.
//!
//! Stage logic never mutates a log in place: it builds a [`LogEntry`] and the
//! persistence layer calls [`append`] when the stage's patch is applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record written by a pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Name of the step that wrote the entry (`triage`, `context`, `route`, ...).
    pub stage: String,
    pub at: DateTime<Utc>,
    /// Written while the pipeline was in dry-run (observation) mode.
    #[serde(default)]
    pub observation: bool,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl LogEntry {
    pub fn new(stage: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            stage: stage.into(),
            at: Utc::now(),
            observation: false,
            details,
        }
    }

    pub fn observed(mut self, observation: bool) -> Self {
        self.observation = observation;
        self
    }
}

/// Return a new log with `entry` appended. Existing entries are never reordered.
pub fn append(log: &[LogEntry], entry: LogEntry) -> Vec<LogEntry> {
    let mut next = Vec::with_capacity(log.len() + 1);
    next.extend_from_slice(log);
    next.push(entry);
    next
}

/// Most recent entry written by `stage`.
pub fn last_for<'a>(log: &'a [LogEntry], stage: &str) -> Option<&'a LogEntry> {
    log.iter().rev().find(|e| e.stage == stage)
}

pub fn count_for(log: &[LogEntry], stage: &str) -> usize {
    log.iter().filter(|e| e.stage == stage).count()
}
