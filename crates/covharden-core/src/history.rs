//! Append-only session history and the overall coverage trend.

use serde::{Deserialize, Serialize};

use crate::types::{SessionRecord, SessionResult};

/// Ordered session outcomes. Serialized as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageHistory {
    entries: Vec<SessionRecord>,
}

impl CoverageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The only mutation: entries are never removed or reordered.
    pub fn append(&mut self, record: SessionRecord) {
        self.entries.push(record);
    }

    pub fn entries(&self) -> &[SessionRecord] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overall coverage recorded by the most recent session.
    pub fn latest_overall(&self) -> Option<f64> {
        self.entries.last().map(|e| e.overall_coverage)
    }

    /// Overall coverage gained between the first and last recorded session.
    pub fn delta(&self) -> Option<f64> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;
        Some(last.overall_coverage - first.overall_coverage)
    }

    pub fn count(&self, result: SessionResult) -> usize {
        self.entries.iter().filter(|e| e.result == result).count()
    }
}
