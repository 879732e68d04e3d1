use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::module_id::ModuleId;

/// Default coverage threshold, in percent.
pub const DEFAULT_TARGET_COVERAGE: f64 = 90.0;

/// Clamp a coverage percentage into `[0, 100]`. NaN counts as zero.
pub fn clamp_coverage(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

// ─── Module Status ────────────────────────────────────────────────

/// Work status of a tracked module.
///
/// Variants are declared in merge order, so the derived `Ord` is the total
/// order used by [`ModuleStatus::merge`]: `Done > InProgress > Pending`.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl ModuleStatus {
    pub const ALL: [Self; 3] = [Self::Pending, Self::InProgress, Self::Done];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }

    /// Combine two statuses for the same module. The dominant one wins.
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }

    /// Pending or InProgress: still eligible for a session.
    pub fn is_open(self) -> bool {
        self != Self::Done
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            _ => Err(CoreError::UnknownStatus(s.to_string())),
        }
    }
}

// ─── Module Record ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    #[serde(rename = "module")]
    pub module_id: ModuleId,
    pub current_coverage: f64,
    #[serde(default = "default_target_coverage")]
    pub target_coverage: f64,
    #[serde(default)]
    pub status: ModuleStatus,
}

fn default_target_coverage() -> f64 {
    DEFAULT_TARGET_COVERAGE
}

impl ModuleRecord {
    /// Fresh record with its status derived from coverage alone.
    pub fn new(module_id: impl Into<ModuleId>, current_coverage: f64, target_coverage: f64) -> Self {
        let current_coverage = clamp_coverage(current_coverage);
        let target_coverage = clamp_coverage(target_coverage);
        let status = if current_coverage >= target_coverage {
            ModuleStatus::Done
        } else {
            ModuleStatus::Pending
        };
        Self {
            module_id: module_id.into(),
            current_coverage,
            target_coverage,
            status,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: ModuleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn meets_target(&self) -> bool {
        self.current_coverage >= self.target_coverage
    }
}

// ─── Session ──────────────────────────────────────────────────────

/// Terminal result of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionResult {
    Success,
    Reverted,
    NoOp,
}

impl SessionResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Reverted => "REVERTED",
            Self::NoOp => "NO_OP",
        }
    }
}

impl fmt::Display for SessionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionResult {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(Self::Success),
            "REVERTED" => Ok(Self::Reverted),
            "NO_OP" => Ok(Self::NoOp),
            _ => Err(CoreError::UnknownResult(s.to_string())),
        }
    }
}

/// One history entry. Written once at the end of a session, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: u64,
    pub overall_coverage: f64,
    pub result: SessionResult,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Accept RFC 3339 and offset-less ISO timestamps (read as UTC).
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

impl SessionRecord {
    pub fn new(
        session_id: u64,
        overall_coverage: f64,
        result: SessionResult,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            overall_coverage: clamp_coverage(overall_coverage),
            result,
            timestamp,
        }
    }
}
