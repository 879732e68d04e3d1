//! `covharden status` and `covharden logs`: read-only views of the run.

use std::path::Path;

use covharden_core::{CoverageHistory, CoveragePlan, SessionResult, StatusCounts};
use serde::Serialize;

use crate::config::RepoLayout;
use crate::store::{HistoryLog, PlanStore, ProgressLog};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub modules: usize,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub sessions: usize,
    pub successes: usize,
    pub reverted: usize,
    pub no_ops: usize,
    /// Overall coverage after the latest session.
    pub latest_overall: Option<f64>,
    /// Overall coverage gained since the first recorded session.
    pub overall_delta: Option<f64>,
}

impl StatusSummary {
    pub fn new(plan: &CoveragePlan, history: &CoverageHistory) -> Self {
        Self {
            modules: plan.len(),
            counts: plan.status_counts(),
            sessions: history.len(),
            successes: history.count(SessionResult::Success),
            reverted: history.count(SessionResult::Reverted),
            no_ops: history.count(SessionResult::NoOp),
            latest_overall: history.latest_overall(),
            overall_delta: history.delta(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub plan: CoveragePlan,
    pub history: CoverageHistory,
    pub test_files: Vec<String>,
    pub summary: StatusSummary,
}

/// File names in `tests_dir` that look like generated test files.
pub fn list_test_files(tests_dir: &Path, prefix: &str, extension: &str) -> Vec<String> {
    let suffix = format!(".{}", extension.trim_start_matches('.'));
    let Ok(entries) = std::fs::read_dir(tests_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(prefix) && name.ends_with(&suffix))
        .collect();
    names.sort();
    names
}

pub fn collect_status(layout: &RepoLayout, test_prefix: &str, extension: &str) -> StatusReport {
    let plan = PlanStore::new(&layout.plan_file).load();
    let history = HistoryLog::new(&layout.history_file).load();
    let summary = StatusSummary::new(&plan, &history);
    StatusReport {
        test_files: list_test_files(&layout.tests_dir, test_prefix, extension),
        plan,
        history,
        summary,
    }
}

pub fn cmd_status(layout: &RepoLayout, test_prefix: &str, extension: &str) -> anyhow::Result<()> {
    let report = collect_status(layout, test_prefix, extension);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn cmd_logs(layout: &RepoLayout) -> anyhow::Result<()> {
    let text = ProgressLog::new(&layout.progress_log).read()?;
    print!("{text}");
    Ok(())
}
