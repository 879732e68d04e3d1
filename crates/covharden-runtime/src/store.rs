//! File-backed persistence: coverage plan, session history, progress log.
//!
//! Plan and history are JSON arrays written whole (temp file, then rename).
//! A missing or unreadable file reads as empty; when a session is about to
//! rewrite it, the unreadable original is first moved aside.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use covharden_core::{CoverageHistory, CoveragePlan, SessionRecord};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::RepoLayout;

// ─── Atomic file writes ───────────────────────────────────────────

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Replace `path` with `bytes` in one step: readers see the old or the new
/// content, never a torn write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = sibling_with_suffix(path, ".tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
    }
    atomic_rename(&tmp, path)
}

/// Move `from` over `to`, replacing it.
pub fn atomic_rename(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        if to.exists() {
            fs::remove_file(to)?;
        }
    }
    fs::rename(from, to)?;
    sync_parent_dir(to)
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    atomic_write(path, text.as_bytes()).with_context(|| format!("writing {}", path.display()))
}

/// What to do with a file that exists but does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnCorrupt {
    /// Read-only callers: log and carry on with the default.
    Ignore,
    /// Callers about to overwrite the file: keep the evidence first.
    MoveAside,
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path, on_corrupt: OnCorrupt) -> T {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable state file, treating as empty");
            return T::default();
        }
    };
    if text.trim().is_empty() {
        return T::default();
    }
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "corrupt state file, treating as empty");
            if on_corrupt == OnCorrupt::MoveAside {
                let stamp = Utc::now().format("%Y%m%dT%H%M%S");
                let aside = sibling_with_suffix(path, &format!(".corrupt-{stamp}"));
                match fs::rename(path, &aside) {
                    Ok(()) => tracing::warn!(moved_to = %aside.display(), "kept corrupt state file"),
                    Err(e) => tracing::warn!(error = %e, "could not move corrupt state file aside"),
                }
            }
            T::default()
        }
    }
}

// ─── Plan ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PlanStore {
    path: PathBuf,
}

impl PlanStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read-only view. Missing or corrupt files read as an empty plan.
    pub fn load(&self) -> CoveragePlan {
        read_json_or_default(&self.path, OnCorrupt::Ignore)
    }

    /// Load ahead of a rewrite. A corrupt file is moved aside first.
    pub fn load_for_update(&self) -> CoveragePlan {
        read_json_or_default(&self.path, OnCorrupt::MoveAside)
    }

    pub fn save(&self, plan: &CoveragePlan) -> anyhow::Result<()> {
        write_json(&self.path, plan)
    }
}

// ─── History ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> CoverageHistory {
        read_json_or_default(&self.path, OnCorrupt::Ignore)
    }

    /// Read, append one record, write back whole.
    pub fn append(&self, record: SessionRecord) -> anyhow::Result<()> {
        let mut history: CoverageHistory = read_json_or_default(&self.path, OnCorrupt::MoveAside);
        history.append(record);
        write_json(&self.path, &history)
    }
}

// ─── Progress log ─────────────────────────────────────────────────

/// Human-readable, append-only session log.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// ```text
/// [2026-01-05T09:30:12.501Z] Session 4
///   Improved coverage for target_repo/src/a.py from 40.0% to 85.0%
///   Result: SUCCESS
/// ```
pub fn format_entry(
    timestamp: &str,
    session_id: u64,
    message: &str,
    reason: Option<&str>,
    result: &str,
) -> String {
    let mut entry = format!("[{timestamp}] Session {session_id}\n  {message}");
    if let Some(reason) = reason {
        entry.push_str(&format!("\n  Reason: {reason}"));
    }
    entry.push_str(&format!("\n  Result: {result}\n\n"));
    entry
}

impl ProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(
        &self,
        session_id: u64,
        message: &str,
        reason: Option<&str>,
        result: &str,
    ) -> anyhow::Result<()> {
        let entry = format_entry(&now_stamp(), session_id, message, reason, result);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(entry.as_bytes())?;
        tracing::info!(session_id, result, "{message}");
        Ok(())
    }

    /// Full log text; empty when nothing has been logged yet.
    pub fn read(&self) -> anyhow::Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("reading {}", self.path.display())),
        }
    }
}

/// Create whichever of plan, history and progress log is missing.
pub fn init_artifacts(layout: &RepoLayout) -> anyhow::Result<()> {
    for path in [&layout.plan_file, &layout.history_file] {
        if !path.exists() {
            atomic_write(path, b"[]\n").with_context(|| format!("creating {}", path.display()))?;
        }
    }
    if !layout.progress_log.exists() {
        let line = format!("[{}] Log initialized.\n", now_stamp());
        atomic_write(&layout.progress_log, line.as_bytes())
            .with_context(|| format!("creating {}", layout.progress_log.display()))?;
    }
    Ok(())
}
