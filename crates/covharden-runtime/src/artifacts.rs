//! Test artifact transaction: snapshot, replace, then restore or discard.
//!
//! Backup state lives only on disk (`<artifact>.bak`), so a session that
//! died half-way leaves nothing in memory that a later session depends on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use covharden_core::ModuleId;

use crate::store::{atomic_rename, atomic_write};

pub const BACKUP_SUFFIX: &str = ".bak";

/// What [`TestArtifact::restore`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    /// Backup moved back over the artifact.
    FromBackup,
    /// No backup: the artifact was new and has been removed.
    Removed,
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestArtifact {
    path: PathBuf,
    backup: PathBuf,
    /// Topmost directory [`apply`](Self::apply) had to create, if any.
    created_dir: Option<PathBuf>,
}

impl TestArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut backup = path.clone().into_os_string();
        backup.push(BACKUP_SUFFIX);
        Self {
            path,
            backup: PathBuf::from(backup),
            created_dir: None,
        }
    }

    /// `<tests_dir>/<prefix><module file name>`
    pub fn for_module(tests_dir: &Path, prefix: &str, module_id: &ModuleId) -> Self {
        Self::new(tests_dir.join(format!("{prefix}{}", module_id.file_name())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_file()
    }

    /// Current content, or empty when the artifact does not exist yet.
    pub fn read_existing(&self) -> io::Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Take the pre-change snapshot. Returns whether a backup now exists.
    ///
    /// A leftover backup from an interrupted session is replaced when the
    /// artifact exists, and removed when it does not, so that a later
    /// [`restore`](Self::restore) only ever sees this session's snapshot.
    pub fn snapshot(&self) -> io::Result<bool> {
        if self.exists() {
            if self.has_backup() {
                tracing::warn!(backup = %self.backup.display(), "replacing stale backup");
            }
            let bytes = fs::read(&self.path)?;
            atomic_write(&self.backup, &bytes)?;
            Ok(true)
        } else {
            if self.has_backup() {
                tracing::warn!(backup = %self.backup.display(), "removing orphaned backup");
                fs::remove_file(&self.backup)?;
            }
            Ok(false)
        }
    }

    /// Replace the full artifact content.
    pub fn replace(&self, contents: &str) -> io::Result<()> {
        atomic_write(&self.path, contents.as_bytes())
    }

    /// Snapshot, then replace. Remembers which missing parent directories
    /// the write creates so [`restore`](Self::restore) can remove them.
    pub fn apply(&mut self, contents: &str) -> io::Result<bool> {
        self.created_dir = self.path.parent().and_then(topmost_missing_dir);
        let backed_up = self.snapshot()?;
        self.replace(contents)?;
        Ok(backed_up)
    }

    /// Undo [`apply`](Self::apply), including any directory it created.
    pub fn restore(&self) -> io::Result<Restored> {
        let restored = if self.has_backup() {
            atomic_rename(&self.backup, &self.path)?;
            Restored::FromBackup
        } else if self.exists() {
            fs::remove_file(&self.path)?;
            Restored::Removed
        } else {
            Restored::Nothing
        };
        if let Some(dir) = self.created_dir.as_deref().filter(|d| d.is_dir()) {
            tracing::debug!(dir = %dir.display(), "removing directory created by apply");
            fs::remove_dir_all(dir)?;
        }
        Ok(restored)
    }

    /// Keep the applied change: drop the snapshot.
    pub fn discard_backup(&self) -> io::Result<()> {
        match fs::remove_file(&self.backup) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Highest ancestor of `dir` (inclusive) that does not exist yet.
fn topmost_missing_dir(dir: &Path) -> Option<PathBuf> {
    let mut missing = None;
    for ancestor in dir.ancestors() {
        if ancestor.as_os_str().is_empty() || ancestor.exists() {
            break;
        }
        missing = Some(ancestor.to_path_buf());
    }
    missing
}
