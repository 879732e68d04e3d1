//! Canonical module identifiers.
//!
//! Coverage tools, directory walks and hand-edited plan files disagree on
//! path separators. Every identifier entering the system goes through
//! [`normalize_module_id`], so equality on [`ModuleId`] is separator-blind.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalize a path-like module identifier.
///
/// ```text
/// "target_repo\\src\\utils\\helpers.py" -> "target_repo/src/utils/helpers.py"
/// "./target_repo//src/a.py"             -> "target_repo/src/a.py"
/// "/abs/src/a.py"                       -> "/abs/src/a.py"
/// ```
pub fn normalize_module_id(raw: &str) -> String {
    let replaced = raw.trim().replace('\\', "/");
    let joined = replaced
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    if replaced.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

/// A normalized, forward-slash module identifier. Unique key of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize_module_id(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment (`"target_repo/src/utils/helpers.py"` -> `"helpers.py"`).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Whether this module lives under `root`. See [`rebase_onto`](Self::rebase_onto).
    pub fn is_under(&self, root: &str) -> bool {
        self.rebase_onto(root).is_some()
    }

    /// This id re-rooted so that it starts at `root`, or `None` when it does
    /// not live under `root`.
    ///
    /// Matches when the id equals the root, starts with it, or contains it as
    /// a whole run of path segments. Coverage tools may prefix absolute dirs,
    /// so `/home/ci/repo/src/a.py` under `src` becomes `src/a.py`, the same
    /// key a directory walk produces. The leftmost match wins.
    pub fn rebase_onto(&self, root: &str) -> Option<Self> {
        let root = normalize_module_id(root);
        let bare_root = root.trim_start_matches('/');
        if bare_root.is_empty() {
            return Some(self.clone());
        }
        let id = self.0.trim_start_matches('/');
        let start = if id == bare_root || id.starts_with(&format!("{bare_root}/")) {
            0
        } else {
            id.find(&format!("/{bare_root}/"))? + 1
        };
        let tail = &id[start..];
        let rebased = if root.starts_with('/') {
            format!("/{tail}")
        } else {
            tail.to_string()
        };
        Some(Self(rebased))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ModuleId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for ModuleId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<ModuleId> for String {
    fn from(id: ModuleId) -> Self {
        id.0
    }
}

impl AsRef<str> for ModuleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ModuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}
