//! Source module discovery: every module under the tracked root, tested or not.

use std::collections::BTreeSet;
use std::path::Path;

use covharden_core::ModuleId;
use tracing::debug;
use walkdir::WalkDir;

/// Walk `workdir/source_root` for files ending in `.extension`.
///
/// Ids are relative to `workdir`, so they line up with the filenames the
/// coverage report uses. Files named in `exclude` (e.g. `__init__.py`) are
/// skipped. A missing root yields an empty set.
pub fn discover_modules(
    workdir: &Path,
    source_root: &Path,
    extension: &str,
    exclude: &[String],
) -> BTreeSet<ModuleId> {
    let root = workdir.join(source_root);
    let extension = extension.trim_start_matches('.');
    let mut modules = BTreeSet::new();
    if !root.exists() {
        debug!(root = %root.display(), "source root missing, nothing discovered");
        return modules;
    }

    for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        if exclude.iter().any(|skip| skip.as_str() == file_name) {
            continue;
        }
        let relative = path.strip_prefix(workdir).unwrap_or(path);
        modules.insert(ModuleId::new(relative.to_string_lossy()));
    }
    modules
}
