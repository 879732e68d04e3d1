//! Module selection policy: lowest coverage first.

use crate::types::ModuleRecord;

/// Pick the next module to work on.
///
/// Only Pending/InProgress records are eligible. The lowest `current_coverage`
/// wins; ties go to the lexicographically smallest `module_id`, so the choice
/// does not depend on storage order.
pub fn select_candidate(records: &[ModuleRecord]) -> Option<&ModuleRecord> {
    records
        .iter()
        .filter(|record| record.status.is_open())
        .min_by(|a, b| {
            a.current_coverage
                .total_cmp(&b.current_coverage)
                .then_with(|| a.module_id.cmp(&b.module_id))
        })
}
