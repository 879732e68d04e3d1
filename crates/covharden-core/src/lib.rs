//! covharden-core: pure domain model for coverage-driven test hardening.
//! Plan records, status merge, reconciliation, module selection and the
//! session history trend. No IO; callers own persistence.

pub mod error;
pub mod history;
pub mod module_id;
pub mod plan;
pub mod select;
pub mod types;

pub use error::CoreError;
pub use history::CoverageHistory;
pub use module_id::{ModuleId, normalize_module_id};
pub use plan::{CoveragePlan, ReconcileSummary, StatusCounts, derive_status};
pub use select::select_candidate;
pub use types::{
    DEFAULT_TARGET_COVERAGE, ModuleRecord, ModuleStatus, SessionRecord, SessionResult,
    clamp_coverage,
};
