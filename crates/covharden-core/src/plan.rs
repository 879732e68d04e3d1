//! Coverage plan: the ordered set of module records driving selection.
//!
//! Reconciliation folds a fresh coverage measurement into the plan. Status
//! only ever moves up the `Pending < InProgress < Done` order, so a module
//! that reached its target stays Done even if later runs measure less.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::module_id::ModuleId;
use crate::select::select_candidate;
use crate::types::{ModuleRecord, ModuleStatus, clamp_coverage};

/// Status after observing `coverage` against `target`, given the prior status.
pub fn derive_status(prior: ModuleStatus, coverage: f64, target: f64) -> ModuleStatus {
    let observed = if coverage >= target {
        ModuleStatus::Done
    } else {
        ModuleStatus::Pending
    };
    prior.merge(observed)
}

/// What a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub updated: usize,
    pub inserted: usize,
    /// Modules that became Done during this reconciliation.
    pub newly_done: Vec<ModuleId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
}

/// Ordered, key-unique set of [`ModuleRecord`]s.
///
/// Serialized as a bare JSON array. Records loaded from disk are re-keyed
/// through [`ModuleId`]; duplicates that collapse onto one key are merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ModuleRecord>", into = "Vec<ModuleRecord>")]
pub struct CoveragePlan {
    records: Vec<ModuleRecord>,
}

impl From<Vec<ModuleRecord>> for CoveragePlan {
    fn from(records: Vec<ModuleRecord>) -> Self {
        let mut plan = Self::default();
        for record in records {
            match plan.position(&record.module_id) {
                Some(idx) => {
                    let existing = &mut plan.records[idx];
                    existing.current_coverage = record.current_coverage;
                    existing.status = existing.status.merge(record.status);
                }
                None => plan.records.push(record),
            }
        }
        plan
    }
}

impl From<CoveragePlan> for Vec<ModuleRecord> {
    fn from(plan: CoveragePlan) -> Self {
        plan.records
    }
}

impl CoveragePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ModuleRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, module_id: &str) -> Option<&ModuleRecord> {
        let key = ModuleId::new(module_id);
        self.position(&key).map(|idx| &self.records[idx])
    }

    fn position(&self, key: &ModuleId) -> Option<usize> {
        self.records.iter().position(|r| &r.module_id == key)
    }

    /// Fold a coverage measurement into the plan.
    ///
    /// - `measured` entries outside `tracked_root` are ignored; the rest are
    ///   re-rooted at `tracked_root`, so an absolute report path and the
    ///   relative id from discovery share one record.
    /// - `discovered` modules missing from `measured` are recorded at 0%.
    /// - New records take `target_coverage`; existing ones keep their own.
    /// - Records not mentioned by either input are left untouched.
    pub fn reconcile(
        &mut self,
        measured: &BTreeMap<ModuleId, f64>,
        discovered: &BTreeSet<ModuleId>,
        tracked_root: &str,
        target_coverage: f64,
    ) -> ReconcileSummary {
        let mut observed: BTreeMap<ModuleId, f64> = measured
            .iter()
            .filter_map(|(id, coverage)| {
                id.rebase_onto(tracked_root)
                    .map(|id| (id, clamp_coverage(*coverage)))
            })
            .collect();
        for id in discovered {
            observed.entry(id.clone()).or_insert(0.0);
        }

        let mut summary = ReconcileSummary::default();
        for (id, coverage) in observed {
            match self.position(&id) {
                Some(idx) => {
                    let record = &mut self.records[idx];
                    let before = record.status;
                    record.current_coverage = coverage;
                    record.status = derive_status(before, coverage, record.target_coverage);
                    if before != ModuleStatus::Done && record.status == ModuleStatus::Done {
                        summary.newly_done.push(id);
                    }
                    summary.updated += 1;
                }
                None => {
                    let record = ModuleRecord::new(id.clone(), coverage, target_coverage);
                    if record.status == ModuleStatus::Done {
                        summary.newly_done.push(id);
                    }
                    self.records.push(record);
                    summary.inserted += 1;
                }
            }
        }
        summary
    }

    /// Overwrite a module's status. Returns `false` (and does nothing) when
    /// the module is not in the plan.
    pub fn set_status(&mut self, module_id: &str, status: ModuleStatus) -> bool {
        let key = ModuleId::new(module_id);
        match self.position(&key) {
            Some(idx) => {
                self.records[idx].status = status;
                true
            }
            None => false,
        }
    }

    pub fn select_candidate(&self) -> Option<&ModuleRecord> {
        select_candidate(&self.records)
    }

    /// True while any record is Pending or InProgress.
    pub fn has_open_work(&self) -> bool {
        self.records.iter().any(|r| r.status.is_open())
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in &self.records {
            match record.status {
                ModuleStatus::Pending => counts.pending += 1,
                ModuleStatus::InProgress => counts.in_progress += 1,
                ModuleStatus::Done => counts.done += 1,
            }
        }
        counts
    }
}
