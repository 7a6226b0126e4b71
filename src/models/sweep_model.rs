//! models/sweep_model.rs

use serde::Serialize;

/// Resumen de una pasada del sweeper de reconciliación
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub campaigns_examined: usize,
    pub stale_jobs_released: u64,
    pub completed: usize,
    pub failed: usize,
    pub completed_at_backfilled: usize,
    pub counters_repaired: usize,
    pub dispatch_requeued: usize,
    pub conflicts: usize,
    pub errors: usize,
}

impl SweepReport {
    pub fn corrective_actions(&self) -> usize {
        self.completed
            + self.failed
            + self.completed_at_backfilled
            + self.counters_repaired
            + self.dispatch_requeued
    }
}
