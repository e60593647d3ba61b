//! Status - スケジューラの集計値

use serde::{Deserialize, Serialize};

/// Snapshot returned by `Scheduler::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub waiting: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    /// Handler invocations still running; includes cancelled jobs whose handler hasn't returned.
    pub in_flight: usize,
    pub registered_types: Vec<String>,
}
