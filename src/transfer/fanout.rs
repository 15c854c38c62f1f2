//! Directory Fan-Out Planner
//!
//! A directory download comes back from the backend as a flat list of task
//! ids, one per leaf file. There is no batch id: each task is registered and
//! tracked on its own, and partial failure across the set is normal.

use serde::Serialize;
use tracing::info;

use super::reconcile::Reconciler;
use super::registry::TaskRegistry;
use super::types::{TaskId, TransferDirection, TransferStatus, TransferTask};

/// Result of a directory download request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanOutOutcome {
    /// One independently tracked task per file
    Planned(Vec<TaskId>),
    /// The directory had no files; not an error
    NothingToTransfer,
}

impl FanOutOutcome {
    pub fn task_ids(&self) -> &[TaskId] {
        match self {
            FanOutOutcome::Planned(ids) => ids,
            FanOutOutcome::NothingToTransfer => &[],
        }
    }
}

/// Register every returned id as its own waiting download.
///
/// File names are unknown until each task's snapshot is merged, so the
/// placeholders start with an empty name.
pub fn register_fan_out(
    registry: &mut TaskRegistry,
    reconciler: &mut Reconciler,
    remote_dir: &str,
    ids: Vec<TaskId>,
) -> FanOutOutcome {
    if ids.is_empty() {
        info!("Nothing to transfer under {}", remote_dir);
        return FanOutOutcome::NothingToTransfer;
    }
    for id in &ids {
        if registry.add_task(TransferTask::new(id.clone(), TransferDirection::Download, "")) {
            reconciler.track_hydration(id);
        }
    }
    info!("Directory {} fanned out into {} downloads", remote_dir, ids.len());
    FanOutOutcome::Planned(ids)
}

/// Aggregate view over a set of task ids. Read-only; tasks stay independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub waiting: usize,
    pub running: usize,
    pub success: usize,
    pub failed: usize,
    pub canceled: usize,
    /// Ids no longer in the registry (removed or cleared)
    pub missing: usize,
    pub transferred: u64,
    /// `None` while any member's size is unknown
    pub total: Option<u64>,
}

impl BatchSummary {
    /// Nothing left waiting or running
    pub fn is_settled(&self) -> bool {
        self.waiting == 0 && self.running == 0
    }

    pub fn tracked(&self) -> usize {
        self.waiting + self.running + self.success + self.failed + self.canceled
    }
}

pub fn summarize(registry: &TaskRegistry, ids: &[TaskId]) -> BatchSummary {
    let mut summary = BatchSummary {
        total: Some(0),
        ..Default::default()
    };
    for id in ids {
        let Some(task) = registry.get(id) else {
            summary.missing += 1;
            continue;
        };
        match task.status {
            TransferStatus::Waiting => summary.waiting += 1,
            TransferStatus::Running => summary.running += 1,
            TransferStatus::Success => summary.success += 1,
            TransferStatus::Failed => summary.failed += 1,
            TransferStatus::Canceled => summary.canceled += 1,
        }
        summary.transferred += task.transferred;
        summary.total = match (summary.total, task.total) {
            (Some(acc), Some(t)) => Some(acc + t),
            _ => None,
        };
    }
    summary
}
