//! Optimistic cancel/retry bookkeeping
//!
//! A cancel or retry changes the task status immediately, before the backend
//! has answered. The pre-action status is remembered here so that a failed
//! command can be rolled back, and so that an authoritative status event can
//! settle the optimistic state whichever arrives first.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::error::{CoordinatorError, TransferError};
use super::registry::{StatusExtra, StatusUpdate, TaskRegistry};
use super::types::{TaskId, TransferStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Cancel,
    Retry,
}

impl PendingKind {
    fn optimistic_status(self) -> TransferStatus {
        match self {
            PendingKind::Cancel => TransferStatus::Canceled,
            PendingKind::Retry => TransferStatus::Waiting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOp {
    pub kind: PendingKind,
    /// Last authoritative status, the rollback target
    pub prior: TransferStatus,
    pub prior_error: Option<String>,
    /// Backend acknowledged the command; waiting for the status event
    pub accepted: bool,
}

/// Optimistic operations that have not been settled by a status event yet
#[derive(Debug, Default)]
pub struct PendingOps {
    ops: HashMap<TaskId, PendingOp>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TaskId) -> Option<&PendingOp> {
        self.ops.get(id)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Mark a waiting/running task canceled before the backend confirms
    pub fn begin_cancel(
        &mut self,
        registry: &mut TaskRegistry,
        id: &TaskId,
    ) -> Result<(), CoordinatorError> {
        let task = registry
            .get(id)
            .ok_or_else(|| CoordinatorError::TaskNotFound(id.clone()))?;
        if self.ops.contains_key(id) {
            return Err(CoordinatorError::OperationPending(id.clone()));
        }
        if task.status.is_terminal() {
            return Err(CoordinatorError::InvalidTransition {
                id: id.clone(),
                from: task.status,
                to: TransferStatus::Canceled,
            });
        }
        self.begin(registry, id, PendingKind::Cancel);
        Ok(())
    }

    /// Put a failed, retryable task back to waiting before the backend confirms.
    ///
    /// Only `failed` tasks marked retryable by the executor qualify. A
    /// `canceled` task is final: retrying it means starting a fresh transfer
    /// under a new id, so it is rejected here with
    /// [`CoordinatorError::NotRetryable`] and no command is issued.
    pub fn begin_retry(
        &mut self,
        registry: &mut TaskRegistry,
        id: &TaskId,
    ) -> Result<(), CoordinatorError> {
        let task = registry
            .get(id)
            .ok_or_else(|| CoordinatorError::TaskNotFound(id.clone()))?;
        if self.ops.contains_key(id) {
            return Err(CoordinatorError::OperationPending(id.clone()));
        }
        match task.status {
            TransferStatus::Failed if task.retryable => {}
            // A canceled task is never resurrected; start a new transfer instead
            TransferStatus::Failed | TransferStatus::Canceled => {
                return Err(CoordinatorError::NotRetryable(id.clone()));
            }
            from => {
                return Err(CoordinatorError::InvalidTransition {
                    id: id.clone(),
                    from,
                    to: TransferStatus::Waiting,
                });
            }
        }
        self.begin(registry, id, PendingKind::Retry);
        Ok(())
    }

    fn begin(&mut self, registry: &mut TaskRegistry, id: &TaskId, kind: PendingKind) {
        let Some(task) = registry.get(id) else {
            return;
        };
        let op = PendingOp {
            kind,
            prior: task.status,
            prior_error: task.error.clone(),
            accepted: false,
        };
        let error = match kind {
            PendingKind::Cancel => op.prior_error.clone(),
            PendingKind::Retry => None,
        };
        debug!("Task {}: optimistic {:?} from {}", id, kind, op.prior);
        self.ops.insert(id.clone(), op);
        registry.force_status(id, kind.optimistic_status(), error);
    }

    /// Settle the command round-trip of a pending op.
    ///
    /// Returns `true` if the task was rolled back.
    pub fn on_command_result(
        &mut self,
        registry: &mut TaskRegistry,
        id: &TaskId,
        result: &Result<(), TransferError>,
    ) -> bool {
        match result {
            Ok(()) => {
                if let Some(op) = self.ops.get_mut(id) {
                    op.accepted = true;
                    info!("{:?} accepted for task {}", op.kind, id);
                }
                false
            }
            Err(e) => {
                // Already settled by a status event (or removed): nothing to undo
                let Some(op) = self.ops.remove(id) else {
                    debug!("{} for task {} arrived after settlement", e, id);
                    return false;
                };
                warn!(
                    "{:?} failed for task {}: {}. Rolling back to {}",
                    op.kind, id, e, op.prior
                );
                registry.force_status(id, op.prior, op.prior_error)
            }
        }
    }

    /// Route an authoritative status through the pending op of its task.
    ///
    /// Returns `None` when the task has no pending op, in which case the
    /// caller applies the status to the registry directly.
    pub fn reconcile_status(
        &mut self,
        registry: &mut TaskRegistry,
        id: &TaskId,
        status: TransferStatus,
        extra: StatusExtra,
    ) -> Option<StatusUpdate> {
        let op = self.ops.get_mut(id)?;
        let optimistic = op.kind.optimistic_status();

        if status == optimistic || optimistic.can_transition_to(status) {
            // Backend caught up with (or moved past) the optimistic state
            self.ops.remove(id);
            return Some(registry.update_status(id, status, extra));
        }

        let legal_from_prior = op.prior == status || op.prior.can_transition_to(status);
        if status.is_terminal() && legal_from_prior {
            // The task finished on its own before our command took effect
            let op = self.ops.remove(id)?;
            debug!(
                "Task {}: {} supersedes optimistic {:?}",
                id, status, op.kind
            );
            registry.force_status(id, op.prior, op.prior_error);
            return Some(registry.update_status(id, status, extra));
        }

        if legal_from_prior && op.prior != status {
            // Keep showing the optimistic state, but roll back to the newer truth
            let from = op.prior;
            op.prior = status;
            op.prior_error = extra.error_message;
            return Some(StatusUpdate::Applied { from });
        }

        Some(StatusUpdate::Rejected { from: op.prior })
    }

    /// Drop the pending op of a removed task
    pub fn forget(&mut self, id: &TaskId) {
        self.ops.remove(id);
    }
}
