//! Event Reconciler
//!
//! Merges the `transfer.status` and `transfer.progress` push streams into the
//! registry. Neither stream is ordered with respect to the other, so:
//!
//! - status events are authoritative and go through the state machine
//!   (and through any pending optimistic op of the task)
//! - progress events only touch a task that is currently running
//! - replaying any event leaves the registry unchanged
//! - events for unknown ids are dropped

use std::collections::HashSet;

use tracing::debug;

use super::optimistic::PendingOps;
use super::registry::{ProgressUpdate, StatusExtra, StatusUpdate, TaskRegistry};
use super::types::{ProgressEvent, StatusEvent, TaskId, TransferTask};

#[derive(Debug, Default)]
pub struct Reconciler {
    /// Freshly started tasks whose backend snapshot has not arrived yet.
    /// Once a status event reaches one of them, the snapshot is too old to
    /// carry status.
    hydrating: HashSet<TaskId>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that a snapshot fetch is in flight for `id`
    pub fn track_hydration(&mut self, id: &TaskId) {
        self.hydrating.insert(id.clone());
    }

    pub fn is_hydrating(&self, id: &TaskId) -> bool {
        self.hydrating.contains(id)
    }

    pub fn apply_status(
        &mut self,
        registry: &mut TaskRegistry,
        pending: &mut PendingOps,
        event: StatusEvent,
    ) -> StatusUpdate {
        let id = event.task_id;
        if !registry.contains(&id) {
            debug!("Dropping status {} for unknown task {}", event.status, id);
            return StatusUpdate::UnknownTask;
        }
        self.hydrating.remove(&id);

        let extra = StatusExtra {
            error_message: event.error_message,
            retryable: event.retryable,
        };
        let update = match pending.reconcile_status(registry, &id, event.status, extra.clone()) {
            Some(update) => update,
            None => registry.update_status(&id, event.status, extra),
        };
        if let StatusUpdate::Rejected { from } = update {
            debug!("Ignoring stale status {} for task {} (at {})", event.status, id, from);
        }
        update
    }

    pub fn apply_progress(
        &self,
        registry: &mut TaskRegistry,
        event: &ProgressEvent,
    ) -> ProgressUpdate {
        let update = registry.apply_progress(event);
        match update {
            ProgressUpdate::Stale => {
                debug!("Discarding progress for non-running task {}", event.task_id)
            }
            ProgressUpdate::OutOfOrder => {
                debug!("Discarding out-of-order progress for task {}", event.task_id)
            }
            ProgressUpdate::UnknownTask => {
                debug!("Dropping progress for unknown task {}", event.task_id)
            }
            ProgressUpdate::Applied => {}
        }
        update
    }

    /// Merge a `getTransfer` snapshot for a task we just registered
    pub fn apply_snapshot(
        &mut self,
        registry: &mut TaskRegistry,
        pending: &PendingOps,
        snapshot: TransferTask,
    ) -> StatusUpdate {
        let fresh = self.hydrating.remove(&snapshot.id);
        // An optimistic state belongs to the user until a status event settles it
        let with_status = fresh && pending.get(&snapshot.id).is_none();
        registry.merge_snapshot(snapshot, with_status)
    }

    /// Hydration failed or the task went away
    pub fn forget(&mut self, id: &TaskId) {
        self.hydrating.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::{TransferDirection, TransferStatus};

    struct Fixture {
        registry: TaskRegistry,
        pending: PendingOps,
        reconciler: Reconciler,
    }

    impl Fixture {
        fn with_task(id: &str, status: TransferStatus) -> Self {
            let mut registry = TaskRegistry::new();
            let mut task = TransferTask::new(id.into(), TransferDirection::Upload, "data.tar");
            task.status = status;
            registry.add_task(task);
            Self {
                registry,
                pending: PendingOps::new(),
                reconciler: Reconciler::new(),
            }
        }

        fn status(&mut self, id: &str, status: TransferStatus) -> StatusUpdate {
            self.reconciler.apply_status(
                &mut self.registry,
                &mut self.pending,
                StatusEvent {
                    task_id: id.into(),
                    status,
                    error_message: None,
                    retryable: None,
                },
            )
        }

        fn progress(&mut self, id: &str, transferred: u64, speed: Option<u64>) -> ProgressUpdate {
            self.reconciler.apply_progress(
                &mut self.registry,
                &ProgressEvent {
                    task_id: id.into(),
                    transferred,
                    total: Some(100),
                    speed,
                },
            )
        }

        fn task(&self, id: &str) -> TransferTask {
            self.registry.get(&id.into()).cloned().unwrap()
        }
    }

    #[test]
    fn test_status_replay_is_idempotent() {
        let mut fx = Fixture::with_task("t", TransferStatus::Running);
        let failed = StatusEvent {
            task_id: "t".into(),
            status: TransferStatus::Failed,
            error_message: Some("disk full".into()),
            retryable: Some(false),
        };

        fx.reconciler
            .apply_status(&mut fx.registry, &mut fx.pending, failed.clone());
        let once = fx.task("t");
        let second = fx
            .reconciler
            .apply_status(&mut fx.registry, &mut fx.pending, failed);
        assert_eq!(second, StatusUpdate::Unchanged);
        assert_eq!(fx.task("t"), once);
    }

    #[test]
    fn test_stale_progress_after_terminal() {
        for terminal in [
            TransferStatus::Canceled,
            TransferStatus::Success,
            TransferStatus::Failed,
        ] {
            let mut fx = Fixture::with_task("t", TransferStatus::Running);
            fx.progress("t", 40, Some(10));
            fx.status("t", terminal);
            let before = fx.task("t");

            assert_eq!(fx.progress("t", 90, Some(99)), ProgressUpdate::Stale);
            let after = fx.task("t");
            assert_eq!(after.status, terminal);
            assert_eq!(after.transferred, before.transferred);
            assert_eq!(after.speed, before.speed);
        }
    }

    #[test]
    fn test_progress_replay_is_idempotent() {
        let mut fx = Fixture::with_task("t", TransferStatus::Running);
        fx.progress("t", 40, Some(10));
        let once = fx.task("t");
        fx.progress("t", 40, Some(10));
        assert_eq!(fx.task("t"), once);
    }

    #[test]
    fn test_late_progress_sample_dropped() {
        let mut fx = Fixture::with_task("t", TransferStatus::Running);
        fx.progress("t", 70, Some(20));
        assert_eq!(fx.progress("t", 30, Some(5)), ProgressUpdate::OutOfOrder);
        let task = fx.task("t");
        assert_eq!(task.transferred, 70);
        assert_eq!(task.speed, Some(20));
    }

    #[test]
    fn test_unknown_ids_dropped() {
        let mut fx = Fixture::with_task("t", TransferStatus::Running);
        assert_eq!(fx.status("ghost", TransferStatus::Success), StatusUpdate::UnknownTask);
        assert_eq!(fx.progress("ghost", 1, None), ProgressUpdate::UnknownTask);
        assert_eq!(fx.registry.len(), 1);
    }

    #[test]
    fn test_reconnect_replay_cannot_resurrect() {
        let mut fx = Fixture::with_task("t", TransferStatus::Waiting);
        fx.status("t", TransferStatus::Running);
        fx.progress("t", 100, Some(50));
        fx.status("t", TransferStatus::Success);

        // Replay burst after a reconnect, in arbitrary order
        fx.progress("t", 10, Some(5));
        fx.status("t", TransferStatus::Running);
        fx.status("t", TransferStatus::Waiting);
        fx.status("t", TransferStatus::Success);

        let task = fx.task("t");
        assert_eq!(task.status, TransferStatus::Success);
        assert_eq!(task.transferred, 100);
    }

    #[test]
    fn test_snapshot_status_ignored_after_status_event() {
        let mut fx = Fixture::with_task("t", TransferStatus::Waiting);
        fx.reconciler.track_hydration(&"t".into());
        fx.status("t", TransferStatus::Running);
        fx.status("t", TransferStatus::Success);

        // Snapshot was taken before the task finished
        let mut snapshot = fx.task("t");
        snapshot.status = TransferStatus::Running;
        snapshot.file_name = "data-2024.tar".into();
        fx.reconciler
            .apply_snapshot(&mut fx.registry, &fx.pending, snapshot);

        let task = fx.task("t");
        assert_eq!(task.status, TransferStatus::Success);
        assert_eq!(task.file_name, "data-2024.tar");
        assert!(!fx.reconciler.is_hydrating(&"t".into()));
    }

    #[test]
    fn test_snapshot_reports_immediate_start() {
        let mut fx = Fixture::with_task("t", TransferStatus::Waiting);
        fx.reconciler.track_hydration(&"t".into());

        let mut snapshot = fx.task("t");
        snapshot.status = TransferStatus::Running;
        snapshot.transferred = 12;
        let update = fx
            .reconciler
            .apply_snapshot(&mut fx.registry, &fx.pending, snapshot);

        assert_eq!(update, StatusUpdate::Applied { from: TransferStatus::Waiting });
        assert_eq!(fx.task("t").transferred, 12);
    }
}
