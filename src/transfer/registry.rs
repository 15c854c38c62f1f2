//! Task Registry
//!
//! Authoritative map of task id -> task record. Owned by the coordinator
//! loop, which is its only writer; everything else sees cloned snapshots.

use std::collections::HashMap;

use tracing::{debug, info};

use super::types::{ProgressEvent, TaskId, TransferStatus, TransferTask};

/// Optional fields carried along with a status change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusExtra {
    pub error_message: Option<String>,
    pub retryable: Option<bool>,
}

/// Result of a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied { from: TransferStatus },
    /// Already in that status
    Unchanged,
    /// Not an edge of the state machine
    Rejected { from: TransferStatus },
    UnknownTask,
}

/// Result of a progress update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUpdate {
    Applied,
    /// Task is not running; event discarded
    Stale,
    /// Older than the counters already applied; event discarded
    OutOfOrder,
    UnknownTask,
}

#[derive(Debug)]
struct Entry {
    task: TransferTask,
    /// Insertion order, breaks `created_at` ties
    seq: u64,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskId, Entry>,
    next_seq: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Returns `false` (and keeps the existing record) if
    /// the id is already known.
    pub fn add_task(&mut self, task: TransferTask) -> bool {
        if self.tasks.contains_key(&task.id) {
            debug!("Task {} already registered, keeping existing record", task.id);
            return false;
        }
        info!(
            "Registered {:?} task {} ({}), status: {}",
            task.direction, task.id, task.file_name, task.status
        );
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.insert(task.id.clone(), Entry { task, seq });
        true
    }

    pub fn get(&self, id: &TaskId) -> Option<&TransferTask> {
        self.tasks.get(id).map(|e| &e.task)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Move a task along the state machine. Unknown ids are a no-op.
    pub fn update_status(
        &mut self,
        id: &TaskId,
        status: TransferStatus,
        extra: StatusExtra,
    ) -> StatusUpdate {
        let Some(entry) = self.tasks.get_mut(id) else {
            return StatusUpdate::UnknownTask;
        };
        let task = &mut entry.task;
        let from = task.status;

        if from == status {
            // Replays may still carry the detail fields; merging them twice is harmless
            merge_extra(task, extra);
            return StatusUpdate::Unchanged;
        }
        if !from.can_transition_to(status) {
            return StatusUpdate::Rejected { from };
        }

        set_status(task, status, extra);
        debug!("Task {}: {} -> {}", id, from, status);
        StatusUpdate::Applied { from }
    }

    /// Overwrite a status without consulting the state machine.
    ///
    /// Only optimistic updates and their rollbacks go through here.
    pub(crate) fn force_status(
        &mut self,
        id: &TaskId,
        status: TransferStatus,
        error: Option<String>,
    ) -> bool {
        match self.tasks.get_mut(id) {
            Some(entry) => {
                entry.task.status = status;
                entry.task.error = error;
                if status != TransferStatus::Running {
                    entry.task.speed = None;
                }
                true
            }
            None => false,
        }
    }

    /// Apply byte counters, only while the task is running.
    /// `transferred` never moves backwards within one run.
    pub fn apply_progress(&mut self, event: &ProgressEvent) -> ProgressUpdate {
        let Some(entry) = self.tasks.get_mut(&event.task_id) else {
            return ProgressUpdate::UnknownTask;
        };
        let task = &mut entry.task;
        if task.status != TransferStatus::Running {
            return ProgressUpdate::Stale;
        }
        if event.transferred < task.transferred {
            return ProgressUpdate::OutOfOrder;
        }
        task.transferred = event.transferred;
        if event.total.is_some() {
            task.total = event.total;
        }
        task.speed = event.speed;
        ProgressUpdate::Applied
    }

    /// Merge a backend snapshot into an existing record.
    ///
    /// Descriptive fields are always taken. Status and counters are only
    /// taken when `with_status` is set and the state machine allows it.
    pub fn merge_snapshot(&mut self, snapshot: TransferTask, with_status: bool) -> StatusUpdate {
        let Some(entry) = self.tasks.get_mut(&snapshot.id) else {
            return StatusUpdate::UnknownTask;
        };
        let task = &mut entry.task;
        if !snapshot.file_name.is_empty() {
            task.file_name = snapshot.file_name;
        }
        if snapshot.total.is_some() {
            task.total = snapshot.total;
        }
        task.created_at = snapshot.created_at;

        if !with_status {
            return StatusUpdate::Unchanged;
        }

        let from = task.status;
        if from != snapshot.status && !from.can_transition_to(snapshot.status) {
            return StatusUpdate::Rejected { from };
        }
        task.status = snapshot.status;
        task.transferred = snapshot.transferred;
        task.speed = snapshot.speed;
        task.error = snapshot.error;
        task.retryable = snapshot.retryable;
        if from == snapshot.status {
            StatusUpdate::Unchanged
        } else {
            StatusUpdate::Applied { from }
        }
    }

    pub fn remove_task(&mut self, id: &TaskId) -> Option<TransferTask> {
        let removed = self.tasks.remove(id).map(|e| e.task);
        if removed.is_some() {
            debug!("Removed task {}", id);
        }
        removed
    }

    /// Every record, newest first
    pub fn list(&self) -> Vec<TransferTask> {
        self.sorted(|_| true)
    }

    /// Tasks still waiting or running, newest first
    pub fn list_active(&self) -> Vec<TransferTask> {
        self.sorted(|t| !t.status.is_terminal())
    }

    /// Drop every success/failed/canceled task and return them
    pub fn clear_completed(&mut self) -> Vec<TransferTask> {
        let ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|e| e.task.status.is_terminal())
            .map(|e| e.task.id.clone())
            .collect();
        let removed: Vec<TransferTask> = ids
            .iter()
            .filter_map(|id| self.tasks.remove(id).map(|e| e.task))
            .collect();
        info!("Cleared {} completed tasks", removed.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn sorted(&self, keep: impl Fn(&TransferTask) -> bool) -> Vec<TransferTask> {
        let mut entries: Vec<&Entry> = self.tasks.values().filter(|e| keep(&e.task)).collect();
        entries.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        entries.into_iter().map(|e| e.task.clone()).collect()
    }
}

fn set_status(task: &mut TransferTask, status: TransferStatus, extra: StatusExtra) {
    task.status = status;
    match status {
        TransferStatus::Failed => {
            task.error = extra.error_message;
            if let Some(retryable) = extra.retryable {
                task.retryable = retryable;
            }
        }
        TransferStatus::Waiting => {
            task.error = None;
        }
        TransferStatus::Running => {
            task.error = None;
            // A new run (first start or retry) counts from the executor's offset
            task.transferred = 0;
        }
        TransferStatus::Success => {
            task.error = None;
            if let Some(total) = task.total {
                task.transferred = total;
            }
        }
        TransferStatus::Canceled => {
            if extra.error_message.is_some() {
                task.error = extra.error_message;
            }
        }
    }
    if status != TransferStatus::Running {
        task.speed = None;
    }
}

fn merge_extra(task: &mut TransferTask, extra: StatusExtra) {
    if extra.error_message.is_some() {
        task.error = extra.error_message;
    }
    if let Some(retryable) = extra.retryable {
        task.retryable = retryable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::types::TransferDirection;
    use chrono::Duration;

    fn task(id: &str, status: TransferStatus) -> TransferTask {
        let mut t = TransferTask::new(id.into(), TransferDirection::Upload, format!("{id}.txt"));
        t.status = status;
        t
    }

    fn progress(id: &str, transferred: u64) -> ProgressEvent {
        ProgressEvent {
            task_id: id.into(),
            transferred,
            total: Some(1000),
            speed: Some(100),
        }
    }

    #[test]
    fn test_add_keeps_single_record() {
        let mut reg = TaskRegistry::new();
        assert!(reg.add_task(task("a", TransferStatus::Running)));
        assert!(!reg.add_task(task("a", TransferStatus::Waiting)));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&"a".into()).unwrap().status, TransferStatus::Running);
    }

    #[test]
    fn test_update_unknown_is_noop() {
        let mut reg = TaskRegistry::new();
        let result = reg.update_status(&"ghost".into(), TransferStatus::Running, StatusExtra::default());
        assert_eq!(result, StatusUpdate::UnknownTask);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_update_follows_state_machine() {
        let mut reg = TaskRegistry::new();
        reg.add_task(task("a", TransferStatus::Waiting));
        let id: TaskId = "a".into();

        assert_eq!(
            reg.update_status(&id, TransferStatus::Running, StatusExtra::default()),
            StatusUpdate::Applied { from: TransferStatus::Waiting }
        );
        assert_eq!(
            reg.update_status(&id, TransferStatus::Canceled, StatusExtra::default()),
            StatusUpdate::Applied { from: TransferStatus::Running }
        );
        // canceled has no outgoing edge
        assert_eq!(
            reg.update_status(&id, TransferStatus::Waiting, StatusExtra::default()),
            StatusUpdate::Rejected { from: TransferStatus::Canceled }
        );
        assert_eq!(reg.get(&id).unwrap().status, TransferStatus::Canceled);
    }

    #[test]
    fn test_failed_carries_error_and_retryable() {
        let mut reg = TaskRegistry::new();
        reg.add_task(task("a", TransferStatus::Running));
        let id: TaskId = "a".into();
        reg.update_status(
            &id,
            TransferStatus::Failed,
            StatusExtra {
                error_message: Some("connection reset".into()),
                retryable: Some(true),
            },
        );
        let t = reg.get(&id).unwrap();
        assert_eq!(t.error.as_deref(), Some("connection reset"));
        assert!(t.retryable);

        reg.update_status(&id, TransferStatus::Waiting, StatusExtra::default());
        assert!(reg.get(&id).unwrap().error.is_none());
    }

    #[test]
    fn test_progress_only_while_running() {
        let mut reg = TaskRegistry::new();
        reg.add_task(task("w", TransferStatus::Waiting));
        reg.add_task(task("r", TransferStatus::Running));

        assert_eq!(reg.apply_progress(&progress("w", 10)), ProgressUpdate::Stale);
        assert_eq!(reg.apply_progress(&progress("r", 10)), ProgressUpdate::Applied);
        assert_eq!(reg.apply_progress(&progress("x", 10)), ProgressUpdate::UnknownTask);

        let r = reg.get(&"r".into()).unwrap();
        assert_eq!(r.transferred, 10);
        assert_eq!(r.total, Some(1000));
        assert_eq!(reg.get(&"w".into()).unwrap().transferred, 0);
    }

    #[test]
    fn test_progress_never_regresses_within_a_run() {
        let mut reg = TaskRegistry::new();
        reg.add_task(task("r", TransferStatus::Running));
        reg.apply_progress(&progress("r", 600));
        assert_eq!(reg.apply_progress(&progress("r", 400)), ProgressUpdate::OutOfOrder);
        assert_eq!(reg.get(&"r".into()).unwrap().transferred, 600);
        // Replaying the latest sample is fine
        assert_eq!(reg.apply_progress(&progress("r", 600)), ProgressUpdate::Applied);

        // After a failure and retry the new run starts over
        let id: TaskId = "r".into();
        reg.update_status(&id, TransferStatus::Failed, StatusExtra::default());
        reg.update_status(&id, TransferStatus::Waiting, StatusExtra::default());
        reg.update_status(&id, TransferStatus::Running, StatusExtra::default());
        assert_eq!(reg.get(&id).unwrap().transferred, 0);
        assert_eq!(reg.apply_progress(&progress("r", 50)), ProgressUpdate::Applied);
        assert_eq!(reg.get(&id).unwrap().transferred, 50);
    }

    #[test]
    fn test_progress_keeps_known_total() {
        let mut reg = TaskRegistry::new();
        reg.add_task(task("r", TransferStatus::Running));
        reg.apply_progress(&progress("r", 10));
        reg.apply_progress(&ProgressEvent {
            task_id: "r".into(),
            transferred: 20,
            total: None,
            speed: None,
        });
        let r = reg.get(&"r".into()).unwrap();
        assert_eq!(r.total, Some(1000));
        assert_eq!(r.speed, None);
    }

    #[test]
    fn test_list_newest_first() {
        let mut reg = TaskRegistry::new();
        let mut old = task("old", TransferStatus::Running);
        old.created_at = old.created_at - Duration::seconds(30);
        reg.add_task(old);
        reg.add_task(task("new", TransferStatus::Waiting));
        reg.add_task(task("done", TransferStatus::Success));

        let ids: Vec<String> = reg.list().iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ids[2], "old");

        let active: Vec<String> = reg.list_active().iter().map(|t| t.id.to_string()).collect();
        assert_eq!(active, vec!["new".to_string(), "old".to_string()]);
    }

    #[test]
    fn test_clear_completed_exact_set() {
        let mut reg = TaskRegistry::new();
        for (id, status) in [
            ("w", TransferStatus::Waiting),
            ("r", TransferStatus::Running),
            ("s", TransferStatus::Success),
            ("f", TransferStatus::Failed),
            ("c", TransferStatus::Canceled),
        ] {
            reg.add_task(task(id, status));
        }
        let mut removed: Vec<String> = reg.clear_completed().iter().map(|t| t.id.to_string()).collect();
        removed.sort();
        assert_eq!(removed, vec!["c", "f", "s"]);
        assert_eq!(reg.len(), 2);
        assert!(reg.contains(&"w".into()));
        assert!(reg.contains(&"r".into()));
    }

    #[test]
    fn test_merge_snapshot_without_status() {
        let mut reg = TaskRegistry::new();
        reg.add_task(TransferTask::new("a".into(), TransferDirection::Download, ""));
        let mut snap = task("a", TransferStatus::Running);
        snap.file_name = "report.pdf".into();
        snap.total = Some(4096);

        assert_eq!(reg.merge_snapshot(snap.clone(), false), StatusUpdate::Unchanged);
        let t = reg.get(&"a".into()).unwrap();
        assert_eq!(t.file_name, "report.pdf");
        assert_eq!(t.status, TransferStatus::Waiting);

        assert_eq!(
            reg.merge_snapshot(snap, true),
            StatusUpdate::Applied { from: TransferStatus::Waiting }
        );
        assert_eq!(reg.get(&"a".into()).unwrap().status, TransferStatus::Running);
    }
}
