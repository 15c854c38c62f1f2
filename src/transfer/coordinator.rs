//! Reconciliation loop
//!
//! One task owns the [`TaskRegistry`], the pending optimistic ops and the
//! delete tracker. Everything else talks to it through a
//! [`CoordinatorHandle`] (user intents) or an [`EventSender`] (push events).
//!
//! # Ordering
//!
//! Intents and push events share one bounded inbox, so an event enqueued
//! before a query is always observed by that query. Backend round-trips run
//! on spawned tasks and report back on a completion channel that the loop
//! drains before taking anything new from the inbox.
//!
//! # Usage
//!
//! ```ignore
//! let (handle, events) = spawn_coordinator(backend, &CoordinatorConfig::default());
//!
//! // Transport side
//! events.send(push_event).await?;
//!
//! // UI side
//! let id = handle.start_upload(&session_id, "/tmp/a.iso", "/srv/a.iso").await?;
//! handle.cancel(&id).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::delete::{DeleteProgress, DeleteProgressTracker};
use super::error::{CoordinatorError, TransferError};
use super::fanout::{register_fan_out, summarize, BatchSummary, FanOutOutcome};
use super::gateway::{CommandGateway, TransferBackend};
use super::optimistic::PendingOps;
use super::path_utils::{display_name, normalize_remote_path};
use super::reconcile::Reconciler;
use super::registry::{ProgressUpdate, StatusUpdate, TaskRegistry};
use super::types::{
    DirectoryStats, PushEvent, TaskId, TaskView, TransferDirection, TransferStatus, TransferTask,
};
use crate::config::CoordinatorConfig;

/// Snapshot fetches per placeholder task before giving up
const HYDRATE_MAX_ATTEMPTS: u32 = 4;
const HYDRATE_INITIAL_BACKOFF_MS: u64 = 100;
const HYDRATE_MAX_BACKOFF_MS: u64 = 2_000;

/// Delay before fetch number `attempt + 1`, doubling up to a cap
fn hydrate_backoff(attempt: u32) -> Duration {
    let ms = HYDRATE_INITIAL_BACKOFF_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(HYDRATE_MAX_BACKOFF_MS);
    Duration::from_millis(ms)
}

/// Change notification published after every applied mutation
#[derive(Debug, Clone, PartialEq)]
pub enum TaskChange {
    /// Task added or modified; carries the new record
    Upserted(TransferTask),
    Removed(TaskId),
    DeleteProgress(DeleteProgress),
    /// Delete progress for `path` is no longer shown (finished or dismissed)
    DeleteCleared { path: String },
}

type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

/// User intents, each with its reply channel
enum Command {
    StartUpload {
        session_id: String,
        local_path: String,
        remote_path: String,
        reply: Reply<TaskId>,
    },
    StartDownload {
        session_id: String,
        remote_path: String,
        local_dir: String,
        reply: Reply<TaskId>,
    },
    StartDownloadDirectory {
        session_id: String,
        remote_dir: String,
        local_dir: String,
        reply: Reply<FanOutOutcome>,
    },
    Cancel {
        id: TaskId,
        reply: Reply<()>,
    },
    Retry {
        id: TaskId,
        reply: Reply<()>,
    },
    Remove {
        id: TaskId,
        reply: oneshot::Sender<Option<TransferTask>>,
    },
    ClearCompleted {
        reply: oneshot::Sender<Vec<TransferTask>>,
    },
    Refresh {
        id: TaskId,
        reply: Reply<TransferTask>,
    },
    GetTask {
        id: TaskId,
        reply: oneshot::Sender<Option<TransferTask>>,
    },
    List {
        active_only: bool,
        reply: oneshot::Sender<Vec<TransferTask>>,
    },
    Summarize {
        ids: Vec<TaskId>,
        reply: oneshot::Sender<BatchSummary>,
    },
    DirectoryStats {
        session_id: String,
        path: String,
        reply: Reply<DirectoryStats>,
    },
    DeleteRecursive {
        session_id: String,
        path: String,
        reply: Reply<u64>,
    },
    DeleteItem {
        session_id: String,
        path: String,
        reply: Reply<()>,
    },
    DeleteProgress {
        path: String,
        reply: oneshot::Sender<Option<DeleteProgress>>,
    },
    DismissDelete {
        path: String,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

enum Inbound {
    Event(PushEvent),
    Command(Command),
}

/// Backend round-trips coming back to the loop
enum Completion {
    Started {
        direction: TransferDirection,
        file_name: String,
        result: Result<TaskId, TransferError>,
        reply: Reply<TaskId>,
    },
    FannedOut {
        remote_dir: String,
        result: Result<Vec<TaskId>, TransferError>,
        reply: Reply<FanOutOutcome>,
    },
    Hydrated {
        id: TaskId,
        result: Result<TransferTask, TransferError>,
        /// Zero-based fetch number
        attempt: u32,
        /// Set for an explicit refresh
        reply: Option<Reply<TransferTask>>,
    },
    Canceled {
        id: TaskId,
        result: Result<(), TransferError>,
        reply: Reply<()>,
    },
    Retried {
        id: TaskId,
        result: Result<(), TransferError>,
        reply: Reply<()>,
    },
    Deleted {
        path: String,
        operation_id: String,
        result: Result<u64, TransferError>,
        reply: Reply<u64>,
    },
}

/// Cloneable front of the coordinator loop
#[derive(Clone)]
pub struct CoordinatorHandle {
    inbox: mpsc::Sender<Inbound>,
    changes: broadcast::Sender<TaskChange>,
}

/// Feeds push events from the transport into the coordinator loop
#[derive(Clone)]
pub struct EventSender {
    inbox: mpsc::Sender<Inbound>,
}

impl EventSender {
    /// Waits for inbox space when the loop is behind
    pub async fn send(&self, event: PushEvent) -> Result<(), CoordinatorError> {
        self.inbox
            .send(Inbound::Event(event))
            .await
            .map_err(|_| CoordinatorError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

impl CoordinatorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CoordinatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inbox
            .send(Inbound::Command(make(reply_tx)))
            .await
            .map_err(|_| CoordinatorError::Closed)?;
        reply_rx.await.map_err(|_| CoordinatorError::Closed)
    }

    /// Subscribe to the change feed. Slow subscribers lose the oldest changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskChange> {
        self.changes.subscribe()
    }

    pub async fn start_upload(
        &self,
        session_id: &str,
        local_path: &str,
        remote_path: &str,
    ) -> Result<TaskId, CoordinatorError> {
        self.request(|reply| Command::StartUpload {
            session_id: session_id.to_string(),
            local_path: local_path.to_string(),
            remote_path: remote_path.to_string(),
            reply,
        })
        .await?
    }

    pub async fn start_download(
        &self,
        session_id: &str,
        remote_path: &str,
        local_dir: &str,
    ) -> Result<TaskId, CoordinatorError> {
        self.request(|reply| Command::StartDownload {
            session_id: session_id.to_string(),
            remote_path: remote_path.to_string(),
            local_dir: local_dir.to_string(),
            reply,
        })
        .await?
    }

    /// Download every file under `remote_dir` as independent tasks
    pub async fn start_download_directory(
        &self,
        session_id: &str,
        remote_dir: &str,
        local_dir: &str,
    ) -> Result<FanOutOutcome, CoordinatorError> {
        self.request(|reply| Command::StartDownloadDirectory {
            session_id: session_id.to_string(),
            remote_dir: remote_dir.to_string(),
            local_dir: local_dir.to_string(),
            reply,
        })
        .await?
    }

    /// Optimistically cancel. Resolves once the backend answered; on error
    /// the task is already back in its previous status.
    pub async fn cancel(&self, id: &TaskId) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::Cancel {
            id: id.clone(),
            reply,
        })
        .await?
    }

    pub async fn retry(&self, id: &TaskId) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::Retry {
            id: id.clone(),
            reply,
        })
        .await?
    }

    /// Drop a task from the local registry only
    pub async fn remove_task(&self, id: &TaskId) -> Result<Option<TransferTask>, CoordinatorError> {
        self.request(|reply| Command::Remove {
            id: id.clone(),
            reply,
        })
        .await
    }

    /// Remove finished tasks locally and ask the backend to clean up
    pub async fn clear_completed(&self) -> Result<Vec<TransferTask>, CoordinatorError> {
        self.request(|reply| Command::ClearCompleted { reply }).await
    }

    /// Re-fetch a task from the backend and merge it
    pub async fn refresh(&self, id: &TaskId) -> Result<TransferTask, CoordinatorError> {
        self.request(|reply| Command::Refresh {
            id: id.clone(),
            reply,
        })
        .await?
    }

    pub async fn get_task(&self, id: &TaskId) -> Result<Option<TransferTask>, CoordinatorError> {
        self.request(|reply| Command::GetTask {
            id: id.clone(),
            reply,
        })
        .await
    }

    /// Every task, newest first
    pub async fn list(&self) -> Result<Vec<TransferTask>, CoordinatorError> {
        self.request(|reply| Command::List {
            active_only: false,
            reply,
        })
        .await
    }

    /// Waiting and running tasks, newest first
    pub async fn list_active(&self) -> Result<Vec<TransferTask>, CoordinatorError> {
        self.request(|reply| Command::List {
            active_only: true,
            reply,
        })
        .await
    }

    pub async fn views(&self) -> Result<Vec<TaskView>, CoordinatorError> {
        let tasks = self.list().await?;
        Ok(tasks.iter().map(TaskView::from).collect())
    }

    pub async fn batch_summary(&self, ids: &[TaskId]) -> Result<BatchSummary, CoordinatorError> {
        self.request(|reply| Command::Summarize {
            ids: ids.to_vec(),
            reply,
        })
        .await
    }

    pub async fn directory_stats(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<DirectoryStats, CoordinatorError> {
        self.request(|reply| Command::DirectoryStats {
            session_id: session_id.to_string(),
            path: path.to_string(),
            reply,
        })
        .await?
    }

    /// Delete a directory tree, tracking progress under its path.
    ///
    /// Returns the number of deleted entries. Rejected with
    /// [`CoordinatorError::DeleteInFlight`] while a delete of the same path runs.
    pub async fn delete_recursive(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<u64, CoordinatorError> {
        self.request(|reply| Command::DeleteRecursive {
            session_id: session_id.to_string(),
            path: normalize_remote_path(path),
            reply,
        })
        .await?
    }

    pub async fn delete_item(&self, session_id: &str, path: &str) -> Result<(), CoordinatorError> {
        self.request(|reply| Command::DeleteItem {
            session_id: session_id.to_string(),
            path: path.to_string(),
            reply,
        })
        .await?
    }

    pub async fn delete_progress(
        &self,
        path: &str,
    ) -> Result<Option<DeleteProgress>, CoordinatorError> {
        self.request(|reply| Command::DeleteProgress {
            path: path.to_string(),
            reply,
        })
        .await
    }

    /// Stop showing progress for `path`. The delete itself keeps running.
    pub async fn dismiss_delete(&self, path: &str) -> Result<bool, CoordinatorError> {
        self.request(|reply| Command::DismissDelete {
            path: path.to_string(),
            reply,
        })
        .await
    }

    /// Stop the loop. Queued requests resolve to [`CoordinatorError::Closed`].
    pub async fn shutdown(&self) {
        let _ = self.inbox.send(Inbound::Command(Command::Shutdown)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}

struct CoordinatorLoop {
    registry: TaskRegistry,
    pending: PendingOps,
    reconciler: Reconciler,
    deletes: DeleteProgressTracker,
    gateway: CommandGateway,
    changes: broadcast::Sender<TaskChange>,
    completion_tx: mpsc::UnboundedSender<Completion>,
}

impl CoordinatorLoop {
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Inbound>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!("Transfer coordinator started");
        loop {
            tokio::select! {
                biased;
                Some(done) = completions.recv() => self.on_completion(done),
                inbound = inbox.recv() => match inbound {
                    Some(Inbound::Event(event)) => self.on_event(event),
                    Some(Inbound::Command(Command::Shutdown)) => {
                        info!("Transfer coordinator shutdown requested");
                        break;
                    }
                    Some(Inbound::Command(command)) => self.on_command(command),
                    None => {
                        info!("All coordinator handles dropped");
                        break;
                    }
                },
            }
        }

        // Queued requests see their reply sender dropped
        inbox.close();
        let mut dropped = 0usize;
        while inbox.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!("Dropped {} queued messages on shutdown", dropped);
        }
        info!(
            "Transfer coordinator terminated with {} tasks tracked",
            self.registry.len()
        );
    }

    fn emit(&self, change: TaskChange) {
        // No subscribers is fine
        let _ = self.changes.send(change);
    }

    fn emit_task(&self, id: &TaskId) {
        if let Some(task) = self.registry.get(id) {
            self.emit(TaskChange::Upserted(task.clone()));
        }
    }

    /// Run a backend call off-loop and feed its result back in
    fn spawn_call<F>(&self, call: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            if completion_tx.send(call.await).is_err() {
                debug!("Coordinator gone before a backend call returned");
            }
        });
    }

    fn spawn_hydration(&mut self, id: TaskId, reply: Option<Reply<TransferTask>>) {
        self.reconciler.track_hydration(&id);
        self.spawn_fetch(id, reply, 0, Duration::ZERO);
    }

    fn spawn_fetch(
        &self,
        id: TaskId,
        reply: Option<Reply<TransferTask>>,
        attempt: u32,
        delay: Duration,
    ) {
        let gateway = self.gateway.clone();
        self.spawn_call(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = gateway.get_task(&id).await;
            Completion::Hydrated {
                id,
                result,
                attempt,
                reply,
            }
        });
    }

    /// The task is still the `waiting` record registered at start, and no
    /// status event has reached it. A status event may have been dropped
    /// before the start reply, so only a snapshot can move it on.
    fn is_placeholder(&self, id: &TaskId) -> bool {
        self.reconciler.is_hydrating(id)
            && self.pending.get(id).is_none()
            && self
                .registry
                .get(id)
                .is_some_and(|t| t.status == TransferStatus::Waiting)
    }

    fn on_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::Status(event) => {
                let id = event.task_id.clone();
                let update =
                    self.reconciler
                        .apply_status(&mut self.registry, &mut self.pending, event);
                if let StatusUpdate::Applied { .. } = update {
                    self.emit_task(&id);
                }
            }
            PushEvent::Progress(event) => {
                if self.reconciler.apply_progress(&mut self.registry, &event)
                    == ProgressUpdate::Applied
                {
                    self.emit_task(&event.task_id);
                }
            }
            PushEvent::DeleteProgress(event) => {
                if let Some(progress) = self.deletes.apply(&event) {
                    let progress = progress.clone();
                    self.emit(TaskChange::DeleteProgress(progress));
                }
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::StartUpload {
                session_id,
                local_path,
                remote_path,
                reply,
            } => {
                let gateway = self.gateway.clone();
                let file_name = display_name(&local_path);
                info!("Starting upload {} -> {}", local_path, remote_path);
                self.spawn_call(async move {
                    let result = gateway
                        .start_upload(&session_id, &local_path, &remote_path)
                        .await;
                    Completion::Started {
                        direction: TransferDirection::Upload,
                        file_name,
                        result,
                        reply,
                    }
                });
            }

            Command::StartDownload {
                session_id,
                remote_path,
                local_dir,
                reply,
            } => {
                let gateway = self.gateway.clone();
                let file_name = display_name(&remote_path);
                info!("Starting download {} -> {}", remote_path, local_dir);
                self.spawn_call(async move {
                    let result = gateway
                        .start_download(&session_id, &remote_path, &local_dir)
                        .await;
                    Completion::Started {
                        direction: TransferDirection::Download,
                        file_name,
                        result,
                        reply,
                    }
                });
            }

            Command::StartDownloadDirectory {
                session_id,
                remote_dir,
                local_dir,
                reply,
            } => {
                let gateway = self.gateway.clone();
                info!("Starting directory download {} -> {}", remote_dir, local_dir);
                self.spawn_call(async move {
                    let result = gateway
                        .start_download_directory(&session_id, &remote_dir, &local_dir)
                        .await;
                    Completion::FannedOut {
                        remote_dir,
                        result,
                        reply,
                    }
                });
            }

            Command::Cancel { id, reply } => {
                if let Err(e) = self.pending.begin_cancel(&mut self.registry, &id) {
                    let _ = reply.send(Err(e));
                    return;
                }
                self.emit_task(&id);
                info!("Cancel issued for task {}", id);
                let gateway = self.gateway.clone();
                self.spawn_call(async move {
                    let result = gateway.cancel(&id).await;
                    Completion::Canceled { id, result, reply }
                });
            }

            Command::Retry { id, reply } => {
                if let Err(e) = self.pending.begin_retry(&mut self.registry, &id) {
                    let _ = reply.send(Err(e));
                    return;
                }
                self.emit_task(&id);
                info!("Retry issued for task {}", id);
                let gateway = self.gateway.clone();
                self.spawn_call(async move {
                    let result = gateway.retry(&id).await;
                    Completion::Retried { id, result, reply }
                });
            }

            Command::Remove { id, reply } => {
                self.pending.forget(&id);
                self.reconciler.forget(&id);
                let removed = self.registry.remove_task(&id);
                if removed.is_some() {
                    self.emit(TaskChange::Removed(id));
                }
                let _ = reply.send(removed);
            }

            Command::ClearCompleted { reply } => {
                let removed = self.registry.clear_completed();
                for task in &removed {
                    // An unsettled cancel goes with its task
                    self.pending.forget(&task.id);
                    self.reconciler.forget(&task.id);
                    self.emit(TaskChange::Removed(task.id.clone()));
                }
                let gateway = self.gateway.clone();
                tokio::spawn(async move {
                    if let Err(e) = gateway.cleanup_completed().await {
                        warn!("Backend cleanup failed (local state already cleared): {}", e);
                    }
                });
                let _ = reply.send(removed);
            }

            Command::Refresh { id, reply } => {
                if !self.registry.contains(&id) {
                    let _ = reply.send(Err(CoordinatorError::TaskNotFound(id)));
                    return;
                }
                self.spawn_hydration(id, Some(reply));
            }

            Command::GetTask { id, reply } => {
                let _ = reply.send(self.registry.get(&id).cloned());
            }

            Command::List { active_only, reply } => {
                let tasks = if active_only {
                    self.registry.list_active()
                } else {
                    self.registry.list()
                };
                let _ = reply.send(tasks);
            }

            Command::Summarize { ids, reply } => {
                let _ = reply.send(summarize(&self.registry, &ids));
            }

            Command::DirectoryStats {
                session_id,
                path,
                reply,
            } => {
                // Read-only, answered straight from the spawned call
                let gateway = self.gateway.clone();
                tokio::spawn(async move {
                    let result = gateway.directory_stats(&session_id, &path).await;
                    let _ = reply.send(result.map_err(CoordinatorError::from));
                });
            }

            Command::DeleteRecursive {
                session_id,
                path,
                reply,
            } => {
                let progress = match self.deletes.begin(&path) {
                    Ok(progress) => progress.clone(),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                let operation_id = progress.operation_id.clone();
                self.emit(TaskChange::DeleteProgress(progress));
                let gateway = self.gateway.clone();
                self.spawn_call(async move {
                    let result = gateway.delete_recursive(&session_id, &path).await;
                    Completion::Deleted {
                        path,
                        operation_id,
                        result,
                        reply,
                    }
                });
            }

            Command::DeleteItem {
                session_id,
                path,
                reply,
            } => {
                let gateway = self.gateway.clone();
                tokio::spawn(async move {
                    let result = gateway.delete_item(&session_id, &path).await;
                    let _ = reply.send(result.map_err(CoordinatorError::from));
                });
            }

            Command::DeleteProgress { path, reply } => {
                let _ = reply.send(self.deletes.get(&path).cloned());
            }

            Command::DismissDelete { path, reply } => {
                let dismissed = self.deletes.dismiss(&path);
                if dismissed {
                    self.emit(TaskChange::DeleteCleared {
                        path: normalize_remote_path(&path),
                    });
                }
                let _ = reply.send(dismissed);
            }

            // Handled by the loop itself
            Command::Shutdown => {}
        }
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Started {
                direction,
                file_name,
                result,
                reply,
            } => match result {
                Ok(id) => {
                    let task = TransferTask::new(id.clone(), direction, file_name);
                    if self.registry.add_task(task) {
                        self.emit_task(&id);
                        self.spawn_hydration(id.clone(), None);
                    }
                    let _ = reply.send(Ok(id));
                }
                Err(e) => {
                    warn!("Failed to start {:?} of {}: {}", direction, file_name, e);
                    let _ = reply.send(Err(e.into()));
                }
            },

            Completion::FannedOut {
                remote_dir,
                result,
                reply,
            } => match result {
                Ok(ids) => {
                    let outcome =
                        register_fan_out(&mut self.registry, &mut self.reconciler, &remote_dir, ids);
                    for id in outcome.task_ids() {
                        self.emit_task(id);
                        if self.reconciler.is_hydrating(id) {
                            self.spawn_hydration(id.clone(), None);
                        }
                    }
                    let _ = reply.send(Ok(outcome));
                }
                Err(e) => {
                    warn!("Directory walk of {} failed: {}", remote_dir, e);
                    let _ = reply.send(Err(CoordinatorError::Planning(e)));
                }
            },

            Completion::Hydrated {
                id,
                result,
                attempt,
                reply,
            } => match result {
                Ok(snapshot) => {
                    let update =
                        self.reconciler
                            .apply_snapshot(&mut self.registry, &self.pending, snapshot);
                    if update != StatusUpdate::UnknownTask {
                        self.emit_task(&id);
                    }
                    if let Some(reply) = reply {
                        let task = self
                            .registry
                            .get(&id)
                            .cloned()
                            .ok_or(CoordinatorError::TaskNotFound(id));
                        let _ = reply.send(task);
                    }
                }
                Err(e) if reply.is_none()
                    && attempt + 1 < HYDRATE_MAX_ATTEMPTS
                    && self.is_placeholder(&id) =>
                {
                    let delay = hydrate_backoff(attempt);
                    debug!("Fetch of task {} failed ({}), retrying in {:?}", id, e, delay);
                    self.spawn_fetch(id, None, attempt + 1, delay);
                }
                Err(e) => {
                    warn!("Could not fetch task {}: {}", id, e);
                    self.reconciler.forget(&id);
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(e.into()));
                    }
                }
            },

            Completion::Canceled { id, result, reply } => {
                if self.pending.on_command_result(&mut self.registry, &id, &result) {
                    self.emit_task(&id);
                }
                let _ = reply.send(result.map_err(CoordinatorError::from));
            }

            Completion::Retried { id, result, reply } => {
                if self.pending.on_command_result(&mut self.registry, &id, &result) {
                    self.emit_task(&id);
                }
                let _ = reply.send(result.map_err(CoordinatorError::from));
            }

            Completion::Deleted {
                path,
                operation_id,
                result,
                reply,
            } => {
                if let Err(e) = &result {
                    warn!("Recursive delete {} of {} failed: {}", operation_id, path, e);
                }
                if self.deletes.settle(&path, &operation_id).is_some() {
                    self.emit(TaskChange::DeleteCleared { path });
                }
                let _ = reply.send(result.map_err(CoordinatorError::from));
            }
        }
    }
}

/// Spawn the coordinator loop on the current tokio runtime.
///
/// The loop runs until [`CoordinatorHandle::shutdown`] or until every
/// handle and event sender is dropped.
pub fn spawn_coordinator(
    backend: Arc<dyn TransferBackend>,
    config: &CoordinatorConfig,
) -> (CoordinatorHandle, EventSender) {
    let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity.max(1));
    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let (changes, _) = broadcast::channel(config.change_feed_capacity.max(1));

    let coordinator = CoordinatorLoop {
        registry: TaskRegistry::new(),
        pending: PendingOps::new(),
        reconciler: Reconciler::new(),
        deletes: DeleteProgressTracker::new(),
        gateway: CommandGateway::new(backend, config.command_timeout()),
        changes: changes.clone(),
        completion_tx,
    };
    tokio::spawn(coordinator.run(inbox_rx, completion_rx));

    (
        CoordinatorHandle {
            inbox: inbox_tx.clone(),
            changes,
        },
        EventSender { inbox: inbox_tx },
    )
}
