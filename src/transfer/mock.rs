//! Scripted backend for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::error::TransferError;
use super::gateway::TransferBackend;
use super::types::{DirectoryStats, TaskId, TransferDirection, TransferTask};

#[derive(Default)]
pub(crate) struct MockBackend {
    next_id: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub retry_calls: AtomicUsize,
    pub cleanup_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    start_error: Mutex<Option<TransferError>>,
    cancel_error: Mutex<Option<TransferError>>,
    retry_error: Mutex<Option<TransferError>>,
    cleanup_error: Mutex<Option<TransferError>>,
    delete_error: Mutex<Option<TransferError>>,
    /// `get_transfer` fails this many more times
    get_failures: Mutex<Option<(usize, TransferError)>>,
    /// Files "found" by a directory download; `Err` simulates a failed walk
    directory: Mutex<Option<Result<usize, TransferError>>>,
    snapshots: Mutex<HashMap<TaskId, TransferTask>>,
    stats: Mutex<DirectoryStats>,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_start(&self, err: TransferError) {
        *self.start_error.lock() = Some(err);
    }

    pub fn fail_cancel(&self, err: TransferError) {
        *self.cancel_error.lock() = Some(err);
    }

    pub fn fail_retry(&self, err: TransferError) {
        *self.retry_error.lock() = Some(err);
    }

    pub fn fail_cleanup(&self, err: TransferError) {
        *self.cleanup_error.lock() = Some(err);
    }

    pub fn fail_delete(&self, err: TransferError) {
        *self.delete_error.lock() = Some(err);
    }

    pub fn fail_get(&self, times: usize, err: TransferError) {
        *self.get_failures.lock() = Some((times, err));
    }

    pub fn set_directory(&self, files: Result<usize, TransferError>) {
        *self.directory.lock() = Some(files);
    }

    pub fn set_stats(&self, stats: DirectoryStats) {
        *self.stats.lock() = stats;
    }

    /// Snapshot returned by `get_transfer` for this id
    pub fn put_snapshot(&self, task: TransferTask) {
        self.snapshots.lock().insert(task.id.clone(), task);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Park every command issued from now on until [`release`](Self::release)
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.close();
        }
    }

    async fn pause(&self) {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            // Closing the semaphore is the release signal
            let _ = gate.acquire().await;
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_task_id(&self) -> TaskId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        TaskId::new(format!("task-{n}"))
    }

    fn check(slot: &Mutex<Option<TransferError>>) -> Result<(), TransferError> {
        match slot.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransferBackend for MockBackend {
    async fn start_upload(
        &self,
        _session_id: &str,
        _local_path: &str,
        _remote_path: &str,
    ) -> Result<TaskId, TransferError> {
        self.pause().await;
        Self::check(&self.start_error)?;
        Ok(self.next_task_id())
    }

    async fn start_download(
        &self,
        _session_id: &str,
        _remote_path: &str,
        _local_dir: &str,
    ) -> Result<TaskId, TransferError> {
        self.pause().await;
        Self::check(&self.start_error)?;
        Ok(self.next_task_id())
    }

    async fn start_download_directory(
        &self,
        _session_id: &str,
        _remote_dir: &str,
        _local_dir: &str,
    ) -> Result<Vec<TaskId>, TransferError> {
        self.pause().await;
        let files = self.directory.lock().clone().unwrap_or(Ok(0))?;
        Ok((0..files).map(|_| self.next_task_id()).collect())
    }

    async fn cancel_transfer(&self, _task_id: &TaskId) -> Result<(), TransferError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Self::check(&self.cancel_error)
    }

    async fn retry_transfer(&self, _task_id: &TaskId) -> Result<(), TransferError> {
        self.retry_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Self::check(&self.retry_error)
    }

    async fn cleanup_transfers(&self) -> Result<(), TransferError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.cleanup_error)
    }

    async fn get_transfer(&self, task_id: &TaskId) -> Result<TransferTask, TransferError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.get_failures.lock();
            if let Some((remaining, err)) = failures.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(err.clone());
                }
            }
        }
        let snapshot = self.snapshots.lock().get(task_id).cloned();
        Ok(snapshot.unwrap_or_else(|| {
            TransferTask::new(task_id.clone(), TransferDirection::Download, "")
        }))
    }

    async fn get_directory_stats(
        &self,
        _session_id: &str,
        _path: &str,
    ) -> Result<DirectoryStats, TransferError> {
        self.pause().await;
        Ok(*self.stats.lock())
    }

    async fn delete_recursive(&self, _session_id: &str, _path: &str) -> Result<u64, TransferError> {
        self.pause().await;
        Self::check(&self.delete_error)?;
        Ok(self.stats.lock().file_count)
    }

    async fn delete_item(&self, _session_id: &str, _path: &str) -> Result<(), TransferError> {
        self.pause().await;
        Self::check(&self.delete_error)
    }
}
