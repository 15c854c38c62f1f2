//! Transfer Command Gateway
//!
//! Request/response calls into the backend transfer executor. Every
//! round-trip is bounded so a dead backend surfaces as
//! [`TransferError::Timeout`] instead of a hung caller. Task completion
//! itself is never bounded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::error::TransferError;
use super::types::{DirectoryStats, TaskId, TransferTask};

/// Backend transfer executor as seen from the client.
///
/// `session_id` names the SSH session the SFTP channel lives on.
#[async_trait]
pub trait TransferBackend: Send + Sync {
    async fn start_upload(
        &self,
        session_id: &str,
        local_path: &str,
        remote_path: &str,
    ) -> Result<TaskId, TransferError>;

    async fn start_download(
        &self,
        session_id: &str,
        remote_path: &str,
        local_dir: &str,
    ) -> Result<TaskId, TransferError>;

    /// One task per leaf file found under `remote_dir`; no batch id
    async fn start_download_directory(
        &self,
        session_id: &str,
        remote_dir: &str,
        local_dir: &str,
    ) -> Result<Vec<TaskId>, TransferError>;

    async fn cancel_transfer(&self, task_id: &TaskId) -> Result<(), TransferError>;

    async fn retry_transfer(&self, task_id: &TaskId) -> Result<(), TransferError>;

    /// Reclaim backend bookkeeping for finished tasks
    async fn cleanup_transfers(&self) -> Result<(), TransferError>;

    async fn get_transfer(&self, task_id: &TaskId) -> Result<TransferTask, TransferError>;

    async fn get_directory_stats(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<DirectoryStats, TransferError>;

    /// Returns the number of entries deleted
    async fn delete_recursive(&self, session_id: &str, path: &str) -> Result<u64, TransferError>;

    async fn delete_item(&self, session_id: &str, path: &str) -> Result<(), TransferError>;
}

/// Bounded front for a [`TransferBackend`]
#[derive(Clone)]
pub struct CommandGateway {
    backend: Arc<dyn TransferBackend>,
    timeout: Duration,
}

impl CommandGateway {
    pub fn new(backend: Arc<dyn TransferBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, command: &str, fut: F) -> Result<T, TransferError>
    where
        F: Future<Output = Result<T, TransferError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out after {:?}", command, self.timeout);
                Err(TransferError::Timeout(format!(
                    "{} did not answer within {}ms",
                    command,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn start_upload(
        &self,
        session_id: &str,
        local_path: &str,
        remote_path: &str,
    ) -> Result<TaskId, TransferError> {
        self.bounded(
            "startUpload",
            self.backend.start_upload(session_id, local_path, remote_path),
        )
        .await
    }

    pub async fn start_download(
        &self,
        session_id: &str,
        remote_path: &str,
        local_dir: &str,
    ) -> Result<TaskId, TransferError> {
        self.bounded(
            "startDownload",
            self.backend.start_download(session_id, remote_path, local_dir),
        )
        .await
    }

    pub async fn start_download_directory(
        &self,
        session_id: &str,
        remote_dir: &str,
        local_dir: &str,
    ) -> Result<Vec<TaskId>, TransferError> {
        self.bounded(
            "startDownloadDirectory",
            self.backend
                .start_download_directory(session_id, remote_dir, local_dir),
        )
        .await
    }

    pub async fn cancel(&self, task_id: &TaskId) -> Result<(), TransferError> {
        self.bounded("cancelTransfer", self.backend.cancel_transfer(task_id))
            .await
    }

    pub async fn retry(&self, task_id: &TaskId) -> Result<(), TransferError> {
        self.bounded("retryTransfer", self.backend.retry_transfer(task_id))
            .await
    }

    pub async fn cleanup_completed(&self) -> Result<(), TransferError> {
        self.bounded("cleanupTransfers", self.backend.cleanup_transfers())
            .await
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<TransferTask, TransferError> {
        self.bounded("getTransfer", self.backend.get_transfer(task_id))
            .await
    }

    pub async fn directory_stats(
        &self,
        session_id: &str,
        path: &str,
    ) -> Result<DirectoryStats, TransferError> {
        self.bounded(
            "getDirectoryStats",
            self.backend.get_directory_stats(session_id, path),
        )
        .await
    }

    /// Not bounded by the command timeout: walking and deleting a large
    /// tree legitimately takes as long as it takes.
    pub async fn delete_recursive(&self, session_id: &str, path: &str) -> Result<u64, TransferError> {
        self.backend.delete_recursive(session_id, path).await
    }

    pub async fn delete_item(&self, session_id: &str, path: &str) -> Result<(), TransferError> {
        self.bounded("deleteItem", self.backend.delete_item(session_id, path))
            .await
    }
}
