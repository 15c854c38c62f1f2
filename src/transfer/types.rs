//! Transfer data types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::eta::{estimate_eta, format_speed};

/// Opaque backend-assigned transfer identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Transfer status
///
/// `Success` and `Canceled` are final. `Failed` is terminal but may be
/// retried back to `Waiting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Queued, not started yet
    Waiting,
    /// Bytes are moving
    Running,
    Success,
    Failed,
    Canceled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Success | TransferStatus::Failed | TransferStatus::Canceled
        )
    }

    /// Edges of the task state machine.
    ///
    /// The backend may report a short task finishing straight from
    /// `Waiting`, and a retry may skip `Waiting` entirely.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        matches!(
            (self, next),
            (Waiting, Running | Success | Failed | Canceled)
                | (Running, Success | Failed | Canceled)
                | (Failed, Waiting | Running)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Waiting => "waiting",
            TransferStatus::Running => "running",
            TransferStatus::Success => "success",
            TransferStatus::Failed => "failed",
            TransferStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upload or download tracked end-to-end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    pub id: TaskId,
    pub direction: TransferDirection,
    /// Display name (not full path)
    pub file_name: String,
    /// Bytes transferred so far
    pub transferred: u64,
    /// Total bytes, unknown for some sources
    pub total: Option<u64>,
    /// Bytes per second as reported by the executor
    pub speed: Option<u64>,
    pub status: TransferStatus,
    /// Error message if failed
    pub error: Option<String>,
    pub retryable: bool,
    pub created_at: DateTime<Utc>,
}

impl TransferTask {
    /// Create a waiting task with no progress
    pub fn new(id: TaskId, direction: TransferDirection, file_name: impl Into<String>) -> Self {
        Self {
            id,
            direction,
            file_name: file_name.into(),
            transferred: 0,
            total: None,
            speed: None,
            status: TransferStatus::Waiting,
            error: None,
            retryable: false,
            created_at: Utc::now(),
        }
    }

    /// Completion percentage (0-100), always derived from the byte counters
    pub fn percent(&self) -> u8 {
        if self.status == TransferStatus::Success {
            return 100;
        }
        match self.total {
            Some(total) if total > 0 => {
                let pct = (self.transferred as f64 / total as f64 * 100.0).round();
                pct.clamp(0.0, 100.0) as u8
            }
            _ => 0,
        }
    }
}

/// Read-only projection of a task for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: TaskId,
    pub direction: TransferDirection,
    pub file_name: String,
    pub status: TransferStatus,
    pub transferred: u64,
    pub total: Option<u64>,
    pub percent: u8,
    /// Human readable speed, `None` when the executor gave none
    pub speed: Option<String>,
    /// Coarse remaining time, `--` when indeterminate
    pub eta: String,
    pub error: Option<String>,
    pub retryable: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&TransferTask> for TaskView {
    fn from(task: &TransferTask) -> Self {
        let eta = if task.status == TransferStatus::Running {
            estimate_eta(task.transferred, task.total, task.speed).to_string()
        } else {
            super::eta::Eta::Indeterminate.to_string()
        };
        Self {
            id: task.id.clone(),
            direction: task.direction,
            file_name: task.file_name.clone(),
            status: task.status,
            transferred: task.transferred,
            total: task.total,
            percent: task.percent(),
            speed: task.speed.filter(|s| *s > 0).map(format_speed),
            eta,
            error: task.error.clone(),
            retryable: task.retryable,
            created_at: task.created_at,
        }
    }
}

/// Snapshot of a directory taken before a delete confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryStats {
    pub file_count: u64,
    pub dir_count: u64,
    /// Sum of file sizes in bytes
    pub total_size: u64,
}

/// `transfer.progress` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub transferred: u64,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub speed: Option<u64>,
}

/// `transfer.status` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub task_id: TaskId,
    pub status: TransferStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Only meaningful for `failed`; absent means "keep what we know"
    #[serde(default)]
    pub retryable: Option<bool>,
}

/// `delete.progress` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProgressEvent {
    /// Target path of the recursive delete
    pub path: String,
    pub deleted_count: u64,
    pub total_count: u64,
    pub current_path: String,
}

/// Push event as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum PushEvent {
    #[serde(rename = "transfer.progress")]
    Progress(ProgressEvent),
    #[serde(rename = "transfer.status")]
    Status(StatusEvent),
    #[serde(rename = "delete.progress")]
    DeleteProgress(DeleteProgressEvent),
}
