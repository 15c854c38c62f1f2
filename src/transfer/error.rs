//! Transfer error types

use thiserror::Error;

use super::types::{TaskId, TransferStatus};

/// Failure of a single backend command round-trip.
///
/// These never describe the outcome of a task itself; task-terminal errors
/// arrive through `transfer.status` events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Network lost: {0}")]
    NetworkLost(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Local IO error: {0}")]
    LocalIo(String),

    #[error("Remote IO error: {0}")]
    RemoteIo(String),
}

impl TransferError {
    /// The backend could not be reached at all (as opposed to rejecting the request)
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TransferError::NetworkLost(_)
                | TransferError::BackendUnavailable(_)
                | TransferError::Timeout(_)
        )
    }
}

/// Errors returned by [`CoordinatorHandle`](super::coordinator::CoordinatorHandle) calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The backend rejected or never answered the command
    #[error(transparent)]
    Command(#[from] TransferError),

    /// Planning failed before any task existed (e.g. directory walk)
    #[error("Planning failed: {0}")]
    Planning(TransferError),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("Task is not retryable: {0}")]
    NotRetryable(TaskId),

    /// A cancel or retry for this task has not settled yet
    #[error("Operation already pending for task: {0}")]
    OperationPending(TaskId),

    #[error("Recursive delete already running for: {0}")]
    DeleteInFlight(String),

    /// The coordinator loop has shut down
    #[error("Coordinator closed")]
    Closed,
}

// Serialize as the display string so UI layers can forward errors verbatim
impl serde::Serialize for TransferError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl serde::Serialize for CoordinatorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
