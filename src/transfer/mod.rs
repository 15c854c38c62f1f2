//! SFTP transfer coordination
//!
//! Tracks uploads, downloads and recursive deletes issued to a backend
//! transfer executor, reconciling optimistic local updates with the
//! executor's push events.

pub mod coordinator;
pub mod delete;
pub mod error;
pub mod eta;
pub mod fanout;
pub mod gateway;
#[cfg(test)]
mod mock;
pub mod optimistic;
pub mod path_utils;
pub mod reconcile;
pub mod registry;
pub mod types;

pub use coordinator::{spawn_coordinator, CoordinatorHandle, EventSender, TaskChange};
pub use delete::{delete_percent, DeleteProgress, DeleteProgressTracker};
pub use error::{CoordinatorError, TransferError};
pub use eta::{estimate_eta, format_bytes, format_speed, Eta};
pub use fanout::{summarize, BatchSummary, FanOutOutcome};
pub use gateway::{CommandGateway, TransferBackend};
pub use registry::TaskRegistry;
pub use types::*;
