//! Recursive Delete Progress Tracker
//!
//! Progress of a recursive delete is keyed by its target path, not by a
//! task id. Two deletes of the same path could not be told apart, so only
//! one may be in flight per path. Dismissing the progress hides it but keeps
//! the path reserved until the backend call returns.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::error::CoordinatorError;
use super::path_utils::normalize_remote_path;
use super::types::DeleteProgressEvent;

/// Live progress of one recursive delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteProgress {
    /// Per-invocation id, for log correlation only
    pub operation_id: String,
    pub path: String,
    pub deleted_count: u64,
    /// 0 until the backend has finished walking the tree
    pub total_count: u64,
    pub current_path: String,
}

impl DeleteProgress {
    fn new(path: String) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            path,
            deleted_count: 0,
            total_count: 0,
            current_path: String::new(),
        }
    }

    pub fn percent(&self) -> u8 {
        delete_percent(self.deleted_count, self.total_count)
    }
}

/// `round(deleted / total * 100)`, clamped to 100.
///
/// A zero total means the tree walk has not finished, which reads as 0%
/// whatever has been deleted so far (never NaN).
pub fn delete_percent(deleted_count: u64, total_count: u64) -> u8 {
    if total_count == 0 {
        return 0;
    }
    let pct = (deleted_count as f64 / total_count as f64 * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}

#[derive(Debug)]
struct Slot {
    progress: DeleteProgress,
    /// Cleared when the owner dismisses the dialog early
    visible: bool,
}

#[derive(Debug, Default)]
pub struct DeleteProgressTracker {
    live: HashMap<String, Slot>,
}

impl DeleteProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a recursive delete of `path`
    pub fn begin(&mut self, path: &str) -> Result<&DeleteProgress, CoordinatorError> {
        let key = normalize_remote_path(path);
        if self.live.contains_key(&key) {
            return Err(CoordinatorError::DeleteInFlight(key));
        }
        let progress = DeleteProgress::new(key.clone());
        info!(
            "Recursive delete {} started for {}",
            progress.operation_id, key
        );
        let slot = self.live.entry(key).or_insert(Slot {
            progress,
            visible: true,
        });
        Ok(&slot.progress)
    }

    /// Apply a `delete.progress` event. Counters never move backwards.
    pub fn apply(&mut self, event: &DeleteProgressEvent) -> Option<&DeleteProgress> {
        let key = normalize_remote_path(&event.path);
        let Some(slot) = self.live.get_mut(&key).filter(|s| s.visible) else {
            debug!("Dropping delete progress for untracked path {}", event.path);
            return None;
        };
        let progress = &mut slot.progress;
        if event.deleted_count >= progress.deleted_count {
            progress.deleted_count = event.deleted_count;
            progress.current_path = event.current_path.clone();
        }
        progress.total_count = progress.total_count.max(event.total_count);
        Some(progress)
    }

    pub fn get(&self, path: &str) -> Option<&DeleteProgress> {
        self.live
            .get(&normalize_remote_path(path))
            .filter(|s| s.visible)
            .map(|s| &s.progress)
    }

    /// Hide the progress of a still-running delete. Returns `true` if it was visible.
    pub fn dismiss(&mut self, path: &str) -> bool {
        match self.live.get_mut(&normalize_remote_path(path)) {
            Some(slot) if slot.visible => {
                slot.visible = false;
                debug!("Delete progress dismissed for {}", slot.progress.path);
                true
            }
            _ => false,
        }
    }

    /// Release the path once the backend call of `operation_id` returned
    pub fn settle(&mut self, path: &str, operation_id: &str) -> Option<DeleteProgress> {
        let key = normalize_remote_path(path);
        if self.live.get(&key)?.progress.operation_id != operation_id {
            return None;
        }
        let p = self.live.remove(&key)?.progress;
        info!(
            "Recursive delete {} settled for {} ({}/{})",
            p.operation_id, key, p.deleted_count, p.total_count
        );
        Some(p)
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
