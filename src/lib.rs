//! SFTP transfer core
//!
//! Client-side bookkeeping for SFTP transfers: a task registry fed by the
//! backend's push events, optimistic cancel/retry with rollback, directory
//! fan-out and recursive delete progress.

pub mod config;
pub mod transfer;

pub use config::CoordinatorConfig;
pub use transfer::{spawn_coordinator, CoordinatorError, CoordinatorHandle, EventSender};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once;
/// only the first call installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
