//! Configuration Management Module

pub mod coordinator;

pub use coordinator::{
    ConfigError, CoordinatorConfig, DEFAULT_CHANGE_FEED_CAPACITY, DEFAULT_COMMAND_TIMEOUT_MS,
    DEFAULT_INBOX_CAPACITY,
};
