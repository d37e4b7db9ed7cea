//! Configuration Module
//!
//! Handles configuration loading, validation, and hot reloading.

pub mod manager;
pub mod types;
pub mod watcher;

pub use manager::{ConfigManager, OVERRIDE_ENV};
pub use types::*;
pub use watcher::{ConfigChangeEvent, ConfigWatcher};
