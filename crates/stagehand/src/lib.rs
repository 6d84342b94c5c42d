//! Stagehand - Event-driven automation host
//!
//! This crate wires the runtime into a long-running process:
//! - Layered configuration (`stagehand.toml`, environment, CLI)
//! - Rule files loaded from a watched directory
//! - Persistent plugin storage in redb
//! - A playback device that shells out to an external player
//! - Built-in plugins (core actions, event simulator)

// Re-export core crates
pub use stagehand_runtime;
pub use stagehand_types;

pub mod config;
pub mod device;
pub mod dispatcher;
pub mod host;
pub mod plugins;
pub mod rules;
pub mod storage;

pub use config::Config;
pub use host::{Host, HostError};
