//! Shared domain types for Taskweave.
//!
//! This crate contains the value types exchanged between the workflow engine,
//! its cache, and the application layer: task results, progress snapshots,
//! cache entries, configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono, thiserror.

pub mod cache;
pub mod config;
pub mod error;
pub mod progress;
pub mod serde_millis;
pub mod task;
