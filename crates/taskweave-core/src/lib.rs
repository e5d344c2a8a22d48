//! Workflow engine and cache logic for Taskweave.
//!
//! This crate defines the engine itself (DAG planning, bounded-concurrency
//! batch execution, retries, progress reporting) and the two-tier cache, plus
//! the "ports" (persistent store, key hasher) that the infrastructure layer
//! implements. It depends only on `taskweave-types` -- never on
//! `taskweave-infra` or any filesystem code.

pub mod batch;
pub mod cache;
pub mod clock;
pub mod workflow;
