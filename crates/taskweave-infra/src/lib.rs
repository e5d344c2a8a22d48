//! Infrastructure layer for Taskweave.
//!
//! Contains implementations of the ports defined in `taskweave-core`: the
//! file-backed persistent cache tier and SHA-256 key hashing, plus the
//! configuration loader and data-directory resolution.

pub mod cache;
pub mod config;
pub mod crypto;
pub mod filesystem;
