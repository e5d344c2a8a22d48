//! SHA-256 key hashing for the file cache tier.
//!
//! Implements the `CacheKeyHasher` trait from `taskweave-core` using the
//! `sha2` crate (RustCrypto ecosystem).

use sha2::{Digest, Sha256};

use taskweave_core::cache::store::CacheKeyHasher;

/// Lowercase hex SHA-256 of the cache key, used as the entry's file stem.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256KeyHasher;

impl Sha256KeyHasher {
    pub fn new() -> Self {
        Self
    }
}

impl CacheKeyHasher for Sha256KeyHasher {
    fn hash_key(&self, key: &str) -> String {
        format!("{:x}", Sha256::digest(key.as_bytes()))
    }
}
