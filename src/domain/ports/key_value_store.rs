//! Key-Value Store Port
//!
//! Defines the interface to the shared store that holds sticky mappings.
//! Implementations must be safe for concurrent use from many tasks and
//! must provide atomicity for single-key operations; no cross-key
//! transactions are ever issued through this port.

use crate::domain::value_objects::KeyTtl;
use async_trait::async_trait;
use std::time::Duration;

/// Longest lease a store accepts: `i64::MAX` milliseconds.
pub const MAX_TTL: Duration = Duration::from_millis(i64::MAX as u64);

/// Errors raised by a store adapter.
///
/// A missing key is never an error: reads return `None` or
/// [`KeyTtl::Absent`] instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Network or protocol failure talking to the backing store
    #[error("store backend error: {0}")]
    Backend(String),
    /// The call did not complete before its deadline
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    /// Operation against a key holding the wrong kind of value
    #[error("wrong value type for key {0}")]
    WrongType(String),
    /// Value is not an integer where one is required
    #[error("value for key {0} is not an integer")]
    NotAnInteger(String),
    /// TTL is zero or longer than [`MAX_TTL`]
    #[error("ttl must be greater than zero and at most i64::MAX milliseconds")]
    InvalidTtl,
}

/// Shared key-value store with millisecond TTL semantics.
///
/// This is an outbound port. The affinity manager derives keys and owns
/// the renewal policy; adapters only move strings in and out of the store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a string value. `Ok(None)` means the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value with a lease, replacing any prior value and TTL.
    /// A zero or oversized `ttl` is rejected with [`StoreError::InvalidTtl`].
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remove a key. Returns whether something was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining lifetime of a key.
    async fn remaining_ttl(&self, key: &str) -> Result<KeyTtl, StoreError>;

    /// Reset the lease of an existing key, leaving its value unchanged.
    /// Returns `false` when the key does not exist.
    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Decrement an integer value, treating an absent key as zero.
    /// Returns the new value. The key's lease is preserved.
    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError>;

    /// Add members to a set. Returns how many were newly added.
    async fn set_add(&self, key: &str, members: &[&str]) -> Result<usize, StoreError>;

    /// Whether `member` belongs to the set stored at `key`.
    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;
}
