//! DashMap Key-Value Store
//!
//! Implements KeyValueStore in process using DashMap, with per-key
//! millisecond leases. Suitable for single-node deployments and tests.

use crate::domain::ports::{KeyValueStore, StoreError, MAX_TTL};
use crate::domain::value_objects::KeyTtl;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// `None` means the key never expires
    expires_at: Option<Instant>,
}

/// Expiry instant for a lease starting at `now`.
fn deadline(now: Instant, ttl: Duration) -> Result<Instant, StoreError> {
    if ttl.is_zero() || ttl > MAX_TTL {
        return Err(StoreError::InvalidTtl);
    }
    now.checked_add(ttl).ok_or(StoreError::InvalidTtl)
}

impl Entry {
    fn new(value: Value, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// DashMap-backed key-value store.
///
/// Expired keys are invisible to every read and are physically removed
/// either lazily on access or by the background sweep started with
/// [`DashMapStore::start_gc`]. Uses the tokio clock, so tests can drive
/// leases with a paused runtime.
pub struct DashMapStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl DashMapStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Start the background expiry sweep.
    pub fn start_gc(&self, interval: Duration) {
        let entries = self.entries.clone();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let removed = Self::sweep(&entries);
                if removed > 0 {
                    tracing::debug!("store GC removed {} expired keys", removed);
                }
            }
        });
    }

    fn sweep(entries: &DashMap<String, Entry>) -> usize {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(entries.len())
    }

    /// Remove all expired keys now. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        Self::sweep(&self.entries)
    }

    /// Write a string value that never expires.
    pub fn set_persistent(&self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), Entry::new(Value::Str(value.to_string()), None));
    }

    /// Number of stored keys, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entry for a key, dropping it if its lease has run out.
    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.value().clone();
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

impl Default for DashMapStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for DashMapStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = deadline(Instant::now(), ttl)?;
        self.entries.insert(
            key.to_string(),
            Entry::new(Value::Str(value.to_string()), Some(expires_at)),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, e)| !e.is_expired(now)))
    }

    async fn remaining_ttl(&self, key: &str) -> Result<KeyTtl, StoreError> {
        let Some(entry) = self.live(key) else {
            return Ok(KeyTtl::Absent);
        };
        Ok(match entry.expires_at {
            None => KeyTtl::Persistent,
            Some(at) => {
                let left = at.saturating_duration_since(Instant::now());
                KeyTtl::Expires(Duration::from_millis(left.as_millis() as u64))
            }
        })
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let expires_at = deadline(now, ttl)?;
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live(key).is_some())
    }

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64, StoreError> {
        let now = Instant::now();
        let parse = |s: &str| {
            s.parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger(key.to_string()))
        };

        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(mut occupied) if !occupied.get().is_expired(now) => {
                let entry = occupied.get_mut();
                let Value::Str(current) = &entry.value else {
                    return Err(StoreError::WrongType(key.to_string()));
                };
                let next = parse(current)?
                    .checked_sub(amount)
                    .ok_or_else(|| StoreError::NotAnInteger(key.to_string()))?;
                entry.value = Value::Str(next.to_string());
                Ok(next)
            }
            MapEntry::Occupied(mut occupied) => {
                let next = 0i64
                    .checked_sub(amount)
                    .ok_or_else(|| StoreError::NotAnInteger(key.to_string()))?;
                occupied.insert(Entry::new(Value::Str(next.to_string()), None));
                Ok(next)
            }
            MapEntry::Vacant(vacant) => {
                let next = 0i64
                    .checked_sub(amount)
                    .ok_or_else(|| StoreError::NotAnInteger(key.to_string()))?;
                vacant.insert(Entry::new(Value::Str(next.to_string()), None));
                Ok(next)
            }
        }
    }

    async fn set_add(&self, key: &str, members: &[&str]) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new()), None));
        if entry.is_expired(now) {
            *entry = Entry::new(Value::Set(HashSet::new()), None);
        }

        let Value::Set(set) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_string()));
        };
        Ok(members
            .iter()
            .filter(|m| set.insert((**m).to_string()))
            .count())
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        match self.live(key) {
            None => Ok(false),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
