//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of session affinity.
//! They have no external dependencies and contain only business logic.

use crate::domain::value_objects::{ChannelId, ChannelType, KeyTtl};

/// Store key addressing one sticky mapping.
///
/// Fully determined by (channel type, session fingerprint): the same
/// inputs always address the same store entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingKey(String);

impl MappingKey {
    /// Build the namespaced key for a fingerprint.
    ///
    /// Returns `None` for an empty fingerprint, which never addresses a mapping.
    pub fn new(channel_type: ChannelType, fingerprint: &str) -> Option<Self> {
        if fingerprint.is_empty() {
            return None;
        }
        Some(Self(format!("{}{}", channel_type.key_prefix(), fingerprint)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A session bound to a channel, as observed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyMapping {
    /// Namespaced store key
    pub key: MappingKey,
    /// Channel the session is bound to
    pub channel_id: ChannelId,
    /// Remaining lease
    pub ttl: KeyTtl,
}

impl StickyMapping {
    pub fn new(key: MappingKey, channel_id: ChannelId, ttl: KeyTtl) -> Self {
        Self {
            key,
            channel_id,
            ttl,
        }
    }
}
