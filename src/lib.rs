//! sticky-affinity Library
//!
//! Session-affinity mapping for a multi-channel request router: binds a
//! session fingerprint to the channel chosen for it, in a shared
//! key-value store with TTL-based leases.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod bootstrap;
pub mod config;
pub mod domain;

// Re-export commonly used types
pub use adapters::outbound::{DashMapStore, RedisConfig, RedisStore};
pub use application::{StickySessionService, StickySettings};
pub use bootstrap::connect_affinity;
pub use config::load_config;
pub use domain::entities::{MappingKey, StickyMapping};
pub use domain::ports::{KeyValueStore, StoreError, MAX_TTL};
pub use domain::services::{AffinityError, AffinityManager, RenewOutcome};
pub use domain::value_objects::{ChannelId, ChannelType, KeyTtl, DEFAULT_STICKY_TTL};
