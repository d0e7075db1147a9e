//! Affinity Mapping Manager
//!
//! Creates, reads, deletes and renews session-to-channel mappings on top
//! of a [`KeyValueStore`]. The manager is the only place that derives
//! store keys and decides when a lease is refreshed.

use crate::domain::entities::{MappingKey, StickyMapping};
use crate::domain::ports::{KeyValueStore, StoreError};
use crate::domain::value_objects::{ChannelId, ChannelType, KeyTtl, DEFAULT_STICKY_TTL};
use std::sync::Arc;
use std::time::Duration;

/// Errors surfaced by mapping operations.
///
/// Disabled stores, empty fingerprints and missing keys are not errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AffinityError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The stored value is not a channel id
    #[error("mapping {key} holds non-numeric value {value:?}")]
    CorruptMapping { key: String, value: String },
}

/// What a renewal call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    /// Store disabled, empty fingerprint or renewal turned off
    Skipped,
    /// No such key; nothing to renew
    Missing,
    /// Key never expires; left alone
    Persistent,
    /// Remaining lease is above the threshold
    Fresh,
    /// Lease was reset to the full TTL
    Renewed,
}

/// Session affinity manager.
///
/// Cheap to clone; all clones share the same store handle. Holds no
/// in-process mutable state, so concurrent calls coordinate only through
/// the store's per-key atomicity (last write wins).
#[derive(Clone)]
pub struct AffinityManager {
    /// `None` when no store is configured: every operation is a no-op
    store: Option<Arc<dyn KeyValueStore>>,
}

impl AffinityManager {
    /// Create an enabled manager over a connected store.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Create a manager with affinity turned off.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Resolve the store and key for an operation, or `None` for a no-op.
    fn target(
        &self,
        fingerprint: &str,
        channel_type: ChannelType,
    ) -> Option<(&Arc<dyn KeyValueStore>, MappingKey)> {
        let store = self.store.as_ref()?;
        let key = MappingKey::new(channel_type, fingerprint)?;
        Some((store, key))
    }

    fn effective_ttl(ttl: Duration) -> Duration {
        if ttl.is_zero() {
            DEFAULT_STICKY_TTL
        } else {
            ttl
        }
    }

    /// Bind a session to a channel, replacing any prior mapping and lease.
    ///
    /// A zero `ttl` selects [`DEFAULT_STICKY_TTL`].
    pub async fn set_mapping(
        &self,
        fingerprint: &str,
        channel_id: ChannelId,
        channel_type: ChannelType,
        ttl: Duration,
    ) -> Result<(), AffinityError> {
        let Some((store, key)) = self.target(fingerprint, channel_type) else {
            return Ok(());
        };
        let ttl = Self::effective_ttl(ttl);

        store.set(key.as_str(), &channel_id.encode(), ttl).await?;
        tracing::debug!("sticky mapping set {} -> {} (ttl {:?})", key, channel_id, ttl);
        Ok(())
    }

    /// Look up the channel a session is bound to.
    ///
    /// `Ok(None)` when affinity is disabled, the fingerprint is empty or
    /// no mapping exists yet.
    pub async fn get_mapping(
        &self,
        fingerprint: &str,
        channel_type: ChannelType,
    ) -> Result<Option<ChannelId>, AffinityError> {
        let Some((store, key)) = self.target(fingerprint, channel_type) else {
            return Ok(None);
        };

        let Some(raw) = store.get(key.as_str()).await? else {
            return Ok(None);
        };

        ChannelId::decode(&raw).map_err(|_| AffinityError::CorruptMapping {
            key: key.to_string(),
            value: raw,
        })
    }

    /// Remove a session's mapping. Removing an absent mapping succeeds.
    pub async fn delete_mapping(
        &self,
        fingerprint: &str,
        channel_type: ChannelType,
    ) -> Result<(), AffinityError> {
        let Some((store, key)) = self.target(fingerprint, channel_type) else {
            return Ok(());
        };

        let removed = store.delete(key.as_str()).await?;
        tracing::debug!("sticky mapping delete {} (removed={})", key, removed);
        Ok(())
    }

    /// Extend a mapping's lease only when it is close to expiring.
    ///
    /// The lease is reset to `full_ttl` (zero selects the default) when the
    /// remaining TTL is below `renewal_threshold_minutes`. A threshold of
    /// zero turns renewal off. Absent keys and keys without expiry are
    /// never touched.
    pub async fn renew_mapping(
        &self,
        fingerprint: &str,
        channel_type: ChannelType,
        full_ttl: Duration,
        renewal_threshold_minutes: u32,
    ) -> Result<RenewOutcome, AffinityError> {
        if renewal_threshold_minutes == 0 {
            return Ok(RenewOutcome::Skipped);
        }
        let Some((store, key)) = self.target(fingerprint, channel_type) else {
            return Ok(RenewOutcome::Skipped);
        };
        let full_ttl = Self::effective_ttl(full_ttl);
        let threshold = Duration::from_secs(u64::from(renewal_threshold_minutes) * 60);

        let remaining = match store.remaining_ttl(key.as_str()).await? {
            KeyTtl::Absent => return Ok(RenewOutcome::Missing),
            KeyTtl::Persistent => return Ok(RenewOutcome::Persistent),
            KeyTtl::Expires(remaining) => remaining,
        };

        if remaining >= threshold {
            return Ok(RenewOutcome::Fresh);
        }

        // Expired between the two calls: nothing left to renew.
        if !store.refresh(key.as_str(), full_ttl).await? {
            return Ok(RenewOutcome::Missing);
        }

        tracing::debug!(
            "sticky mapping renewed {} ({:?} left, reset to {:?})",
            key,
            remaining,
            full_ttl
        );
        Ok(RenewOutcome::Renewed)
    }

    /// Remaining lease of a session's mapping.
    pub async fn mapping_ttl(
        &self,
        fingerprint: &str,
        channel_type: ChannelType,
    ) -> Result<KeyTtl, AffinityError> {
        let Some((store, key)) = self.target(fingerprint, channel_type) else {
            return Ok(KeyTtl::Absent);
        };
        Ok(store.remaining_ttl(key.as_str()).await?)
    }

    /// Read a mapping together with its lease.
    pub async fn inspect(
        &self,
        fingerprint: &str,
        channel_type: ChannelType,
    ) -> Result<Option<StickyMapping>, AffinityError> {
        let Some(channel_id) = self.get_mapping(fingerprint, channel_type).await? else {
            return Ok(None);
        };
        let ttl = self.mapping_ttl(fingerprint, channel_type).await?;
        let Some(key) = MappingKey::new(channel_type, fingerprint) else {
            return Ok(None);
        };
        Ok(Some(StickyMapping::new(key, channel_id, ttl)))
    }
}

impl std::fmt::Debug for AffinityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityManager")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::DashMapStore;
    use async_trait::async_trait;

    const HOUR: Duration = Duration::from_secs(3600);

    fn channel(id: u64) -> ChannelId {
        ChannelId::new(id).unwrap()
    }

    fn manager() -> (AffinityManager, Arc<DashMapStore>) {
        let store = Arc::new(DashMapStore::new());
        (AffinityManager::new(store.clone()), store)
    }

    /// Store whose every call fails as if the network were down.
    struct FailingStore;

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn remaining_ttl(&self, _key: &str) -> Result<KeyTtl, StoreError> {
            Err(StoreError::Timeout(Duration::from_secs(30)))
        }
        async fn refresh(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn decr_by(&self, _key: &str, _amount: i64) -> Result<i64, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn set_add(&self, _key: &str, _members: &[&str]) -> Result<usize, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn set_is_member(&self, _key: &str, _member: &str) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    // ===== Set / Get / Delete Tests =====

    #[tokio::test]
    async fn test_set_then_get() {
        let (mgr, _) = manager();
        mgr.set_mapping("abc123", channel(42), ChannelType::ClaudeCode, HOUR)
            .await
            .unwrap();

        let got = mgr.get_mapping("abc123", ChannelType::ClaudeCode).await.unwrap();
        assert_eq!(got, Some(channel(42)));
    }

    #[tokio::test]
    async fn test_get_never_set() {
        let (mgr, _) = manager();
        let got = mgr.get_mapping("nobody", ChannelType::Codex).await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_set_writes_namespaced_key() {
        let (mgr, store) = manager();
        mgr.set_mapping("abc", channel(9), ChannelType::GeminiCli, HOUR)
            .await
            .unwrap();

        let raw = store.get("sticky_session_gemini:abc").await.unwrap();
        assert_eq!(raw.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn test_set_overwrites_prior_mapping() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(1), ChannelType::Codex, HOUR).await.unwrap();
        mgr.set_mapping("f", channel(2), ChannelType::Codex, HOUR).await.unwrap();

        let got = mgr.get_mapping("f", ChannelType::Codex).await.unwrap();
        assert_eq!(got, Some(channel(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_zero_ttl_uses_default() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(5), ChannelType::ClaudeCode, Duration::ZERO)
            .await
            .unwrap();

        let ttl = mgr.mapping_ttl("f", ChannelType::ClaudeCode).await.unwrap();
        assert_eq!(ttl, KeyTtl::Expires(DEFAULT_STICKY_TTL));
    }

    #[tokio::test]
    async fn test_set_unrepresentable_ttl_is_error() {
        let (mgr, store) = manager();

        let err = mgr
            .set_mapping("f", channel(1), ChannelType::Codex, Duration::MAX)
            .await
            .unwrap_err();

        assert_eq!(err, AffinityError::Store(StoreError::InvalidTtl));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_unrepresentable_ttl_is_error() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(1), ChannelType::Codex, Duration::from_secs(60))
            .await
            .unwrap();

        let err = mgr
            .renew_mapping("f", ChannelType::Codex, Duration::from_secs(u64::MAX), 10)
            .await
            .unwrap_err();

        assert_eq!(err, AffinityError::Store(StoreError::InvalidTtl));
        assert_eq!(
            mgr.mapping_ttl("f", ChannelType::Codex).await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(60))
        );
    }

    #[tokio::test]
    async fn test_channel_types_do_not_collide() {
        let (mgr, _) = manager();
        mgr.set_mapping("same", channel(1), ChannelType::ClaudeCode, HOUR)
            .await
            .unwrap();
        mgr.set_mapping("same", channel(2), ChannelType::GeminiCli, HOUR)
            .await
            .unwrap();
        mgr.set_mapping("same", channel(3), ChannelType::Codex, HOUR)
            .await
            .unwrap();

        assert_eq!(
            mgr.get_mapping("same", ChannelType::ClaudeCode).await.unwrap(),
            Some(channel(1))
        );
        assert_eq!(
            mgr.get_mapping("same", ChannelType::GeminiCli).await.unwrap(),
            Some(channel(2))
        );
        assert_eq!(
            mgr.get_mapping("same", ChannelType::Codex).await.unwrap(),
            Some(channel(3))
        );
    }

    #[tokio::test]
    async fn test_delete_then_get() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(42), ChannelType::ClaudeCode, HOUR)
            .await
            .unwrap();
        mgr.delete_mapping("f", ChannelType::ClaudeCode).await.unwrap();

        assert_eq!(mgr.get_mapping("f", ChannelType::ClaudeCode).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let (mgr, _) = manager();
        assert!(mgr.delete_mapping("ghost", ChannelType::Codex).await.is_ok());
        assert!(mgr.delete_mapping("ghost", ChannelType::Codex).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_only_touches_its_namespace() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(1), ChannelType::ClaudeCode, HOUR).await.unwrap();
        mgr.set_mapping("f", channel(2), ChannelType::Codex, HOUR).await.unwrap();

        mgr.delete_mapping("f", ChannelType::Codex).await.unwrap();

        assert_eq!(
            mgr.get_mapping("f", ChannelType::ClaudeCode).await.unwrap(),
            Some(channel(1))
        );
    }

    #[tokio::test]
    async fn test_legacy_zero_value_reads_as_absent() {
        let (mgr, store) = manager();
        store.set("sticky_session:f", "0", HOUR).await.unwrap();

        assert_eq!(mgr.get_mapping("f", ChannelType::ClaudeCode).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_value_is_an_error() {
        let (mgr, store) = manager();
        store.set("sticky_session:f", "not-a-number", HOUR).await.unwrap();

        let err = mgr.get_mapping("f", ChannelType::ClaudeCode).await.unwrap_err();
        assert_eq!(
            err,
            AffinityError::CorruptMapping {
                key: "sticky_session:f".to_string(),
                value: "not-a-number".to_string(),
            }
        );
    }

    // ===== Empty Fingerprint Tests =====

    #[tokio::test]
    async fn test_empty_fingerprint_is_noop() {
        let (mgr, store) = manager();
        mgr.set_mapping("", channel(7), ChannelType::ClaudeCode, HOUR)
            .await
            .unwrap();

        assert_eq!(store.len(), 0);
        assert_eq!(mgr.get_mapping("", ChannelType::ClaudeCode).await.unwrap(), None);
        assert!(mgr.delete_mapping("", ChannelType::ClaudeCode).await.is_ok());
        assert_eq!(
            mgr.renew_mapping("", ChannelType::ClaudeCode, HOUR, 10).await.unwrap(),
            RenewOutcome::Skipped
        );
        assert_eq!(
            mgr.mapping_ttl("", ChannelType::ClaudeCode).await.unwrap(),
            KeyTtl::Absent
        );
    }

    #[tokio::test]
    async fn test_empty_fingerprint_never_reaches_store() {
        let mgr = AffinityManager::new(Arc::new(FailingStore));

        assert!(mgr.set_mapping("", channel(1), ChannelType::Codex, HOUR).await.is_ok());
        assert_eq!(mgr.get_mapping("", ChannelType::Codex).await, Ok(None));
        assert!(mgr.delete_mapping("", ChannelType::Codex).await.is_ok());
    }

    // ===== Disabled Store Tests =====

    #[tokio::test]
    async fn test_disabled_manager_is_noop() {
        let mgr = AffinityManager::disabled();
        assert!(!mgr.is_enabled());

        assert!(mgr
            .set_mapping("abc", channel(42), ChannelType::ClaudeCode, HOUR)
            .await
            .is_ok());
        assert_eq!(mgr.get_mapping("abc", ChannelType::ClaudeCode).await, Ok(None));
        assert!(mgr.delete_mapping("abc", ChannelType::ClaudeCode).await.is_ok());
        assert_eq!(
            mgr.renew_mapping("abc", ChannelType::ClaudeCode, HOUR, 10).await,
            Ok(RenewOutcome::Skipped)
        );
        assert_eq!(mgr.inspect("abc", ChannelType::ClaudeCode).await, Ok(None));
    }

    // ===== Store Failure Tests =====

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mgr = AffinityManager::new(Arc::new(FailingStore));

        let err = mgr
            .set_mapping("f", channel(1), ChannelType::ClaudeCode, HOUR)
            .await
            .unwrap_err();
        assert!(matches!(err, AffinityError::Store(StoreError::Backend(_))));

        let err = mgr.get_mapping("f", ChannelType::ClaudeCode).await.unwrap_err();
        assert!(matches!(err, AffinityError::Store(StoreError::Backend(_))));

        assert!(mgr.delete_mapping("f", ChannelType::ClaudeCode).await.is_err());
    }

    #[tokio::test]
    async fn test_renew_surfaces_timeout() {
        let mgr = AffinityManager::new(Arc::new(FailingStore));
        let err = mgr
            .renew_mapping("f", ChannelType::ClaudeCode, HOUR, 10)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AffinityError::Store(StoreError::Timeout(Duration::from_secs(30)))
        );
    }

    #[tokio::test]
    async fn test_renew_disabled_threshold_skips_store() {
        let mgr = AffinityManager::new(Arc::new(FailingStore));
        let outcome = mgr.renew_mapping("f", ChannelType::ClaudeCode, HOUR, 0).await;
        assert_eq!(outcome, Ok(RenewOutcome::Skipped));
    }

    // ===== Renewal Tests =====

    #[tokio::test(start_paused = true)]
    async fn test_renew_threshold_zero_leaves_ttl() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(1), ChannelType::ClaudeCode, Duration::from_secs(60))
            .await
            .unwrap();

        let outcome = mgr
            .renew_mapping("f", ChannelType::ClaudeCode, HOUR, 0)
            .await
            .unwrap();

        assert_eq!(outcome, RenewOutcome::Skipped);
        assert_eq!(
            mgr.mapping_ttl("f", ChannelType::ClaudeCode).await.unwrap(),
            KeyTtl::Expires(Duration::from_secs(60))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_above_threshold_is_fresh() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(1), ChannelType::ClaudeCode, HOUR)
            .await
            .unwrap();

        let outcome = mgr
            .renew_mapping("f", ChannelType::ClaudeCode, HOUR, 10)
            .await
            .unwrap();

        assert_eq!(outcome, RenewOutcome::Fresh);
        assert_eq!(
            mgr.mapping_ttl("f", ChannelType::ClaudeCode).await.unwrap(),
            KeyTtl::Expires(HOUR)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_below_threshold_resets_lease() {
        let (mgr, _) = manager();
        mgr.set_mapping("abc123", channel(42), ChannelType::ClaudeCode, HOUR)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(55 * 60)).await;

        let outcome = mgr
            .renew_mapping("abc123", ChannelType::ClaudeCode, HOUR, 10)
            .await
            .unwrap();

        assert_eq!(outcome, RenewOutcome::Renewed);
        assert_eq!(
            mgr.mapping_ttl("abc123", ChannelType::ClaudeCode).await.unwrap(),
            KeyTtl::Expires(HOUR)
        );
        assert_eq!(
            mgr.get_mapping("abc123", ChannelType::ClaudeCode).await.unwrap(),
            Some(channel(42))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_zero_full_ttl_uses_default() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(3), ChannelType::Codex, Duration::from_secs(120))
            .await
            .unwrap();

        let outcome = mgr
            .renew_mapping("f", ChannelType::Codex, Duration::ZERO, 5)
            .await
            .unwrap();

        assert_eq!(outcome, RenewOutcome::Renewed);
        assert_eq!(
            mgr.mapping_ttl("f", ChannelType::Codex).await.unwrap(),
            KeyTtl::Expires(DEFAULT_STICKY_TTL)
        );
    }

    #[tokio::test]
    async fn test_renew_absent_key_creates_nothing() {
        let (mgr, store) = manager();
        let outcome = mgr
            .renew_mapping("ghost", ChannelType::ClaudeCode, HOUR, 10)
            .await
            .unwrap();

        assert_eq!(outcome, RenewOutcome::Missing);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_expired_key_is_missing() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(1), ChannelType::ClaudeCode, Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        let outcome = mgr
            .renew_mapping("f", ChannelType::ClaudeCode, HOUR, 10)
            .await
            .unwrap();
        assert_eq!(outcome, RenewOutcome::Missing);
        assert_eq!(mgr.get_mapping("f", ChannelType::ClaudeCode).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_renew_persistent_key_untouched() {
        let (mgr, store) = manager();
        store.set_persistent("sticky_session:f", "8");

        let outcome = mgr
            .renew_mapping("f", ChannelType::ClaudeCode, HOUR, 10)
            .await
            .unwrap();

        assert_eq!(outcome, RenewOutcome::Persistent);
        assert_eq!(
            mgr.mapping_ttl("f", ChannelType::ClaudeCode).await.unwrap(),
            KeyTtl::Persistent
        );
        assert_eq!(
            mgr.get_mapping("f", ChannelType::ClaudeCode).await.unwrap(),
            Some(channel(8))
        );
    }

    // ===== Inspect Tests =====

    #[tokio::test(start_paused = true)]
    async fn test_inspect_returns_mapping_and_lease() {
        let (mgr, _) = manager();
        mgr.set_mapping("f", channel(11), ChannelType::GeminiCli, HOUR)
            .await
            .unwrap();

        let mapping = mgr.inspect("f", ChannelType::GeminiCli).await.unwrap().unwrap();
        assert_eq!(mapping.key.as_str(), "sticky_session_gemini:f");
        assert_eq!(mapping.channel_id, channel(11));
        assert_eq!(mapping.ttl, KeyTtl::Expires(HOUR));
    }

    #[test]
    fn test_manager_debug() {
        let mgr = AffinityManager::disabled();
        assert_eq!(format!("{:?}", mgr), "AffinityManager { enabled: false }");
    }
}
