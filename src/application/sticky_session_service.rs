//! Sticky Session Service - Router-facing use case
//!
//! Wraps the affinity manager with the routing policy: look up an
//! existing binding, keep its lease alive, fall back to a fresh channel
//! selection and bind it. Store failures never fail a request; they
//! degrade routing to stateless.

use crate::domain::services::{AffinityManager, RenewOutcome};
use crate::domain::value_objects::{ChannelId, ChannelType, DEFAULT_STICKY_TTL};
use std::time::Duration;

/// Lease policy applied by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StickySettings {
    /// Lease written on bind and restored on renewal
    pub ttl: Duration,
    /// Renew when fewer than this many minutes remain; 0 disables renewal
    pub renewal_threshold_minutes: u32,
}

impl Default for StickySettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_STICKY_TTL,
            renewal_threshold_minutes: 10,
        }
    }
}

/// Sticky session service - main application use case.
///
/// This service orchestrates session affinity for the router:
/// 1. Looks up the channel a session is bound to
/// 2. Renews the binding's lease when it is close to expiring
/// 3. Binds new sessions and releases bindings to failed channels
#[derive(Debug, Clone)]
pub struct StickySessionService {
    manager: AffinityManager,
    settings: StickySettings,
}

impl StickySessionService {
    /// Create a new sticky session service.
    pub fn new(manager: AffinityManager, settings: StickySettings) -> Self {
        Self { manager, settings }
    }

    pub fn manager(&self) -> &AffinityManager {
        &self.manager
    }

    pub fn settings(&self) -> &StickySettings {
        &self.settings
    }

    /// Channel the session is bound to, if any.
    ///
    /// A hit also renews the lease when it is about to run out. Store
    /// errors are logged and reported as "no binding".
    pub async fn lookup(&self, fingerprint: &str, channel_type: ChannelType) -> Option<ChannelId> {
        let channel_id = match self.manager.get_mapping(fingerprint, channel_type).await {
            Ok(found) => found?,
            Err(e) => {
                tracing::warn!(
                    "sticky lookup failed for {} session, routing statelessly: {}",
                    channel_type,
                    e
                );
                return None;
            }
        };

        match self
            .manager
            .renew_mapping(
                fingerprint,
                channel_type,
                self.settings.ttl,
                self.settings.renewal_threshold_minutes,
            )
            .await
        {
            Ok(RenewOutcome::Renewed) => {
                tracing::debug!("renewed {} session lease on channel {}", channel_type, channel_id)
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("sticky renewal failed for {} session: {}", channel_type, e),
        }

        Some(channel_id)
    }

    /// Bind a session to a channel. Failures are logged, never raised.
    pub async fn bind(&self, fingerprint: &str, channel_type: ChannelType, channel_id: ChannelId) {
        if let Err(e) = self
            .manager
            .set_mapping(fingerprint, channel_id, channel_type, self.settings.ttl)
            .await
        {
            tracing::warn!(
                "failed to bind {} session to channel {}: {}",
                channel_type,
                channel_id,
                e
            );
        }
    }

    /// Drop a session's binding, e.g. after its channel failed.
    pub async fn release(&self, fingerprint: &str, channel_type: ChannelType) {
        if let Err(e) = self.manager.delete_mapping(fingerprint, channel_type).await {
            tracing::warn!("failed to release {} session binding: {}", channel_type, e);
        }
    }

    /// Resolve the channel for a request.
    ///
    /// 1. An existing binding wins while `is_usable` accepts its channel
    /// 2. An unusable binding is released
    /// 3. Otherwise `select` picks a channel, which is then bound
    ///
    /// # Returns
    /// The chosen channel, or None if `select` found nothing
    pub async fn resolve<U, S>(
        &self,
        fingerprint: &str,
        channel_type: ChannelType,
        is_usable: U,
        select: S,
    ) -> Option<ChannelId>
    where
        U: Fn(ChannelId) -> bool,
        S: FnOnce() -> Option<ChannelId>,
    {
        if let Some(channel_id) = self.lookup(fingerprint, channel_type).await {
            if is_usable(channel_id) {
                tracing::debug!("using sticky channel {} for {} session", channel_id, channel_type);
                return Some(channel_id);
            }

            self.release(fingerprint, channel_type).await;
            tracing::debug!("released stale sticky channel {}", channel_id);
        }

        let channel_id = select()?;
        self.bind(fingerprint, channel_type, channel_id).await;
        Some(channel_id)
    }
}
