//! Startup wiring for the affinity store.
//!
//! Decides once whether sticky sessions are enabled, connects the store
//! and verifies it answers before handing out an enabled manager.

use crate::adapters::outbound::{DashMapStore, RedisConfig, RedisStore};
use crate::config::{Config, StoreKind};
use crate::domain::ports::KeyValueStore;
use crate::domain::services::AffinityManager;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

/// Build the affinity manager described by `cfg`.
///
/// Returns a disabled manager when no store is configured. A malformed
/// connection string or a failed connectivity check is an error.
pub async fn connect_affinity(cfg: &Config) -> Result<AffinityManager> {
    match cfg.store {
        StoreKind::Memory => {
            let store = DashMapStore::new();
            store.start_gc(Duration::from_secs(cfg.gc_interval_secs.max(1)));
            tracing::info!("sticky sessions enabled (in-process store)");
            Ok(AffinityManager::new(Arc::new(store)))
        }
        StoreKind::Redis => {
            let Some(url) = cfg.redis_conn_string.as_deref() else {
                tracing::info!("REDIS_CONN_STRING not set, sticky sessions disabled");
                return Ok(AffinityManager::disabled());
            };
            if cfg.sync_frequency_secs == 0 {
                tracing::info!("SYNC_FREQUENCY not set, sticky sessions disabled");
                return Ok(AffinityManager::disabled());
            }

            let redis_cfg = RedisConfig::new(url)
                .db(cfg.redis_db)
                .op_timeout(cfg.redis_timeout());
            let store = RedisStore::connect(&redis_cfg).await?;
            store.ping().await.context("Redis ping test failed")?;

            tracing::info!("sticky sessions enabled (redis db={})", cfg.redis_db);
            Ok(AffinityManager::new(Arc::new(store)))
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::value_objects::{ChannelId, ChannelType};
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_redis_without_conn_string_is_disabled() {
        let cfg = Config::default();
        let manager = connect_affinity(&cfg).await.unwrap();

        assert!(!manager.is_enabled());
        assert!(logs_contain("REDIS_CONN_STRING not set"));
    }

    #[tokio::test]
    async fn test_zero_sync_frequency_is_disabled() {
        let cfg = Config {
            redis_conn_string: Some("redis://127.0.0.1:6379".to_string()),
            sync_frequency_secs: 0,
            ..Config::default()
        };
        let manager = connect_affinity(&cfg).await.unwrap();
        assert!(!manager.is_enabled());
    }

    #[tokio::test]
    async fn test_malformed_conn_string_is_error() {
        let cfg = Config {
            redis_conn_string: Some("::not-a-url::".to_string()),
            ..Config::default()
        };
        assert!(connect_affinity(&cfg).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_is_enabled() {
        let cfg = Config {
            store: StoreKind::Memory,
            ..Config::default()
        };
        let manager = connect_affinity(&cfg).await.unwrap();
        assert!(manager.is_enabled());

        let id = ChannelId::new(12).unwrap();
        manager
            .set_mapping("fp", id, ChannelType::Codex, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(
            manager.get_mapping("fp", ChannelType::Codex).await.unwrap(),
            Some(id)
        );
    }
}
