//! High-level client API for the chain tracker.

pub mod bootstrap;
pub mod config;


use std::sync::Arc;

use crate::chain::{ChainStateStore, LatestReceiver};
use crate::error::{ChainTrackerError, Result};
use crate::network::{HeaderSource, HttpHeaderSource};
use crate::storage::DiskHeaderStorage;
use crate::sync::{HeaderSyncManager, SyncOutcome};
use crate::types::{ChainHeader, ReorgEvent};

pub use bootstrap::bootstrap;
pub use config::Config;

/// Tracks one network's header chain: restores it on start, keeps it in
/// memory and mirrors it to disk, and syncs it against a remote source.
pub struct ChainTracker {
    config: Config,
    store: Arc<ChainStateStore>,
    sync_manager: HeaderSyncManager,
    remote: Option<HttpHeaderSource>,
}

impl std::fmt::Debug for ChainTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainTracker")
            .field("config", &self.config)
            .field("sync_manager", &self.sync_manager)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl ChainTracker {
    /// Create a tracker and restore (or seed) its chain state.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate().map_err(ChainTrackerError::Config)?;

        let mut store = ChainStateStore::new(config.retention_depth, config.prune_mode);
        let storage = if config.persist {
            let storage = Arc::new(
                DiskHeaderStorage::new(
                    &config.storage_path,
                    config.network,
                    config.headers_per_file,
                )
                .await?,
            );
            store = store.with_storage(storage.clone());
            Some(storage)
        } else {
            None
        };

        let tip = bootstrap(&store, storage.as_deref(), config.network).await?;
        tracing::info!("Chain tracker ready at height {} ({})", tip.height, tip.hash);

        let remote = match &config.remote_url {
            Some(url) => Some(HttpHeaderSource::new(url.clone(), config.request_timeout)?),
            None => None,
        };

        Ok(Self {
            sync_manager: HeaderSyncManager::new(config.sync_config()),
            config,
            store: Arc::new(store),
            remote,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the chain state.
    pub fn store(&self) -> Arc<ChainStateStore> {
        self.store.clone()
    }

    pub async fn tip(&self) -> Option<ChainHeader> {
        self.store.get_tip().await
    }

    pub fn subscribe_tip(&self) -> LatestReceiver<ChainHeader> {
        self.store.subscribe_tip()
    }

    pub fn subscribe_reorg(&self) -> LatestReceiver<ReorgEvent> {
        self.store.subscribe_reorg()
    }

    /// Run one sync pass against `source`.
    pub async fn sync(&self, source: &dyn HeaderSource) -> Result<SyncOutcome> {
        Ok(self.sync_manager.sync_to_remote_best(&self.store, source).await?)
    }

    /// Run one sync pass against the configured remote URL.
    pub async fn sync_remote(&self) -> Result<SyncOutcome> {
        self.config.require_remote_url().map_err(ChainTrackerError::Config)?;
        match &self.remote {
            Some(remote) => self.sync(remote).await,
            None => Err(ChainTrackerError::Config("remote source was not initialized".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHeaderSource, build_chain, extend_chain};
    use assert_matches::assert_matches;
    use bitcoin::Network;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_only_tracker() {
        let tracker = ChainTracker::new(Config::regtest().without_persistence()).await.unwrap();
        assert_eq!(tracker.tip().await.unwrap().height, 0);

        let err = tracker.sync_remote().await.unwrap_err();
        assert_matches!(err, ChainTrackerError::Config(_));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = Config::regtest().without_persistence().with_sync_batch_size(0);
        assert_matches!(ChainTracker::new(config).await, Err(ChainTrackerError::Config(_)));
    }

    #[tokio::test]
    async fn test_sync_then_restart() {
        let dir = TempDir::new().unwrap();
        let config =
            Config::regtest().with_storage_path(dir.path()).with_headers_per_file(8);

        let chain = build_chain(Network::Regtest, 30, 0);
        let source = MockHeaderSource::new(&chain);

        {
            let tracker = ChainTracker::new(config.clone()).await.unwrap();
            let mut tips = tracker.subscribe_tip();
            let outcome = tracker.sync(&source).await.unwrap();
            assert_matches!(outcome, SyncOutcome::Extended { imported: 29, .. });
            assert_eq!(tips.try_recv().unwrap(), chain[29]);
        }

        let fork = extend_chain(&chain[20], 12, 3);
        source.add_headers(&fork);

        let tracker = ChainTracker::new(config.clone()).await.unwrap();
        assert_eq!(tracker.tip().await.unwrap(), chain[29]);

        let outcome = tracker.sync(&source).await.unwrap();
        assert_matches!(outcome, SyncOutcome::Reorganized { depth: 9, .. });
        drop(tracker);

        let tracker = ChainTracker::new(config).await.unwrap();
        assert_eq!(tracker.tip().await.unwrap(), fork[11]);
        assert_eq!(tracker.store().height_index_len().await, 33);
    }
}
