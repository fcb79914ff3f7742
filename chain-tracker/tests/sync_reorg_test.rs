//! End-to-end sync tests against an in-memory header source.

use std::time::Duration;

use chain_tracker::sync::{HeaderSyncManager, SyncConfig};
use chain_tracker::test_utils::{MockHeaderSource, build_chain, extend_chain};
use chain_tracker::{ChainTracker, ChainWork, Config, Network, SyncError, SyncOutcome};
use tempfile::TempDir;

#[tokio::test]
async fn test_reorg_event_and_tip_event() {
    let tracker = ChainTracker::new(Config::regtest().without_persistence()).await.unwrap();
    let chain = build_chain(Network::Regtest, 60, 0);
    tracker.store().set_chain_tip(&chain[1..]).await.unwrap();

    let mut tips = tracker.subscribe_tip();
    let mut reorgs = tracker.subscribe_reorg();

    let fork = extend_chain(&chain[45], 20, 2);
    let source = MockHeaderSource::new(&chain[..46]);
    source.add_headers(&fork);

    let outcome = tracker.sync(&source).await.unwrap();
    match outcome {
        SyncOutcome::Reorganized {
            depth,
            imported,
            ..
        } => {
            assert_eq!(depth, 59 - 45);
            assert_eq!(imported, 20);
        }
        other => panic!("expected a reorg, got {:?}", other),
    }

    let tip = tokio::time::timeout(Duration::from_secs(1), tips.recv()).await.unwrap().unwrap();
    assert_eq!(tip.hash, fork[19].hash);
    assert_eq!(tip.chain_work, ChainWork::from(2 * 65u64));

    let event = reorgs.try_recv().unwrap();
    assert_eq!(event.orphaned.len(), 14);
    assert!(event.orphaned.contains(&chain[59].hash));
    assert!(!event.orphaned.contains(&chain[45].hash));
    assert!(reorgs.try_recv().is_none());
}

#[tokio::test]
async fn test_sync_from_genesis_in_batches() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::regtest()
        .with_storage_path(temp_dir.path())
        .with_headers_per_file(100)
        .with_sync_batch_size(50);
    let tracker = ChainTracker::new(config.clone()).await.unwrap();

    let chain = build_chain(Network::Regtest, 321, 0);
    let source = MockHeaderSource::new(&chain);

    let outcome = tracker.sync(&source).await.unwrap();
    assert_eq!(outcome.requests(), 7);
    assert_eq!(tracker.tip().await.unwrap(), chain[320]);

    let second = tracker.sync(&source).await.unwrap();
    assert!(matches!(second, SyncOutcome::AlreadySynced { .. }));
    drop(tracker);

    let restarted = ChainTracker::new(config).await.unwrap();
    assert_eq!(restarted.tip().await.unwrap(), chain[320]);
}

#[tokio::test]
async fn test_network_failure_leaves_state_untouched() {
    let tracker = ChainTracker::new(Config::regtest().without_persistence()).await.unwrap();
    let chain = build_chain(Network::Regtest, 10, 0);
    let source = MockHeaderSource::new(&chain);
    source.set_failing(true);

    let manager = HeaderSyncManager::new(SyncConfig::default());
    let err = manager.sync_to_remote_best(&tracker.store(), &source).await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(err.category(), "network");
    assert_eq!(tracker.tip().await.unwrap().height, 0);

    source.set_failing(false);
    let outcome = tracker.sync(&source).await.unwrap();
    assert_eq!(outcome.tip().height, 9);
}
