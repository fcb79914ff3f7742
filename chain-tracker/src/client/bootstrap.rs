//! Restoring the chain state from disk, or seeding it with genesis.

use bitcoin::Network;

use crate::chain::ChainStateStore;
use crate::error::{Result, StorageError};
use crate::storage::{DiskHeaderStorage, Manifest};
use crate::types::{ChainHeader, NetworkExt};

/// Populate an empty `store` and return its tip.
///
/// With no storage, or nothing persisted yet, the network genesis becomes
/// the tip (and is written out when storage is present). Otherwise the
/// partitions listed in the manifest are read back in height order, stopping
/// at the first one that is missing or does not continue the chain.
pub async fn bootstrap(
    store: &ChainStateStore,
    storage: Option<&DiskHeaderStorage>,
    network: Network,
) -> Result<ChainHeader> {
    if let Some(storage) = storage {
        if let Some(manifest) = storage.load_manifest().await? {
            if let Some(tip) = restore(store, storage, &manifest).await? {
                return Ok(tip);
            }
            tracing::warn!("Manifest at {} lists no headers", storage.manifest_path().display());
        }
    }

    seed_genesis(store, network).await
}

async fn seed_genesis(store: &ChainStateStore, network: Network) -> Result<ChainHeader> {
    let genesis = ChainHeader::genesis(network.genesis_header());
    tracing::info!("Starting from network genesis: {}", genesis.hash);
    store.set_chain_tip(std::slice::from_ref(&genesis)).await?;
    Ok(genesis)
}

async fn restore(
    store: &ChainStateStore,
    storage: &DiskHeaderStorage,
    manifest: &Manifest,
) -> Result<Option<ChainHeader>> {
    if manifest.headers_per_file != storage.headers_per_file() {
        return Err(StorageError::InconsistentState(format!(
            "manifest uses {} headers per file, storage is configured for {}",
            manifest.headers_per_file,
            storage.headers_per_file()
        ))
        .into());
    }

    let mut previous: Option<ChainHeader> = None;

    'partitions: for entry in manifest.files.iter().filter(|entry| entry.count > 0) {
        let records = match storage.read_partition(entry).await {
            Ok(records) => records,
            Err(StorageError::Io {
                path,
                source,
            }) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "{} is missing, restoring only up to height {:?}",
                    path,
                    previous.as_ref().map(|prev| prev.height)
                );
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if records.len() != entry.count as usize {
            tracing::warn!(
                "{}: manifest lists {} headers but the file holds {}",
                entry.file_name,
                entry.count,
                records.len()
            );
        }
        let take = records.len().min(entry.count as usize);

        let mut branch = Vec::with_capacity(take);
        for (slot, header) in records.into_iter().take(take).enumerate() {
            let height = entry.first_height + slot as u32;
            let record = match &previous {
                Some(prev) if prev.height + 1 == height => prev.child(header),
                Some(prev) => {
                    tracing::warn!(
                        "{} starts at height {} but the restored chain ends at {}",
                        entry.file_name,
                        height,
                        prev.height
                    );
                    break 'partitions;
                }
                None if height == 0 => ChainHeader::genesis(header),
                None => {
                    return Err(StorageError::InconsistentState(format!(
                        "{} starts at height {} with no lower partition to seed its chainwork",
                        entry.file_name, height
                    ))
                    .into());
                }
            };

            previous = Some(record.clone());
            branch.push(record);
        }

        store.restore_branch(&branch).await?;
        tracing::debug!("Restored {} headers from {}", branch.len(), entry.file_name);
    }

    let Some(tip) = previous else {
        return Ok(None);
    };

    let recorded = manifest
        .files
        .iter()
        .rev()
        .find(|entry| entry.count > 0)
        .map(|entry| entry.last_block_hash())
        .transpose()?
        .flatten();
    if recorded.is_some_and(|hash| hash != tip.hash) {
        tracing::warn!(
            "Restored tip {} at height {} differs from the manifest's last hash",
            tip.hash,
            tip.height
        );
    }

    tracing::info!("Restored chain from disk: tip {} at height {}", tip.hash, tip.height);
    Ok(Some(tip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChainTrackerError;
    use crate::storage::HeaderStorage;
    use crate::test_utils::build_chain;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_seeds_genesis_without_storage() {
        let store = ChainStateStore::default();
        let tip = bootstrap(&store, None, Network::Regtest).await.unwrap();

        assert_eq!(tip.height, 0);
        assert!(tip.chain_work.is_zero());
        assert_eq!(tip.hash, Network::Regtest.genesis_header().block_hash());
        assert_eq!(store.get_tip().await, Some(tip));
    }

    #[tokio::test]
    async fn test_seeds_and_persists_genesis() {
        let dir = TempDir::new().unwrap();
        let storage = std::sync::Arc::new(
            DiskHeaderStorage::new(dir.path(), Network::Regtest, 10).await.unwrap(),
        );
        let store = ChainStateStore::default().with_storage(storage.clone());

        bootstrap(&store, Some(storage.as_ref()), Network::Regtest).await.unwrap();

        let manifest = storage.load_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.tip_height(), Some(0));
    }

    #[tokio::test]
    async fn test_restores_across_partitions() {
        let dir = TempDir::new().unwrap();
        let storage = DiskHeaderStorage::new(dir.path(), Network::Regtest, 10).await.unwrap();
        let chain = build_chain(Network::Regtest, 25, 0);
        storage.store_branch(None, &chain).await.unwrap();

        let store = ChainStateStore::default();
        let tip = bootstrap(&store, Some(&storage), Network::Regtest).await.unwrap();

        assert_eq!(tip, chain[24]);
        for header in &chain {
            assert_eq!(store.get_header_by_height(header.height).await.as_ref(), Some(header));
        }
    }

    #[tokio::test]
    async fn test_restore_does_not_rewrite_files() {
        let dir = TempDir::new().unwrap();
        let storage = std::sync::Arc::new(
            DiskHeaderStorage::new(dir.path(), Network::Regtest, 10).await.unwrap(),
        );
        let chain = build_chain(Network::Regtest, 5, 0);
        storage.store_branch(None, &chain).await.unwrap();

        let before = std::fs::metadata(storage.manifest_path()).unwrap().modified().unwrap();
        let store = ChainStateStore::default().with_storage(storage.clone());
        bootstrap(&store, Some(storage.as_ref()), Network::Regtest).await.unwrap();
        let after = std::fs::metadata(storage.manifest_path()).unwrap().modified().unwrap();

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_restore_stops_at_missing_partition() {
        let dir = TempDir::new().unwrap();
        let storage = DiskHeaderStorage::new(dir.path(), Network::Regtest, 16).await.unwrap();
        let chain = build_chain(Network::Regtest, 50, 0);
        storage.store_branch(None, &chain).await.unwrap();
        std::fs::remove_file(storage.partition_path(3)).unwrap();

        let store = ChainStateStore::default();
        let tip = bootstrap(&store, Some(&storage), Network::Regtest).await.unwrap();

        assert_eq!(tip, chain[47]);
        assert_eq!(store.get_tip().await, Some(chain[47].clone()));
        assert!(store.get_header_by_height(48).await.is_none());
    }

    #[tokio::test]
    async fn test_restore_ignores_partitions_above_a_gap() {
        let dir = TempDir::new().unwrap();
        let storage = DiskHeaderStorage::new(dir.path(), Network::Regtest, 16).await.unwrap();
        let chain = build_chain(Network::Regtest, 50, 0);
        storage.store_branch(None, &chain).await.unwrap();
        std::fs::remove_file(storage.partition_path(1)).unwrap();

        let store = ChainStateStore::default();
        let tip = bootstrap(&store, Some(&storage), Network::Regtest).await.unwrap();

        assert_eq!(tip, chain[15]);
        assert_eq!(store.height_index_len().await, 16);
        assert!(!store.contains(&chain[32].hash).await);
    }

    #[tokio::test]
    async fn test_restore_without_lowest_partition_fails() {
        let dir = TempDir::new().unwrap();
        let storage = DiskHeaderStorage::new(dir.path(), Network::Regtest, 10).await.unwrap();
        storage.store_branch(None, &build_chain(Network::Regtest, 25, 0)).await.unwrap();

        let mut manifest = storage.load_manifest().await.unwrap().unwrap();
        manifest.files[0].count = 0;
        std::fs::write(storage.manifest_path(), serde_json::to_string_pretty(&manifest).unwrap())
            .unwrap();

        let store = ChainStateStore::default();
        let err = bootstrap(&store, Some(&storage), Network::Regtest).await.unwrap_err();
        assert!(matches!(err, ChainTrackerError::Storage(StorageError::InconsistentState(_))));
        assert!(store.get_tip().await.is_none());
    }

    #[tokio::test]
    async fn test_partition_size_mismatch() {
        let dir = TempDir::new().unwrap();
        let writer = DiskHeaderStorage::new(dir.path(), Network::Regtest, 10).await.unwrap();
        writer.store_branch(None, &build_chain(Network::Regtest, 3, 0)).await.unwrap();

        let reader = DiskHeaderStorage::new(dir.path(), Network::Regtest, 20).await.unwrap();
        let err = bootstrap(&ChainStateStore::default(), Some(&reader), Network::Regtest)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainTrackerError::Storage(StorageError::InconsistentState(_))));
    }
}
