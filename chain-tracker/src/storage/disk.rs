//! Partitioned header files on disk.
//!
//! Each partition file holds up to `headers_per_file` consecutive raw headers
//! at fixed offsets, so any height can be rewritten in place.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bitcoin::Network;
use bitcoin::block::Header as BlockHeader;
use bitcoin::hashes::{Hash, sha256};

use crate::error::{StorageError, StorageResult};
use crate::storage::HeaderStorage;
use crate::storage::manifest::{Manifest, PartitionEntry, manifest_file_name, partition_file_name};
use crate::types::{ChainHeader, HEADER_SIZE, NetworkExt, decode_header};

/// Default number of headers per partition file.
pub const HEADERS_PER_FILE: u32 = 100_000;

/// Header storage backed by partition files and a JSON manifest.
#[derive(Debug, Clone)]
pub struct DiskHeaderStorage {
    layout: PartitionLayout,
}

impl DiskHeaderStorage {
    /// Open (creating the directory if needed) the storage under `root`.
    pub async fn new(
        root: impl Into<PathBuf>,
        network: Network,
        headers_per_file: u32,
    ) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| StorageError::io(&root, e))?;

        Ok(Self {
            layout: PartitionLayout {
                root,
                prefix: network.file_prefix(),
                headers_per_file,
            },
        })
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    pub fn headers_per_file(&self) -> u32 {
        self.layout.headers_per_file
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.layout.manifest_path()
    }

    pub fn partition_path(&self, index: u32) -> PathBuf {
        self.layout.partition_path(index)
    }

    /// Load the manifest, or `None` when nothing was persisted yet.
    pub async fn load_manifest(&self) -> StorageResult<Option<Manifest>> {
        let layout = self.layout.clone();
        run_blocking(move || layout.read_manifest()).await
    }

    /// Read every record of a partition file.
    pub async fn read_partition(&self, entry: &PartitionEntry) -> StorageResult<Vec<BlockHeader>> {
        let layout = self.layout.clone();
        let entry = entry.clone();
        run_blocking(move || layout.read_partition(&entry)).await
    }
}

#[async_trait]
impl HeaderStorage for DiskHeaderStorage {
    async fn store_branch(
        &self,
        anchor: Option<&ChainHeader>,
        branch: &[ChainHeader],
    ) -> StorageResult<()> {
        if branch.is_empty() {
            return Ok(());
        }

        let layout = self.layout.clone();
        let anchor = anchor.cloned();
        let branch = branch.to_vec();

        run_blocking(move || {
            layout.write_records(&branch)?;
            layout.update_manifest(anchor.as_ref(), &branch)?;
            // Only after the manifest stops listing them.
            layout.remove_stale(&branch)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| StorageError::TaskJoin(e.to_string()))?
}

#[derive(Debug, Clone)]
struct PartitionLayout {
    root: PathBuf,
    prefix: &'static str,
    headers_per_file: u32,
}

impl PartitionLayout {
    fn partition_of(&self, height: u32) -> u32 {
        height / self.headers_per_file
    }

    fn byte_offset(&self, height: u32) -> u64 {
        u64::from(height % self.headers_per_file) * HEADER_SIZE as u64
    }

    fn partition_path(&self, index: u32) -> PathBuf {
        self.root.join(partition_file_name(self.prefix, index))
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(manifest_file_name(self.prefix))
    }

    fn write_records(&self, branch: &[ChainHeader]) -> StorageResult<()> {
        let Some(tip) = branch.last() else {
            return Ok(());
        };
        let tip_partition = self.partition_of(tip.height);

        let mut groups: BTreeMap<u32, Vec<&ChainHeader>> = BTreeMap::new();
        for header in branch {
            groups.entry(self.partition_of(header.height)).or_default().push(header);
        }

        for (partition, headers) in groups {
            let path = self.partition_path(partition);
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| StorageError::io(&path, e))?;

            for header in &headers {
                file.seek(SeekFrom::Start(self.byte_offset(header.height)))
                    .map_err(|e| StorageError::io(&path, e))?;
                file.write_all(&header.to_bytes()).map_err(|e| StorageError::io(&path, e))?;
            }

            // Drop slots left over from a longer chain.
            if partition == tip_partition {
                let end = self.byte_offset(tip.height) + HEADER_SIZE as u64;
                file.set_len(end).map_err(|e| StorageError::io(&path, e))?;
            }

            file.flush().map_err(|e| StorageError::io(&path, e))?;

            tracing::debug!(
                "Wrote {} headers to {} (heights {}..={})",
                headers.len(),
                path.display(),
                headers[0].height,
                headers[headers.len() - 1].height
            );
        }

        Ok(())
    }

    /// Delete partition files above the one holding the branch tip.
    fn remove_stale(&self, branch: &[ChainHeader]) -> StorageResult<()> {
        let Some(tip) = branch.last() else {
            return Ok(());
        };

        let mut stale = self.partition_of(tip.height) + 1;
        loop {
            let path = self.partition_path(stale);
            if !path.exists() {
                break;
            }
            fs::remove_file(&path).map_err(|e| StorageError::io(&path, e))?;
            tracing::debug!("Removed stale partition {}", path.display());
            stale += 1;
        }

        Ok(())
    }

    fn update_manifest(
        &self,
        anchor: Option<&ChainHeader>,
        branch: &[ChainHeader],
    ) -> StorageResult<()> {
        let Some(tip) = branch.last() else {
            return Ok(());
        };

        let mut manifest = match self.read_manifest()? {
            Some(manifest) => manifest,
            None => Manifest::new(
                self.root.display().to_string(),
                self.prefix,
                self.headers_per_file,
            ),
        };

        if manifest.headers_per_file != self.headers_per_file {
            return Err(StorageError::InconsistentState(format!(
                "manifest uses {} headers per file, storage uses {}",
                manifest.headers_per_file, self.headers_per_file
            )));
        }

        manifest.resize_through(self.partition_of(tip.height), self.prefix);

        for (i, header) in branch.iter().enumerate() {
            let is_tip = i + 1 == branch.len();
            let ends_partition = (header.height + 1) % self.headers_per_file == 0;
            if !is_tip && !ends_partition {
                continue;
            }

            let prev = if i > 0 {
                Some(&branch[i - 1])
            } else {
                anchor
            };

            let partition = self.partition_of(header.height);
            let entry = &mut manifest.files[partition as usize];
            entry.set_last(header, prev);
            entry.file_hash = if entry.count == self.headers_per_file {
                Some(self.file_hash(partition)?)
            } else {
                None
            };
        }

        let json = serde_json::to_string_pretty(&manifest)?;
        let path = self.manifest_path();
        fs::write(&path, json).map_err(|e| StorageError::io(&path, e))?;

        Ok(())
    }

    fn read_manifest(&self) -> StorageResult<Option<Manifest>> {
        let path = self.manifest_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        Ok(Some(serde_json::from_str(&content)?))
    }

    fn read_partition(&self, entry: &PartitionEntry) -> StorageResult<Vec<BlockHeader>> {
        let path = self.root.join(&entry.file_name);
        let data = fs::read(&path).map_err(|e| StorageError::io(&path, e))?;

        if data.len() % HEADER_SIZE != 0 {
            return Err(StorageError::Corruption(format!(
                "{} has {} bytes, not a multiple of {}",
                path.display(),
                data.len(),
                HEADER_SIZE
            )));
        }

        if let Some(expected) = &entry.file_hash {
            let actual = sha256::Hash::hash(&data).to_string();
            if &actual != expected {
                return Err(StorageError::Corruption(format!(
                    "{} hash mismatch: manifest {}, file {}",
                    path.display(),
                    expected,
                    actual
                )));
            }
        }

        data.chunks_exact(HEADER_SIZE)
            .enumerate()
            .map(|(slot, record)| {
                decode_header(record).map_err(|e| {
                    StorageError::Corruption(format!(
                        "{} slot {}: {}",
                        path.display(),
                        slot,
                        e
                    ))
                })
            })
            .collect()
    }

    fn file_hash(&self, partition: u32) -> StorageResult<String> {
        let path = self.partition_path(partition);
        let data = fs::read(&path).map_err(|e| StorageError::io(&path, e))?;
        Ok(sha256::Hash::hash(&data).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::build_chain;
    use tempfile::TempDir;

    async fn storage(dir: &TempDir, per_file: u32) -> DiskHeaderStorage {
        DiskHeaderStorage::new(dir.path(), Network::Regtest, per_file).await.unwrap()
    }

    #[tokio::test]
    async fn test_records_land_at_fixed_offsets() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10).await;
        let chain = build_chain(Network::Regtest, 25, 0);

        storage.store_branch(None, &chain).await.unwrap();

        let manifest = storage.load_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.files.len(), 3);
        assert_eq!(manifest.files[0].count, 10);
        assert_eq!(manifest.files[1].count, 10);
        assert_eq!(manifest.files[2].count, 5);
        assert_eq!(manifest.tip_height(), Some(24));
        assert!(manifest.files[0].file_hash.is_some());
        assert!(manifest.files[2].file_hash.is_none());

        let second = storage.read_partition(&manifest.files[1]).await.unwrap();
        assert_eq!(second.len(), 10);
        assert_eq!(second[3].block_hash(), chain[13].hash);

        let len = std::fs::metadata(storage.partition_path(2)).unwrap().len();
        assert_eq!(len, 5 * HEADER_SIZE as u64);
    }

    #[tokio::test]
    async fn test_manifest_tracks_header_below_tip() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10).await;
        let chain = build_chain(Network::Regtest, 14, 0);

        storage.store_branch(None, &chain[..13]).await.unwrap();
        storage.store_branch(Some(&chain[12]), &chain[13..]).await.unwrap();

        let manifest = storage.load_manifest().await.unwrap().unwrap();
        let last = &manifest.files[1];
        assert_eq!(last.count, 4);
        assert_eq!(last.last_block_hash().unwrap(), Some(chain[13].hash));
        assert_eq!(last.prev_block_hash().unwrap(), Some(chain[12].hash));
        assert_eq!(last.last_chain_work.as_ref(), Some(&chain[13].chain_work));
        assert_eq!(last.prev_chain_work.as_ref(), Some(&chain[12].chain_work));

        let first = &manifest.files[0];
        assert_eq!(first.last_block_hash().unwrap(), Some(chain[9].hash));
        assert_eq!(first.prev_block_hash().unwrap(), Some(chain[8].hash));
    }

    #[tokio::test]
    async fn test_shorter_branch_truncates_files() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10).await;
        let chain = build_chain(Network::Regtest, 25, 0);
        storage.store_branch(None, &chain).await.unwrap();

        let fork = crate::test_utils::extend_chain(&chain[7], 2, 9);
        storage.store_branch(Some(&chain[7]), &fork).await.unwrap();

        let manifest = storage.load_manifest().await.unwrap().unwrap();
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.tip_height(), Some(9));
        assert!(!storage.partition_path(1).exists());
        assert!(!storage.partition_path(2).exists());

        let headers = storage.read_partition(&manifest.files[0]).await.unwrap();
        assert_eq!(headers.len(), 10);
        assert_eq!(headers[9].block_hash(), fork[1].hash);
    }

    #[tokio::test]
    async fn test_failed_manifest_write_keeps_listed_partitions() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10).await;
        let chain = build_chain(Network::Regtest, 25, 0);
        storage.store_branch(None, &chain).await.unwrap();

        // A directory in place of the manifest makes the manifest update fail.
        std::fs::remove_file(storage.manifest_path()).unwrap();
        std::fs::create_dir(storage.manifest_path()).unwrap();

        let fork = crate::test_utils::extend_chain(&chain[7], 2, 9);
        let err = storage.store_branch(Some(&chain[7]), &fork).await.unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
        assert!(storage.partition_path(1).exists());
        assert!(storage.partition_path(2).exists());
    }

    #[tokio::test]
    async fn test_read_rejects_partial_records() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10).await;
        let chain = build_chain(Network::Regtest, 3, 0);
        storage.store_branch(None, &chain).await.unwrap();

        let path = storage.partition_path(0);
        let mut data = std::fs::read(&path).unwrap();
        data.push(0xab);
        std::fs::write(&path, data).unwrap();

        let manifest = storage.load_manifest().await.unwrap().unwrap();
        let err = storage.read_partition(&manifest.files[0]).await.unwrap_err();
        assert!(matches!(err, StorageError::Corruption(_)));
    }

    #[tokio::test]
    async fn test_read_detects_hash_mismatch() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 4).await;
        let chain = build_chain(Network::Regtest, 6, 0);
        storage.store_branch(None, &chain).await.unwrap();

        let path = storage.partition_path(0);
        let mut data = std::fs::read(&path).unwrap();
        data[HEADER_SIZE + 70] ^= 0xff;
        std::fs::write(&path, data).unwrap();

        let manifest = storage.load_manifest().await.unwrap().unwrap();
        let err = storage.read_partition(&manifest.files[0]).await.unwrap_err();
        assert!(err.to_string().contains("hash mismatch"));
    }

    #[tokio::test]
    async fn test_missing_manifest_is_none() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir, 10).await;
        assert!(storage.load_manifest().await.unwrap().is_none());
    }
}
