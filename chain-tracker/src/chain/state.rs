//! In-memory chain state: height index, hash index and current tip.
//!
//! All mutations go through [`ChainStateStore::set_chain_tip`] (or its reorg
//! and restore variants). The write lock is held only while the indices are
//! updated; event publication and persistence happen after it is released,
//! so readers are never blocked by disk I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bitcoin::BlockHash;
use tokio::sync::RwLock;

use super::events::{LatestReceiver, LatestSlot};
use crate::error::{ChainStateError, ChainStateResult};
use crate::storage::HeaderStorage;
use crate::types::{ChainHeader, ReorgEvent};

/// Default number of heights below the tip kept in the hash index.
pub const DEFAULT_RETENTION_DEPTH: u32 = 100;

/// Which hash-index entries are dropped once they fall more than the
/// retention depth below the tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PruneMode {
    /// Only headers displaced from the height index by a reorg.
    #[default]
    OrphansOnly,
    /// Every header, main chain included. Old heights then no longer resolve
    /// and a reorg deeper than the retention depth cannot find its ancestor.
    Depth,
}

#[derive(Debug, Default)]
struct ChainIndex {
    by_height: Vec<BlockHash>,
    by_hash: HashMap<BlockHash, ChainHeader>,
    tip: Option<ChainHeader>,
    /// Hashes in `by_hash` that are not on the height index.
    orphans: HashSet<BlockHash>,
    /// Heights below this were already pruned in `PruneMode::Depth`.
    pruned_floor: u32,
}

impl ChainIndex {
    fn header_at(&self, height: u32) -> Option<&ChainHeader> {
        self.by_height.get(height as usize).and_then(|hash| self.by_hash.get(hash))
    }

    /// `hash` resolved only if it sits on the height index.
    fn main_chain_header(&self, hash: &BlockHash) -> Option<&ChainHeader> {
        self.by_hash
            .get(hash)
            .filter(|header| self.by_height.get(header.height as usize) == Some(hash))
    }

    fn validate(&self, branch: &[ChainHeader]) -> ChainStateResult<()> {
        let first = branch[0].height;
        if first as usize > self.by_height.len() {
            return Err(ChainStateError::InvalidBranch(format!(
                "branch starts at height {} but the chain ends at {}",
                first,
                self.by_height.len()
            )));
        }

        if let Some(parent) = first.checked_sub(1).and_then(|h| self.by_height.get(h as usize)) {
            if branch[0].prev_hash() != *parent {
                return Err(ChainStateError::InvalidBranch(format!(
                    "header {} at height {} does not extend {}",
                    branch[0].hash, first, parent
                )));
            }
        }

        for pair in branch.windows(2) {
            if pair[1].height != pair[0].height + 1 {
                return Err(ChainStateError::InvalidBranch(format!(
                    "height {} follows height {}",
                    pair[1].height, pair[0].height
                )));
            }
            if pair[1].prev_hash() != pair[0].hash {
                return Err(ChainStateError::InvalidBranch(format!(
                    "header {} does not extend {}",
                    pair[1].hash, pair[0].hash
                )));
            }
        }

        Ok(())
    }

    fn apply(&mut self, branch: &[ChainHeader]) {
        for header in branch {
            let height = header.height as usize;
            if let Some(slot) = self.by_height.get_mut(height) {
                if *slot != header.hash {
                    self.orphans.insert(*slot);
                    *slot = header.hash;
                }
            } else {
                self.by_height.push(header.hash);
            }

            self.orphans.remove(&header.hash);
            self.by_hash.insert(header.hash, header.clone());
        }

        let tip = &branch[branch.len() - 1];
        let len = tip.height as usize + 1;
        if self.by_height.len() > len {
            self.orphans.extend(self.by_height.drain(len..));
        }

        self.pruned_floor = self.pruned_floor.min(branch[0].height);
        self.tip = Some(tip.clone());
    }

    fn prune(&mut self, retention_depth: u32, mode: PruneMode) {
        let Some(tip_height) = self.tip.as_ref().map(|tip| tip.height) else {
            return;
        };
        let threshold = tip_height.saturating_sub(retention_depth);
        if threshold == 0 {
            return;
        }

        let by_hash = &mut self.by_hash;
        self.orphans.retain(|hash| match by_hash.get(hash) {
            Some(header) if header.height < threshold => {
                by_hash.remove(hash);
                false
            }
            Some(_) => true,
            None => false,
        });

        if mode == PruneMode::Depth && self.pruned_floor < threshold {
            let end = (threshold as usize).min(self.by_height.len());
            for hash in &self.by_height[self.pruned_floor as usize..end] {
                by_hash.remove(hash);
            }
            self.pruned_floor = threshold;
        }
    }
}

/// Shared chain state with its event channels and persistence sink.
pub struct ChainStateStore {
    index: RwLock<ChainIndex>,
    storage: Option<Arc<dyn HeaderStorage>>,
    tip_events: LatestSlot<ChainHeader>,
    reorg_events: LatestSlot<ReorgEvent>,
    retention_depth: u32,
    prune_mode: PruneMode,
}

impl ChainStateStore {
    /// Create an empty, memory-only store.
    pub fn new(retention_depth: u32, prune_mode: PruneMode) -> Self {
        Self {
            index: RwLock::new(ChainIndex::default()),
            storage: None,
            tip_events: LatestSlot::new(),
            reorg_events: LatestSlot::new(),
            retention_depth,
            prune_mode,
        }
    }

    /// Mirror every committed branch to `storage`.
    pub fn with_storage(mut self, storage: Arc<dyn HeaderStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn retention_depth(&self) -> u32 {
        self.retention_depth
    }

    pub fn prune_mode(&self) -> PruneMode {
        self.prune_mode
    }

    pub async fn get_tip(&self) -> Option<ChainHeader> {
        self.index.read().await.tip.clone()
    }

    pub async fn height(&self) -> Option<u32> {
        self.index.read().await.tip.as_ref().map(|tip| tip.height)
    }

    pub async fn get_header_by_height(&self, height: u32) -> Option<ChainHeader> {
        self.index.read().await.header_at(height).cloned()
    }

    pub async fn get_header_by_hash(&self, hash: &BlockHash) -> Option<ChainHeader> {
        self.index.read().await.by_hash.get(hash).cloned()
    }

    pub async fn contains(&self, hash: &BlockHash) -> bool {
        self.index.read().await.by_hash.contains_key(hash)
    }

    /// Like [`get_header_by_hash`](Self::get_header_by_hash), but orphans
    /// (hashes displaced from the height index by a reorg) do not resolve.
    pub async fn get_main_chain_header(&self, hash: &BlockHash) -> Option<ChainHeader> {
        self.index.read().await.main_chain_header(hash).cloned()
    }

    /// First of `hashes` on the height index, with its position, checked
    /// under a single read lock.
    pub async fn first_on_main_chain(&self, hashes: &[BlockHash]) -> Option<(usize, ChainHeader)> {
        let index = self.index.read().await;
        hashes
            .iter()
            .enumerate()
            .find_map(|(i, hash)| index.main_chain_header(hash).map(|header| (i, header.clone())))
    }

    /// Hashes on the height index strictly above `height`, highest first.
    pub async fn hashes_above(&self, height: u32) -> Vec<BlockHash> {
        let index = self.index.read().await;
        let start = (height as usize + 1).min(index.by_height.len());
        index.by_height[start..].iter().rev().copied().collect()
    }

    /// Number of entries in the height index.
    pub async fn height_index_len(&self) -> usize {
        self.index.read().await.by_height.len()
    }

    /// Number of entries in the hash index.
    pub async fn hash_index_len(&self) -> usize {
        self.index.read().await.by_hash.len()
    }

    pub fn subscribe_tip(&self) -> LatestReceiver<ChainHeader> {
        self.tip_events.subscribe()
    }

    pub fn subscribe_reorg(&self) -> LatestReceiver<ReorgEvent> {
        self.reorg_events.subscribe()
    }

    /// Make the last element of `branch` the new tip.
    ///
    /// An empty branch is a no-op. A persistence error is returned after the
    /// in-memory update and the tip event have already taken effect.
    pub async fn set_chain_tip(&self, branch: &[ChainHeader]) -> ChainStateResult<()> {
        let Some((_, anchor)) = self.commit(branch).await? else {
            return Ok(());
        };
        self.persist(anchor.as_ref(), branch).await
    }

    /// Like [`set_chain_tip`](Self::set_chain_tip), and publish a reorg event
    /// for the replaced hashes.
    pub async fn set_chain_tip_with_reorg(
        &self,
        branch: &[ChainHeader],
        common_ancestor: &ChainHeader,
        orphaned: Vec<BlockHash>,
    ) -> ChainStateResult<()> {
        let Some((new_tip, anchor)) = self.commit(branch).await? else {
            return Ok(());
        };

        let event = ReorgEvent {
            depth: orphaned.len() as u32,
            orphaned,
            new_tip,
            common_ancestor: common_ancestor.clone(),
        };

        tracing::info!(
            "Chain reorganization: depth {} from ancestor {} (height {}) to tip {} (height {})",
            event.depth,
            event.common_ancestor.hash,
            event.common_ancestor.height,
            event.new_tip.hash,
            event.new_tip.height
        );

        self.reorg_events.publish(event);
        self.persist(anchor.as_ref(), branch).await
    }

    /// Import a branch read back from storage without writing it again.
    pub async fn restore_branch(&self, branch: &[ChainHeader]) -> ChainStateResult<()> {
        self.commit(branch).await.map(|_| ())
    }

    /// Apply `branch` under the write lock, then publish the new tip.
    ///
    /// Returns the new tip and the header just below the branch.
    async fn commit(
        &self,
        branch: &[ChainHeader],
    ) -> ChainStateResult<Option<(ChainHeader, Option<ChainHeader>)>> {
        if branch.is_empty() {
            return Ok(None);
        }

        let (tip, anchor) = {
            let mut index = self.index.write().await;
            index.validate(branch)?;

            let anchor = branch[0].height.checked_sub(1).and_then(|h| index.header_at(h)).cloned();

            index.apply(branch);
            index.prune(self.retention_depth, self.prune_mode);

            (branch[branch.len() - 1].clone(), anchor)
        };

        tracing::debug!(
            "Chain tip set to {} at height {} ({} headers applied)",
            tip.hash,
            tip.height,
            branch.len()
        );

        self.tip_events.publish(tip.clone());

        Ok(Some((tip, anchor)))
    }

    async fn persist(
        &self,
        anchor: Option<&ChainHeader>,
        branch: &[ChainHeader],
    ) -> ChainStateResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        storage.store_branch(anchor, branch).await.map_err(|e| {
            tracing::warn!("Failed to persist {} headers: {}", branch.len(), e);
            ChainStateError::Persistence(e)
        })
    }
}

impl Default for ChainStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_DEPTH, PruneMode::default())
    }
}

impl std::fmt::Debug for ChainStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStateStore")
            .field("has_storage", &self.storage.is_some())
            .field("retention_depth", &self.retention_depth)
            .field("prune_mode", &self.prune_mode)
            .finish_non_exhaustive()
    }
}
