//! Backward-walk synchronization against a [`HeaderSource`].
//!
//! Starting from a remote tip, headers are fetched newest first in batches
//! until one of them is already indexed locally. That header is the common
//! ancestor; everything above it is re-linked onto the local chain, either
//! as an extension or as a reorganization.

use bitcoin::BlockHash;
use bitcoin::block::Header as BlockHeader;
use bitcoin::hashes::Hash;

use super::{SyncConfig, SyncOutcome};
use crate::chain::ChainStateStore;
use crate::error::{SyncError, SyncResult};
use crate::network::HeaderSource;
use crate::types::{ChainHeader, HEADER_SIZE, decode_header, decode_headers};

/// Headers collected by a walk, newest first, and the ancestor they sit on.
struct Walk {
    ancestor: ChainHeader,
    headers: Vec<BlockHeader>,
    requests: u32,
}

/// Drives sync passes with a fixed [`SyncConfig`].
#[derive(Debug, Clone, Default)]
pub struct HeaderSyncManager {
    config: SyncConfig,
}

impl HeaderSyncManager {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fetch the remote's best header and sync towards it.
    pub async fn sync_to_remote_best(
        &self,
        store: &ChainStateStore,
        source: &dyn HeaderSource,
    ) -> SyncResult<SyncOutcome> {
        let payload = source.fetch_best_header().await?;
        if payload.len() != HEADER_SIZE {
            return Err(SyncError::MalformedPayload {
                len: payload.len(),
                record: HEADER_SIZE,
            });
        }

        let best = decode_header(&payload)?;
        self.sync_from_remote_tip(store, source, best.block_hash()).await
    }

    /// Bring the local chain in line with the remote chain ending at
    /// `remote_tip`.
    pub async fn sync_from_remote_tip(
        &self,
        store: &ChainStateStore,
        source: &dyn HeaderSource,
        remote_tip: BlockHash,
    ) -> SyncResult<SyncOutcome> {
        if let Some(known) = store.get_main_chain_header(&remote_tip).await {
            tracing::debug!(
                "Remote tip {} already on the local chain at height {}",
                remote_tip,
                known.height
            );
            let tip = store.get_tip().await.unwrap_or(known);
            return Ok(SyncOutcome::AlreadySynced {
                tip,
            });
        }

        let Walk {
            ancestor,
            mut headers,
            requests,
        } = self.walk_back(store, source, remote_tip).await?;

        headers.reverse();
        let mut branch: Vec<ChainHeader> = Vec::with_capacity(headers.len());
        for header in headers {
            let next = branch.last().unwrap_or(&ancestor).child(header);
            branch.push(next);
        }

        let Some(new_tip) = branch.last().cloned() else {
            // The walk always stops strictly below the remote tip, which is unknown.
            return Err(SyncError::EmptyResponse(remote_tip));
        };
        let imported = branch.len();

        let old_tip = store.get_tip().await;
        match old_tip {
            Some(old_tip) if ancestor.height < old_tip.height => {
                if new_tip.chain_work < old_tip.chain_work {
                    tracing::warn!(
                        "Reorganizing to tip {} with less chainwork ({}) than current tip {} ({})",
                        new_tip.hash,
                        new_tip.chain_work,
                        old_tip.hash,
                        old_tip.chain_work
                    );
                }

                let orphaned = store.hashes_above(ancestor.height).await;
                let depth = orphaned.len() as u32;
                store.set_chain_tip_with_reorg(&branch, &ancestor, orphaned).await?;

                Ok(SyncOutcome::Reorganized {
                    new_tip,
                    depth,
                    imported,
                    requests,
                })
            }
            _ => {
                store.set_chain_tip(&branch).await?;
                tracing::info!(
                    "Extended chain by {} headers to {} at height {}",
                    imported,
                    new_tip.hash,
                    new_tip.height
                );

                Ok(SyncOutcome::Extended {
                    new_tip,
                    imported,
                    requests,
                })
            }
        }
    }

    async fn walk_back(
        &self,
        store: &ChainStateStore,
        source: &dyn HeaderSource,
        remote_tip: BlockHash,
    ) -> SyncResult<Walk> {
        let mut collected: Vec<BlockHeader> = Vec::new();
        let mut frontier = remote_tip;
        let mut requests = 0u32;

        loop {
            let payload = source.fetch_headers_backward(&frontier, self.config.batch_size).await?;
            requests += 1;

            if payload.is_empty() {
                return Err(SyncError::EmptyResponse(frontier));
            }
            if payload.len() % HEADER_SIZE != 0 {
                return Err(SyncError::MalformedPayload {
                    len: payload.len(),
                    record: HEADER_SIZE,
                });
            }

            let batch = decode_headers(&payload)?;
            let hashes: Vec<BlockHash> = batch.iter().map(|h| h.block_hash()).collect();

            if hashes[0] != frontier {
                return Err(SyncError::UnexpectedHeader {
                    expected: frontier,
                    got: hashes[0],
                });
            }
            for (child, parent_hash) in batch.iter().zip(hashes.iter().skip(1)) {
                if child.prev_blockhash != *parent_hash {
                    return Err(SyncError::BrokenLinkage {
                        child: child.block_hash(),
                        parent: child.prev_blockhash,
                    });
                }
            }

            tracing::debug!(
                "Fetched {} headers back from {} (request {})",
                batch.len(),
                frontier,
                requests
            );

            // Orphans still resolve by hash but are not ancestors: the walk
            // continues through them and re-applies them as part of the branch.
            if let Some((position, ancestor)) = store.first_on_main_chain(&hashes).await {
                collected.extend(batch.into_iter().take(position));
                return Ok(Walk {
                    ancestor,
                    headers: collected,
                    requests,
                });
            }

            let parent = batch[batch.len() - 1].prev_blockhash;
            collected.extend(batch);

            if let Some(ancestor) = store.get_main_chain_header(&parent).await {
                return Ok(Walk {
                    ancestor,
                    headers: collected,
                    requests,
                });
            }

            let exhausted = self
                .config
                .max_walk_headers
                .is_some_and(|max| collected.len() >= max as usize);
            if parent == BlockHash::all_zeros() || exhausted {
                return Err(SyncError::CommonAncestorNotFound {
                    remote_tip,
                    requests,
                });
            }

            frontier = parent;
        }
    }
}

/// [`HeaderSyncManager::sync_from_remote_tip`] with the default configuration.
pub async fn sync_from_remote_tip(
    store: &ChainStateStore,
    source: &dyn HeaderSource,
    remote_tip: BlockHash,
) -> SyncResult<SyncOutcome> {
    HeaderSyncManager::default().sync_from_remote_tip(store, source, remote_tip).await
}

/// [`HeaderSyncManager::sync_to_remote_best`] with the default configuration.
pub async fn sync_to_remote_best(
    store: &ChainStateStore,
    source: &dyn HeaderSource,
) -> SyncResult<SyncOutcome> {
    HeaderSyncManager::default().sync_to_remote_best(store, source).await
}
