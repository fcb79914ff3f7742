//! Persistence of the tracked header chain.
//!
//! Disk is a best-effort mirror of the in-memory chain state: the store
//! commits in memory first and hands branches to a [`HeaderStorage`]
//! afterwards.

pub mod disk;
pub mod manifest;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::ChainHeader;

pub use disk::{DiskHeaderStorage, HEADERS_PER_FILE};
pub use manifest::{Manifest, PartitionEntry};

/// Sink for branches committed by the chain state store.
#[async_trait]
pub trait HeaderStorage: Send + Sync {
    /// Persist `branch` (oldest first, consecutive heights).
    ///
    /// `anchor` is the header one below the first branch element, when the
    /// store knows it.
    async fn store_branch(
        &self,
        anchor: Option<&ChainHeader>,
        branch: &[ChainHeader],
    ) -> StorageResult<()>;
}
