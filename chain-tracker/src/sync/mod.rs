//! Synchronization of the local chain against a remote header source.

pub mod remote;

use crate::network::MAX_HEADERS_PER_REQUEST;
use crate::types::ChainHeader;

pub use remote::{HeaderSyncManager, sync_from_remote_tip, sync_to_remote_best};

/// Tunables for the backward walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Headers requested per round-trip.
    pub batch_size: u32,
    /// Give up once this many unknown headers have been collected.
    pub max_walk_headers: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_HEADERS_PER_REQUEST,
            max_walk_headers: None,
        }
    }
}

/// Result of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote tip is already on the local main chain; `tip` is the local tip.
    AlreadySynced {
        tip: ChainHeader,
    },
    /// New headers were appended on top of the local chain.
    Extended {
        new_tip: ChainHeader,
        imported: usize,
        requests: u32,
    },
    /// Part of the local chain was replaced.
    Reorganized {
        new_tip: ChainHeader,
        depth: u32,
        imported: usize,
        requests: u32,
    },
}

impl SyncOutcome {
    /// Tip of the local chain after the pass.
    pub fn tip(&self) -> &ChainHeader {
        match self {
            SyncOutcome::AlreadySynced {
                tip,
            } => tip,
            SyncOutcome::Extended {
                new_tip,
                ..
            }
            | SyncOutcome::Reorganized {
                new_tip,
                ..
            } => new_tip,
        }
    }

    /// Round-trips spent walking back.
    pub fn requests(&self) -> u32 {
        match self {
            SyncOutcome::AlreadySynced {
                ..
            } => 0,
            SyncOutcome::Extended {
                requests,
                ..
            }
            | SyncOutcome::Reorganized {
                requests,
                ..
            } => *requests,
        }
    }
}
