//! Chain-header tracking and sync engine.
//!
//! This library keeps the header chain of one network in memory and on disk:
//!
//! - Compute cumulative proof-of-work from compact difficulty bits
//! - Index headers by height and by hash, with bounded history retention
//! - Publish tip-changed and reorganization events to subscribers
//! - Mirror the chain into fixed-size partition files plus a JSON manifest
//! - Restore the chain from disk on start
//! - Sync against a remote source by walking back to a common ancestor
//!
//! # Quick Start
//!
//! ```no_run
//! use chain_tracker::{ChainTracker, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::mainnet()
//!         .with_storage_path("./.tmp/chain-tracker-storage")
//!         .with_remote_url("http://127.0.0.1:3000");
//!
//!     let tracker = ChainTracker::new(config).await?;
//!     let mut tips = tracker.subscribe_tip();
//!
//!     let outcome = tracker.sync_remote().await?;
//!     println!("tip {} at height {}", outcome.tip().hash, outcome.tip().height);
//!
//!     if let Some(tip) = tips.try_recv() {
//!         println!("tip changed to {}", tip.hash);
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod chain;
pub mod client;
pub mod error;
pub mod logging;
pub mod network;
pub mod storage;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use chain::{ChainStateStore, ChainWork, PruneMode};
pub use client::{ChainTracker, Config};
pub use error::{
    ChainStateError, ChainTrackerError, ChainWorkError, LoggingError, LoggingResult, NetworkError,
    StorageError, SyncError,
};
pub use logging::{LogFileConfig, LoggingConfig, LoggingGuard, init_console_logging, init_logging};
pub use network::{HeaderSource, HttpHeaderSource};
pub use storage::{DiskHeaderStorage, HeaderStorage};
pub use sync::{SyncConfig, SyncOutcome};
pub use tracing::level_filters::LevelFilter;
pub use types::{ChainHeader, ReorgEvent};

// Re-export commonly used bitcoin types
pub use bitcoin::block::Header as BlockHeader;
pub use bitcoin::{BlockHash, Network};

/// Current version of the chain-tracker library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
