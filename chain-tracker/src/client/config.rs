//! Configuration for the chain tracker client.

use std::path::PathBuf;
use std::time::Duration;

use bitcoin::Network;

use crate::chain::{DEFAULT_RETENTION_DEPTH, PruneMode};
use crate::network::MAX_HEADERS_PER_REQUEST;
use crate::storage::HEADERS_PER_FILE;
use crate::sync::SyncConfig;

/// Configuration for the chain tracker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Network whose genesis seeds an empty store and whose name prefixes
    /// the storage files.
    pub network: Network,

    /// Directory holding partition files and the manifest. Defaults to
    /// ./chain-tracker-storage
    pub storage_path: PathBuf,

    /// Base URL of the remote header source.
    pub remote_url: Option<String>,

    /// Heights below the tip kept in the hash index.
    pub retention_depth: u32,

    /// What gets pruned once it falls below the retention depth.
    pub prune_mode: PruneMode,

    /// Records per partition file.
    pub headers_per_file: u32,

    /// Headers requested per backward fetch.
    pub sync_batch_size: u32,

    /// Abort a backward walk after this many unknown headers.
    pub max_walk_headers: Option<u32>,

    /// Per-request timeout of the HTTP source.
    pub request_timeout: Duration,

    /// Mirror the chain to disk. When false the tracker is memory only.
    pub persist: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            storage_path: PathBuf::from("./chain-tracker-storage"),
            remote_url: None,
            retention_depth: DEFAULT_RETENTION_DEPTH,
            prune_mode: PruneMode::default(),
            headers_per_file: HEADERS_PER_FILE,
            sync_batch_size: MAX_HEADERS_PER_REQUEST,
            max_walk_headers: None,
            request_timeout: Duration::from_secs(30),
            persist: true,
        }
    }
}

impl Config {
    /// Create a new configuration for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Create a configuration for mainnet.
    pub fn mainnet() -> Self {
        Self::new(Network::Bitcoin)
    }

    /// Create a configuration for testnet.
    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Create a configuration for regtest.
    pub fn regtest() -> Self {
        Self::new(Network::Regtest)
    }

    /// Set storage path.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Set the remote header source URL.
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_retention_depth(mut self, depth: u32) -> Self {
        self.retention_depth = depth;
        self
    }

    pub fn with_prune_mode(mut self, mode: PruneMode) -> Self {
        self.prune_mode = mode;
        self
    }

    pub fn with_headers_per_file(mut self, count: u32) -> Self {
        self.headers_per_file = count;
        self
    }

    pub fn with_sync_batch_size(mut self, size: u32) -> Self {
        self.sync_batch_size = size;
        self
    }

    pub fn with_max_walk_headers(mut self, max: u32) -> Self {
        self.max_walk_headers = Some(max);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Keep the chain in memory only.
    pub fn without_persistence(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Parameters for the backward walk.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            batch_size: self.sync_batch_size,
            max_walk_headers: self.max_walk_headers,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.sync_batch_size == 0 {
            return Err("sync_batch_size must be > 0".to_string());
        }

        if self.sync_batch_size > MAX_HEADERS_PER_REQUEST {
            return Err(format!(
                "sync_batch_size must be <= {}, got {}",
                MAX_HEADERS_PER_REQUEST, self.sync_batch_size
            ));
        }

        if self.headers_per_file == 0 {
            return Err("headers_per_file must be > 0".to_string());
        }

        if self.max_walk_headers == Some(0) {
            return Err("max_walk_headers must be > 0 when set".to_string());
        }

        if let Some(url) = &self.remote_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(format!("remote_url must be an http(s) URL, got {url:?}"));
            }
        }

        Ok(())
    }

    /// The remote URL, required before syncing.
    pub fn require_remote_url(&self) -> Result<&str, String> {
        self.remote_url.as_deref().ok_or_else(|| "a remote_url is required to sync".to_string())
    }
}
