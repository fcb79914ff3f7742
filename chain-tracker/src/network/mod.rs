//! Transport used to fetch headers from a remote source.

pub mod http;

use async_trait::async_trait;
use bitcoin::BlockHash;

use crate::error::NetworkResult;

pub use http::HttpHeaderSource;

/// Maximum number of headers requested in one backward fetch.
pub const MAX_HEADERS_PER_REQUEST: u32 = 1000;

/// A remote that serves raw 80-byte headers.
#[async_trait]
pub trait HeaderSource: Send + Sync {
    /// The remote's current best header, raw.
    async fn fetch_best_header(&self) -> NetworkResult<Vec<u8>>;

    /// Up to `count` raw headers concatenated newest first, starting with
    /// the header `from` itself and following parent links.
    async fn fetch_headers_backward(&self, from: &BlockHash, count: u32)
    -> NetworkResult<Vec<u8>>;
}
