//! Helpers for building synthetic chains and serving them from memory.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bitcoin::block::{Header as BlockHeader, Version};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, CompactTarget, Network, TxMerkleNode};

use crate::error::{NetworkError, NetworkResult};
use crate::network::HeaderSource;
use crate::types::{ChainHeader, NetworkExt, encode_header};

/// Regtest difficulty: each header contributes a work of 2.
pub const REGTEST_BITS: u32 = 0x207fffff;

/// A chain of `len` headers starting at the genesis of `network`.
///
/// `salt` goes into every nonce, so chains built with different salts never
/// share a hash above genesis.
pub fn build_chain(network: Network, len: u32, salt: u32) -> Vec<ChainHeader> {
    let mut chain = Vec::with_capacity(len as usize);
    if len == 0 {
        return chain;
    }
    chain.push(ChainHeader::genesis(network.genesis_header()));
    chain.extend(extend_chain(&chain[0], len - 1, salt));
    chain
}

/// `count` headers extending `parent`.
pub fn extend_chain(parent: &ChainHeader, count: u32, salt: u32) -> Vec<ChainHeader> {
    let mut out: Vec<ChainHeader> = Vec::with_capacity(count as usize);
    let mut prev = parent.clone();
    for _ in 0..count {
        let header = BlockHeader {
            version: Version::from_consensus(0x20000000),
            prev_blockhash: prev.hash,
            merkle_root: TxMerkleNode::all_zeros(),
            time: prev.header.time + 600,
            bits: CompactTarget::from_consensus(REGTEST_BITS),
            nonce: salt,
        };
        let next = prev.child(header);
        out.push(next.clone());
        prev = next;
    }
    out
}

/// In-memory [`HeaderSource`] over a set of headers.
pub struct MockHeaderSource {
    headers: Mutex<HashMap<BlockHash, BlockHeader>>,
    best: Mutex<Option<BlockHeader>>,
    requests: AtomicU32,
    fail: AtomicBool,
}

impl MockHeaderSource {
    /// Serve `chain`, with its last element as the best header.
    pub fn new(chain: &[ChainHeader]) -> Self {
        let source = Self {
            headers: Mutex::new(HashMap::new()),
            best: Mutex::new(None),
            requests: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        };
        source.add_headers(chain);
        source
    }

    /// Add headers and make the last of them the best header.
    pub fn add_headers(&self, headers: &[ChainHeader]) {
        let mut map = self.headers.lock().unwrap();
        for header in headers {
            map.insert(header.hash, header.header);
        }
        if let Some(last) = headers.last() {
            *self.best.lock().unwrap() = Some(last.header);
        }
    }

    /// Make every subsequent request fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of requests served so far.
    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> NetworkResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NetworkError::Timeout("mock".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HeaderSource for MockHeaderSource {
    async fn fetch_best_header(&self) -> NetworkResult<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.best.lock().unwrap().as_ref().map(encode_header).unwrap_or_default())
    }

    async fn fetch_headers_backward(
        &self,
        from: &BlockHash,
        count: u32,
    ) -> NetworkResult<Vec<u8>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let map = self.headers.lock().unwrap();
        let mut payload = Vec::new();
        let mut cursor = *from;
        for _ in 0..count {
            let Some(header) = map.get(&cursor) else {
                break;
            };
            payload.extend_from_slice(&encode_header(header));
            cursor = header.prev_blockhash;
        }
        Ok(payload)
    }
}

/// Source returning a fixed payload for every request.
pub struct StaticHeaderSource {
    pub payload: Vec<u8>,
}

#[async_trait]
impl HeaderSource for StaticHeaderSource {
    async fn fetch_best_header(&self) -> NetworkResult<Vec<u8>> {
        Ok(self.payload.clone())
    }

    async fn fetch_headers_backward(
        &self,
        _from: &BlockHash,
        _count: u32,
    ) -> NetworkResult<Vec<u8>> {
        Ok(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HEADER_SIZE;

    #[test]
    fn test_build_chain_links() {
        let chain = build_chain(Network::Regtest, 5, 0);
        assert_eq!(chain.len(), 5);
        for pair in chain.windows(2) {
            assert_eq!(pair[1].prev_hash(), pair[0].hash);
            assert_eq!(pair[1].height, pair[0].height + 1);
        }
        assert_eq!(chain[4].chain_work.to_hex().trim_start_matches('0'), "8");
    }

    #[test]
    fn test_salts_diverge() {
        let a = build_chain(Network::Regtest, 3, 1);
        let b = build_chain(Network::Regtest, 3, 2);
        assert_eq!(a[0].hash, b[0].hash);
        assert_ne!(a[1].hash, b[1].hash);
    }

    #[tokio::test]
    async fn test_mock_backward_fetch() {
        let chain = build_chain(Network::Regtest, 10, 0);
        let source = MockHeaderSource::new(&chain);

        let payload = source.fetch_headers_backward(&chain[9].hash, 4).await.unwrap();
        assert_eq!(payload.len(), 4 * HEADER_SIZE);
        assert_eq!(&payload[..HEADER_SIZE], chain[9].to_bytes().as_slice());

        let unknown = BlockHash::all_zeros();
        assert!(source.fetch_headers_backward(&unknown, 4).await.unwrap().is_empty());
        assert_eq!(source.requests(), 2);
    }
}
