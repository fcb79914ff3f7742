//! Common type definitions for the chain tracker.

use bitcoin::block::Header as BlockHeader;
use bitcoin::consensus::encode;
use bitcoin::{BlockHash, Network};

use crate::chain::ChainWork;

/// Size in bytes of one serialized header.
pub const HEADER_SIZE: usize = 80;

/// A header as tracked by the chain state: the decoded header plus its
/// position and cumulative work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHeader {
    pub header: BlockHeader,
    pub height: u32,
    pub hash: BlockHash,
    pub chain_work: ChainWork,
}

impl ChainHeader {
    /// Build a record for `header` at `height`, computing its hash.
    pub fn new(header: BlockHeader, height: u32, chain_work: ChainWork) -> Self {
        Self {
            hash: header.block_hash(),
            header,
            height,
            chain_work,
        }
    }

    /// The genesis record: height zero and no accumulated work.
    pub fn genesis(header: BlockHeader) -> Self {
        Self::new(header, 0, ChainWork::zero())
    }

    /// Build the record for `header` as the child of `self`.
    pub fn child(&self, header: BlockHeader) -> Self {
        let chain_work = self.chain_work.accumulate(header.bits.to_consensus());
        Self::new(header, self.height + 1, chain_work)
    }

    pub fn prev_hash(&self) -> BlockHash {
        self.header.prev_blockhash
    }

    pub fn bits(&self) -> u32 {
        self.header.bits.to_consensus()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode_header(&self.header)
    }
}

/// Event published when a sync replaces part of the tracked chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorgEvent {
    /// Hashes removed from the main chain, highest first.
    pub orphaned: Vec<BlockHash>,
    pub new_tip: ChainHeader,
    pub common_ancestor: ChainHeader,
    pub depth: u32,
}

/// Decode exactly one raw header.
pub fn decode_header(bytes: &[u8]) -> Result<BlockHeader, encode::Error> {
    encode::deserialize(bytes)
}

/// Serialize one header into its 80 raw bytes.
pub fn encode_header(header: &BlockHeader) -> Vec<u8> {
    encode::serialize(header)
}

/// Decode a payload of concatenated raw headers, preserving order.
///
/// Callers check that the payload length is a multiple of [`HEADER_SIZE`].
pub fn decode_headers(payload: &[u8]) -> Result<Vec<BlockHeader>, encode::Error> {
    payload.chunks_exact(HEADER_SIZE).map(decode_header).collect()
}

/// Network-specific naming used by the on-disk layout.
pub trait NetworkExt {
    /// Prefix used in partition and manifest file names, e.g. `main`.
    fn file_prefix(&self) -> &'static str;

    /// Genesis header of the network.
    fn genesis_header(&self) -> BlockHeader;
}

impl NetworkExt for Network {
    fn file_prefix(&self) -> &'static str {
        match self {
            Network::Bitcoin => "main",
            Network::Testnet => "test",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
            _ => "other",
        }
    }

    fn genesis_header(&self) -> BlockHeader {
        bitcoin::blockdata::constants::genesis_block(*self).header
    }
}
