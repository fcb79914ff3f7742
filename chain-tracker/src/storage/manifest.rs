//! JSON manifest describing the partition files.

use std::str::FromStr;

use bitcoin::BlockHash;
use serde::{Deserialize, Serialize};

use crate::chain::ChainWork;
use crate::error::{StorageError, StorageResult};
use crate::types::ChainHeader;

/// Name of the partition file with the given index.
pub fn partition_file_name(prefix: &str, index: u32) -> String {
    format!("{}Net_{}.headers", prefix, index)
}

/// Name of the manifest file.
pub fn manifest_file_name(prefix: &str) -> String {
    format!("{}NetBlockHeaders.json", prefix)
}

/// Index over all partition files of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub root_folder: String,
    pub json_filename: String,
    pub headers_per_file: u32,
    pub files: Vec<PartitionEntry>,
}

/// One partition file. `prev*` describe the header one below `last*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionEntry {
    pub chain: String,
    pub file_name: String,
    pub first_height: u32,
    pub count: u32,
    /// Hex SHA-256 of the file, present once the partition is full.
    pub file_hash: Option<String>,
    pub prev_hash: Option<String>,
    pub prev_chain_work: Option<ChainWork>,
    pub last_hash: Option<String>,
    pub last_chain_work: Option<ChainWork>,
}

impl Manifest {
    pub fn new(root_folder: String, prefix: &str, headers_per_file: u32) -> Self {
        Self {
            root_folder,
            json_filename: manifest_file_name(prefix),
            headers_per_file,
            files: Vec::new(),
        }
    }

    /// Make the entry list end exactly at `partition`, appending empty
    /// entries or dropping higher ones. Returns the dropped entries.
    pub fn resize_through(&mut self, partition: u32, prefix: &str) -> Vec<PartitionEntry> {
        let len = partition as usize + 1;
        let dropped = if self.files.len() > len {
            self.files.split_off(len)
        } else {
            Vec::new()
        };

        while self.files.len() < len {
            let index = self.files.len() as u32;
            self.files.push(PartitionEntry::empty(prefix, index, self.headers_per_file));
        }

        dropped
    }

    /// Height of the last header recorded by the manifest.
    pub fn tip_height(&self) -> Option<u32> {
        self.files
            .iter()
            .rev()
            .find(|entry| entry.count > 0)
            .map(|entry| entry.first_height + entry.count - 1)
    }
}

impl PartitionEntry {
    fn empty(prefix: &str, index: u32, headers_per_file: u32) -> Self {
        Self {
            chain: prefix.to_string(),
            file_name: partition_file_name(prefix, index),
            first_height: index * headers_per_file,
            count: 0,
            file_hash: None,
            prev_hash: None,
            prev_chain_work: None,
            last_hash: None,
            last_chain_work: None,
        }
    }

    /// Record `last` as the highest header written to this partition.
    pub fn set_last(&mut self, last: &ChainHeader, prev: Option<&ChainHeader>) {
        self.count = last.height - self.first_height + 1;
        self.last_hash = Some(last.hash.to_string());
        self.last_chain_work = Some(last.chain_work.clone());

        if last.height == 0 {
            self.prev_hash = None;
            self.prev_chain_work = None;
        } else if let Some(prev) = prev.filter(|p| p.height + 1 == last.height) {
            self.prev_hash = Some(prev.hash.to_string());
            self.prev_chain_work = Some(prev.chain_work.clone());
        }
    }

    pub fn last_block_hash(&self) -> StorageResult<Option<BlockHash>> {
        parse_hash(self.last_hash.as_deref())
    }

    pub fn prev_block_hash(&self) -> StorageResult<Option<BlockHash>> {
        parse_hash(self.prev_hash.as_deref())
    }
}

fn parse_hash(value: Option<&str>) -> StorageResult<Option<BlockHash>> {
    value
        .map(|s| {
            BlockHash::from_str(s)
                .map_err(|e| StorageError::Corruption(format!("invalid hash {:?}: {}", s, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkExt;
    use bitcoin::Network;

    #[test]
    fn test_file_names() {
        assert_eq!(partition_file_name("main", 3), "mainNet_3.headers");
        assert_eq!(manifest_file_name("test"), "testNetBlockHeaders.json");
    }

    #[test]
    fn test_resize_through() {
        let mut manifest = Manifest::new("/data".into(), "main", 100);
        assert!(manifest.resize_through(2, "main").is_empty());
        assert_eq!(manifest.files.len(), 3);
        assert_eq!(manifest.files[2].first_height, 200);
        assert_eq!(manifest.files[2].file_name, "mainNet_2.headers");

        let dropped = manifest.resize_through(0, "main");
        assert_eq!(dropped.len(), 2);
        assert_eq!(manifest.files.len(), 1);
    }

    #[test]
    fn test_json_layout() {
        let genesis = ChainHeader::genesis(Network::Bitcoin.genesis_header());
        let mut manifest = Manifest::new("/data".into(), "main", 100_000);
        manifest.resize_through(0, "main");
        manifest.files[0].set_last(&genesis, None);

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["jsonFilename"], "mainNetBlockHeaders.json");
        assert_eq!(json["headersPerFile"], 100_000);
        let entry = &json["files"][0];
        assert_eq!(entry["fileName"], "mainNet_0.headers");
        assert_eq!(entry["firstHeight"], 0);
        assert_eq!(entry["count"], 1);
        assert_eq!(entry["lastChainWork"], "0".repeat(64));
        assert!(entry["prevHash"].is_null());

        let back: Manifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(back.tip_height(), Some(0));
        assert_eq!(back.files[0].last_block_hash().unwrap(), Some(genesis.hash));
    }
}
