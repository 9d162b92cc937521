//! Genesis headers for the Unicity networks.

use bitcoin::{
    BlockHash, CompactTarget, TxMerkleNode,
    block::{Header as InnerHeader, Version},
    hashes::Hash,
};

use crate::{blockdata::block::Header, network::Network};

/// Genesis header fields for a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenesisInfo {
    /// The merkle root of the genesis block, in internal byte order.
    pub merkle_root: [u8; 32],
    /// The timestamp of the genesis block.
    pub timestamp: u32,
    /// The nonce of the genesis block.
    pub nonce: u32,
    /// The bits (difficulty) of the genesis block.
    pub bits: u32,
    /// The version of the genesis block.
    pub version: i32,
}

impl GenesisInfo {
    /// Returns the genesis block information for the specified network.
    ///
    /// # Arguments
    ///
    /// * `network` - The network type (mainnet, testnet, regtest)
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet | Network::Testnet => Self::mainnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    /// Returns the genesis block information for the mainnet network.
    ///
    /// Testnet shares the mainnet genesis block.
    pub fn mainnet() -> Self {
        Self {
            merkle_root: [
                0x14, 0x26, 0x46, 0x49, 0x6f, 0xad, 0xbf, 0x7a, 0x65, 0x1e, 0x4f, 0x85, 0xf3, 0xe1,
                0x7c, 0xda, 0x8b, 0x6b, 0xb8, 0x54, 0x35, 0x8b, 0x4a, 0x7c, 0xc7, 0x01, 0x5f, 0x73,
                0x03, 0x90, 0x1f, 0xc6,
            ],
            timestamp: 1718524492,
            nonce: 40358186,
            bits: 0x1d0fffff,
            version: 1,
        }
    }

    /// Returns the genesis block information for the regtest network.
    pub fn regtest() -> Self {
        Self {
            merkle_root: [
                0x3b, 0xa3, 0xed, 0xfd, 0x7a, 0x7b, 0x12, 0xb2, 0x7a, 0xc7, 0x2c, 0x3e, 0x67, 0x76,
                0x8f, 0x61, 0x7f, 0xc8, 0x1b, 0xc3, 0x88, 0x8a, 0x51, 0x32, 0x3a, 0x9f, 0xb8, 0xaa,
                0x4b, 0x1e, 0x5e, 0x4a,
            ],
            timestamp: 1296688602,
            nonce: 2,
            bits: 0x207fffff,
            version: 1,
        }
    }

    /// Builds the genesis header.
    pub fn to_header(&self) -> Header {
        Header::new(InnerHeader {
            version: Version::from_consensus(self.version),
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::from_byte_array(self.merkle_root),
            time: self.timestamp,
            bits: CompactTarget::from_consensus(self.bits),
            nonce: self.nonce,
        })
    }
}
