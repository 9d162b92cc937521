//! Block header value type and its consensus checks.
//!
//! [`Header`] wraps Bitcoin's standard 80-byte header. It is immutable; the
//! state derived for it during validation lives in
//! [`MetadataTable`](crate::metadata::MetadataTable), keyed by block hash.

pub use bitcoin::blockdata::block::Header as InnerHeader;
use bitcoin::{
    BlockHash, TxMerkleNode,
    consensus::encode::{self, deserialize, serialize},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    chain::{ChainState, Checkpoint, Forks, state::version_signals},
    consensus::Params,
    error::{Error, Result},
    pow::{CompactTarget, ProofOfWork, Target, Work},
};

/// Errors that can occur when decoding a serialized header.
#[derive(Debug, Error)]
pub enum HeaderDecodeError {
    /// The text is not valid hexadecimal.
    #[error("Invalid header hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// The bytes are not a valid consensus-encoded header.
    #[error("Invalid header encoding: {0}")]
    Encoding(#[from] encode::Error),
}

/// A block header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Header(InnerHeader);

impl Header {
    /// Size of a serialized header in bytes.
    pub const SIZE: usize = InnerHeader::SIZE;

    /// Wraps a Bitcoin header.
    pub const fn new(header: InnerHeader) -> Self {
        Header(header)
    }

    /// Returns the wrapped Bitcoin header.
    pub fn inner(&self) -> &InnerHeader {
        &self.0
    }

    /// Decodes a header from its 80-byte consensus encoding.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, HeaderDecodeError> {
        Ok(Header(deserialize(bytes)?))
    }

    /// Decodes a header from hex-encoded consensus bytes.
    pub fn from_hex(hex: &str) -> std::result::Result<Self, HeaderDecodeError> {
        let bytes = hex::decode(hex.trim())?;
        Self::from_bytes(&bytes)
    }

    /// Consensus encoding of the header.
    pub fn to_bytes(&self) -> Vec<u8> {
        serialize(&self.0)
    }

    /// Hex of the consensus encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Signed header version.
    pub fn version(&self) -> i32 {
        self.0.version.to_consensus()
    }

    /// Header version as raw bits, for version bits signalling.
    pub fn version_bits(&self) -> u32 {
        u32::from_le_bytes(self.version().to_le_bytes())
    }

    /// Hash of the parent header.
    pub fn previous_block_hash(&self) -> BlockHash {
        self.0.prev_blockhash
    }

    /// Merkle root of the block's transactions.
    pub fn merkle_root(&self) -> TxMerkleNode {
        self.0.merkle_root
    }

    /// Header timestamp, seconds since the epoch.
    pub fn timestamp(&self) -> u32 {
        self.0.time
    }

    /// Compact target.
    pub fn bits(&self) -> CompactTarget {
        self.0.bits.into()
    }

    /// Nonce.
    pub fn nonce(&self) -> u32 {
        self.0.nonce
    }

    /// Double SHA-256 identity of the header.
    pub fn block_hash(&self) -> BlockHash {
        self.0.block_hash()
    }

    /// Expanded target, or `None` if the bits are not a valid compact value.
    pub fn target(&self) -> Option<Target> {
        Target::from_compact(self.bits())
    }

    /// Work represented by this header; zero for invalid bits.
    pub fn work(&self) -> Work {
        self.target()
            .and_then(Target::to_work)
            .unwrap_or(Work::ZERO)
    }

    /// Context-free validation against the local clock.
    ///
    /// # Arguments
    ///
    /// * `timestamp_limit_seconds` - How far the timestamp may run ahead of now
    /// * `pow_limit` - The network's maximum attainable target
    /// * `pow` - The proof-of-work function
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the header is structurally valid
    /// * `Err(Error)` - The first rule the header breaks
    pub fn check(
        &self,
        timestamp_limit_seconds: u32,
        pow_limit: Target,
        pow: &dyn ProofOfWork,
    ) -> Result<()> {
        let now = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);
        self.check_at(now, timestamp_limit_seconds, pow_limit, pow)
    }

    /// Context-free validation against a given time.
    pub fn check_at(
        &self,
        now: u32,
        timestamp_limit_seconds: u32,
        pow_limit: Target,
        pow: &dyn ProofOfWork,
    ) -> Result<()> {
        let target = self
            .target()
            .filter(|target| !target.is_zero() && *target <= pow_limit)
            .ok_or(Error::InvalidProofOfWork)?;

        let hash = pow.pow_hash(self).ok_or(Error::InvalidProofOfWork)?;
        if !target.is_met_by(&hash) {
            return Err(Error::HighHash);
        }

        if self.timestamp() > now.saturating_add(timestamp_limit_seconds) {
            return Err(Error::FuturisticTimestamp);
        }

        Ok(())
    }

    /// Contextual validation against the chain state at the header's height.
    pub fn accept(&self, state: &ChainState) -> Result<()> {
        if !Checkpoint::validate(&self.block_hash(), state.height(), state.checkpoints()) {
            return Err(Error::CheckpointsFailed);
        }

        if self.version() < state.minimum_version() {
            return Err(Error::OldVersionBlock);
        }

        for bit in [0u8, 1] {
            if state.must_signal(bit) && !version_signals(self.version_bits(), bit) {
                return Err(Error::MissingVersionSignal(bit));
            }
        }

        if state.is_enabled(Forks::RETARGET)
            && self.bits().to_consensus() != state.work_required()
        {
            return Err(Error::IncorrectProofOfWork);
        }

        if self.timestamp() <= state.median_time_past() {
            return Err(Error::TimestampTooEarly);
        }

        if state.is_enabled(Forks::TIME_WARP_PATCH) && state.is_retarget_height() {
            let earliest = state
                .previous_timestamp()
                .map(|previous| previous.saturating_sub(Params::TIME_WARP_LIMIT_SECONDS));
            if earliest.is_some_and(|earliest| self.timestamp() < earliest) {
                return Err(Error::TimeWarp);
            }
        }

        Ok(())
    }
}

impl From<InnerHeader> for Header {
    fn from(header: InnerHeader) -> Self {
        Header(header)
    }
}

impl From<Header> for InnerHeader {
    fn from(header: Header) -> Self {
        header.0
    }
}
