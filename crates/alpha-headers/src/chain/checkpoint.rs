use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blockdata::block::BlockHash;

/// Errors that can occur when parsing a checkpoint.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    /// The text is not of the form `hash:height`.
    #[error("Invalid checkpoint format: {0}")]
    InvalidFormat(String),
    /// The hash part is not a valid block hash.
    #[error("Invalid checkpoint hash: {0}")]
    InvalidHash(String),
    /// The height part is not a valid height.
    #[error("Invalid checkpoint height: {0}")]
    InvalidHeight(String),
}

/// A block hash pinned at a height.
///
/// Configured checkpoints constrain which header may occupy a height. The
/// same shape identifies the fork point of a branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Height of the header.
    pub height: u32,
    /// Hash of the header.
    pub hash: BlockHash,
}

/// The last common ancestor of a branch and the indexed chain.
pub type ForkPoint = Checkpoint;

impl Checkpoint {
    /// Creates a checkpoint.
    pub const fn new(height: u32, hash: BlockHash) -> Self {
        Checkpoint { height, hash }
    }

    /// Returns false if any checkpoint at `height` names a different hash.
    pub fn validate(hash: &BlockHash, height: u32, checkpoints: &[Checkpoint]) -> bool {
        checkpoints
            .iter()
            .filter(|checkpoint| checkpoint.height == height)
            .all(|checkpoint| checkpoint.hash == *hash)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.height)
    }
}

impl FromStr for Checkpoint {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, height) = s
            .split_once(':')
            .ok_or_else(|| CheckpointError::InvalidFormat(s.to_string()))?;
        let hash = BlockHash::from_str(hash.trim())
            .map_err(|_| CheckpointError::InvalidHash(hash.to_string()))?;
        let height = height
            .trim()
            .parse::<u32>()
            .map_err(|_| CheckpointError::InvalidHeight(height.to_string()))?;
        Ok(Checkpoint { height, hash })
    }
}
