use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{blockdata::block::BlockHash, chain::ChainState};

/// Out-of-band data attached to a header while it is processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMetadata {
    /// The block was fully validated elsewhere; contextual header checks may
    /// be skipped.
    pub validated: bool,
    /// Chain state derived for the header, set at most once.
    pub state: Option<Arc<ChainState>>,
}

/// Header metadata keyed by block hash.
///
/// Headers themselves are immutable values, so everything learned about a
/// header during validation is recorded here instead.
#[derive(Debug, Default)]
pub struct MetadataTable {
    entries: RwLock<HashMap<BlockHash, HeaderMetadata>>,
}

impl MetadataTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the metadata for a header.
    pub fn get(&self, hash: &BlockHash) -> Option<HeaderMetadata> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
    }

    /// Returns the chain state attached to a header.
    pub fn state(&self, hash: &BlockHash) -> Option<Arc<ChainState>> {
        self.get(hash).and_then(|metadata| metadata.state)
    }

    /// Returns true if the header is marked validated.
    pub fn is_validated(&self, hash: &BlockHash) -> bool {
        self.get(hash).is_some_and(|metadata| metadata.validated)
    }

    /// Attaches a chain state unless one is already present.
    ///
    /// # Returns
    ///
    /// * `true` - If the state was attached
    /// * `false` - If the header already carried a state, which is kept
    pub fn set_state(&self, hash: BlockHash, state: Arc<ChainState>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let metadata = entries.entry(hash).or_default();
        if metadata.state.is_some() {
            return false;
        }
        metadata.state = Some(state);
        true
    }

    /// Marks a header as validated.
    pub fn set_validated(&self, hash: BlockHash) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(hash)
            .or_default()
            .validated = true;
    }

    /// Drops everything recorded for a header.
    pub fn remove(&self, hash: &BlockHash) -> Option<HeaderMetadata> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(hash)
    }

    /// Number of headers with metadata.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no header has metadata.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
