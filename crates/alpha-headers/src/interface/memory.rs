use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use tracing::{debug, warn};

use crate::{
    blockdata::block::{BlockHash, Header},
    chain::{Checkpoint, ForkPoint},
    interface::{FastChain, StoreError, StoreResult},
    pow::Work,
};

#[derive(Debug, Clone, Default)]
struct Index {
    headers: Vec<Header>,
    heights: HashMap<BlockHash, u32>,
}

impl Index {
    fn from_headers(headers: &[Header]) -> StoreResult<Self> {
        let mut index = Index::default();
        for header in headers {
            if let Some(parent) = index.headers.last() {
                if header.previous_block_hash() != parent.block_hash() {
                    return Err(StoreError::Backend(format!(
                        "header {} does not extend {}",
                        header.block_hash(),
                        parent.block_hash()
                    )));
                }
            }
            index.push(*header)?;
        }
        Ok(index)
    }

    fn push(&mut self, header: Header) -> StoreResult<()> {
        let height = u32::try_from(self.headers.len())
            .map_err(|_| StoreError::Backend("index height overflow".to_string()))?;
        self.heights.insert(header.block_hash(), height);
        self.headers.push(header);
        Ok(())
    }

    fn get(&self, height: u32) -> Option<Header> {
        usize::try_from(height)
            .ok()
            .and_then(|height| self.headers.get(height))
            .copied()
    }

    fn top(&self) -> Option<Checkpoint> {
        let header = self.headers.last()?;
        let height = u32::try_from(self.headers.len().checked_sub(1)?).ok()?;
        Some(Checkpoint::new(height, header.block_hash()))
    }

    fn truncate_above(&mut self, height: u32) -> StoreResult<Vec<Header>> {
        let keep = usize::try_from(height)
            .ok()
            .and_then(|height| height.checked_add(1))
            .ok_or(StoreError::MissingHeader(height))?;
        let outgoing = self.headers.split_off(keep.min(self.headers.len()));
        for header in &outgoing {
            self.heights.remove(&header.block_hash());
        }
        Ok(outgoing)
    }
}

#[derive(Debug, Default)]
struct Inner {
    candidate: Index,
    confirmed: Index,
}

impl Inner {
    fn index(&self, candidate: bool) -> &Index {
        if candidate {
            &self.candidate
        } else {
            &self.confirmed
        }
    }
}

/// In-memory [`FastChain`].
///
/// Both indexes start out equal. Reorganizations touch only the candidate
/// index; [`MemoryChain::confirm_to`] copies a candidate prefix into the
/// confirmed index the way block validation would.
#[derive(Debug, Default)]
pub struct MemoryChain {
    inner: RwLock<Inner>,
}

impl MemoryChain {
    /// Creates a chain holding only `genesis`.
    pub fn new(genesis: Header) -> Self {
        Self::with_headers(&[genesis])
    }

    /// Creates a chain whose indexes both hold `headers`, lowest first.
    ///
    /// Headers are indexed at consecutive heights from zero.
    ///
    /// # Errors
    ///
    /// * `StoreError::Backend` - If a header does not extend the one before
    ///   it, or the heights overflow
    pub fn try_with_headers(headers: &[Header]) -> StoreResult<Self> {
        let index = Index::from_headers(headers)?;
        Ok(MemoryChain {
            inner: RwLock::new(Inner {
                candidate: index.clone(),
                confirmed: index,
            }),
        })
    }

    /// Like [`try_with_headers`](MemoryChain::try_with_headers), but a
    /// sequence that cannot be indexed yields an empty chain. The failure is
    /// logged at warn level.
    pub fn with_headers(headers: &[Header]) -> Self {
        Self::try_with_headers(headers).unwrap_or_else(|error| {
            warn!(%error, count = headers.len(), "Headers not indexed, chain left empty");
            Self::default()
        })
    }

    /// Makes the confirmed index equal to the candidate index up to
    /// `height`.
    pub fn confirm_to(&self, height: u32) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut confirmed = inner.candidate.clone();
        confirmed.truncate_above(height)?;
        inner.confirmed = confirmed;
        Ok(())
    }

    /// Headers of the selected chain, lowest first.
    pub fn headers(&self, candidate: bool) -> Vec<Header> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .index(candidate)
            .headers
            .clone()
    }
}

impl FastChain for MemoryChain {
    fn get_work(&self, maximum: Work, above_height: u32, candidate: bool) -> StoreResult<Work> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let skip = usize::try_from(above_height)
            .ok()
            .and_then(|height| height.checked_add(1))
            .unwrap_or(usize::MAX);

        let mut work = Work::ZERO;
        for header in inner.index(candidate).headers.iter().skip(skip) {
            work = work.saturating_add(header.work());
            if work > maximum {
                break;
            }
        }
        Ok(work)
    }

    fn reorganize(&self, fork_point: &ForkPoint, incoming: &[Header]) -> StoreResult<Vec<Header>> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let candidate = &mut inner.candidate;

        if candidate.get(fork_point.height).map(|header| header.block_hash())
            != Some(fork_point.hash)
        {
            return Err(StoreError::ForkPointMismatch);
        }

        let outgoing = candidate.truncate_above(fork_point.height)?;
        for header in incoming {
            candidate.push(*header)?;
        }

        debug!(
            fork_height = fork_point.height,
            incoming = incoming.len(),
            outgoing = outgoing.len(),
            "Reorganized candidate chain"
        );
        Ok(outgoing)
    }

    fn get_header(&self, height: u32, candidate: bool) -> StoreResult<Option<Header>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.index(candidate).get(height))
    }

    fn get_height(&self, hash: &BlockHash, candidate: bool) -> StoreResult<Option<u32>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.index(candidate).heights.get(hash).copied())
    }

    fn top(&self, candidate: bool) -> StoreResult<Option<Checkpoint>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.index(candidate).top())
    }
}
