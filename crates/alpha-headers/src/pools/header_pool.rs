use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{debug, warn};

use crate::{
    blockdata::block::{BlockHash, Header},
    chain::Checkpoint,
    error::{Error, Result},
    interface::FastChain,
    pools::HeaderBranch,
};

/// Headers whose branch is not yet on the candidate chain.
///
/// Reads are safe from any thread. Mutation is serialized by the caller; the
/// organizer only mutates the pool while holding its priority lock.
pub trait HeaderPool: Send + Sync {
    /// Builds the branch ending at `header`.
    ///
    /// # Returns
    ///
    /// * `Ok(HeaderBranch)` - The branch from the nearest candidate ancestor,
    ///   or an empty branch if `header` is already indexed or pooled
    /// * `Err(Error::OrphanHeader)` - If an ancestor is neither indexed nor
    ///   pooled
    /// * `Err(Error::OperationFailed)` - If the chain lookup failed
    fn get_branch(&self, header: &Header) -> Result<HeaderBranch>;

    /// Holds `header` at `height`.
    fn add(&self, header: Header, height: u32);

    /// Drops `headers` from the pool.
    fn remove(&self, headers: &[Header]);

    /// Returns true if a header with this hash is pooled.
    fn exists(&self, hash: &BlockHash) -> bool;

    /// Number of pooled headers.
    fn len(&self) -> usize;

    /// Returns true if nothing is pooled.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops headers more than `depth` below `top_height`.
    ///
    /// # Returns
    ///
    /// The headers dropped.
    fn prune(&self, top_height: u32, depth: u32) -> Vec<Header>;
}

/// [`HeaderPool`] held in memory, resolving fork points against a
/// [`FastChain`] candidate index.
pub struct MemoryHeaderPool {
    entries: RwLock<HashMap<BlockHash, (Header, u32)>>,
    chain: Arc<dyn FastChain>,
}

impl MemoryHeaderPool {
    /// Creates an empty pool over `chain`.
    pub fn new(chain: Arc<dyn FastChain>) -> Self {
        MemoryHeaderPool {
            entries: RwLock::new(HashMap::new()),
            chain,
        }
    }

    /// Height a pooled header was added at.
    pub fn height(&self, hash: &BlockHash) -> Option<u32> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .map(|(_, height)| *height)
    }

    fn candidate_height(&self, hash: &BlockHash) -> Result<Option<u32>> {
        self.chain.get_height(hash, true).map_err(|error| {
            warn!(%hash, %error, "Candidate height lookup failed");
            Error::OperationFailed
        })
    }
}

impl std::fmt::Debug for MemoryHeaderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHeaderPool")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl HeaderPool for MemoryHeaderPool {
    fn get_branch(&self, header: &Header) -> Result<HeaderBranch> {
        let hash = header.block_hash();
        if self.exists(&hash) || self.candidate_height(&hash)?.is_some() {
            return Ok(HeaderBranch::empty());
        }

        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut headers = vec![*header];
        let mut parent = header.previous_block_hash();

        let fork_point = loop {
            if let Some(height) = self.candidate_height(&parent)? {
                break Checkpoint::new(height, parent);
            }

            match entries.get(&parent) {
                Some((pooled, _)) => {
                    headers.push(*pooled);
                    parent = pooled.previous_block_hash();
                }
                None => {
                    debug!(%hash, %parent, "Header parent is unknown");
                    return Err(Error::OrphanHeader);
                }
            }
        };

        headers.reverse();
        Ok(HeaderBranch::new(fork_point, headers))
    }

    fn add(&self, header: Header, height: u32) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(header.block_hash(), (header, height));
    }

    fn remove(&self, headers: &[Header]) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for header in headers {
            entries.remove(&header.block_hash());
        }
    }

    fn exists(&self, hash: &BlockHash) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(hash)
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn prune(&self, top_height: u32, depth: u32) -> Vec<Header> {
        let minimum = top_height.saturating_sub(depth);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut pruned = Vec::new();
        entries.retain(|_, (header, height)| {
            let keep = *height >= minimum;
            if !keep {
                pruned.push(*header);
            }
            keep
        });
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        interface::{MemoryChain, StoreError},
        test_utils::{FailingChain, build_chain, genesis},
    };

    fn pool_over(headers: &[Header]) -> MemoryHeaderPool {
        MemoryHeaderPool::new(Arc::new(MemoryChain::with_headers(headers)))
    }

    #[test]
    fn test_branch_from_candidate_tip() {
        let headers = build_chain(genesis(), 3, 0);
        let pool = pool_over(&headers[..3]);

        let branch = pool.get_branch(&headers[3]).unwrap();
        assert_eq!(branch.fork_point(), &Checkpoint::new(2, headers[2].block_hash()));
        assert_eq!(branch.headers(), &headers[3..]);
        assert_eq!(branch.top_height(), Some(3));
    }

    #[test]
    fn test_branch_includes_pooled_ancestors() {
        let headers = build_chain(genesis(), 4, 0);
        let pool = pool_over(&headers[..2]);
        pool.add(headers[2], 2);
        pool.add(headers[3], 3);

        let branch = pool.get_branch(&headers[4]).unwrap();
        assert_eq!(branch.height(), 1);
        assert_eq!(branch.headers(), &headers[2..]);
        assert_eq!(branch.top_height(), Some(4));
        // Building a branch leaves the pool as it was.
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_known_headers_yield_empty_branch() {
        let headers = build_chain(genesis(), 2, 0);
        let pool = pool_over(&headers[..2]);

        assert!(pool.get_branch(&headers[1]).unwrap().is_empty());

        pool.add(headers[2], 2);
        assert!(pool.exists(&headers[2].block_hash()));
        assert!(pool.get_branch(&headers[2]).unwrap().is_empty());
    }

    #[test]
    fn test_orphan() {
        let headers = build_chain(genesis(), 3, 0);
        let pool = pool_over(&headers[..1]);
        assert_eq!(pool.get_branch(&headers[3]), Err(Error::OrphanHeader));
    }

    #[test]
    fn test_chain_failure_is_operational() {
        let headers = build_chain(genesis(), 1, 0);
        let chain = FailingChain::new(MemoryChain::with_headers(&headers[..1]));
        chain.fail_lookups(StoreError::Backend("offline".to_string()));
        let pool = MemoryHeaderPool::new(Arc::new(chain));

        assert_eq!(pool.get_branch(&headers[1]), Err(Error::OperationFailed));
    }

    #[test]
    fn test_remove_and_prune() {
        let headers = build_chain(genesis(), 4, 0);
        let pool = pool_over(&headers[..1]);
        for (height, header) in headers.iter().enumerate().skip(1) {
            pool.add(*header, u32::try_from(height).unwrap());
        }

        pool.remove(&headers[4..]);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.height(&headers[3].block_hash()), Some(3));

        assert_eq!(pool.prune(4, 2), vec![headers[1]]);
        assert!(!pool.exists(&headers[1].block_hash()));
        assert!(pool.exists(&headers[2].block_hash()));
        assert!(pool.prune(4, 2).is_empty());
    }
}
