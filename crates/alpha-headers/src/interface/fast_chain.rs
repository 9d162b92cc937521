use thiserror::Error;

use crate::{
    blockdata::block::{BlockHash, Header},
    chain::{Checkpoint, ForkPoint},
    pow::Work,
};

/// Errors reported by a header store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The fork point does not match the candidate chain at its height.
    #[error("Fork point is not on the candidate chain")]
    ForkPointMismatch,
    /// A header expected at a height is missing from the index.
    #[error("Missing header at height {0}")]
    MissingHeader(u32),
    /// The storage backend failed.
    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Result type for header store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The authoritative header chain.
///
/// A store keeps two indexes: the candidate chain, the headers with the
/// most known work, and the confirmed chain, the headers whose blocks have
/// been validated. Lookups select one with the `candidate` flag. Only the
/// header organizer mutates the candidate index, and only while holding the
/// high-priority lock.
pub trait FastChain: Send + Sync {
    /// Sums the work of the selected chain above `above_height`.
    ///
    /// Summation may stop as soon as the total exceeds `maximum`, so the
    /// result is exact only when it is at most `maximum`.
    fn get_work(&self, maximum: Work, above_height: u32, candidate: bool) -> StoreResult<Work>;

    /// Replaces every candidate header above `fork_point` with `incoming`.
    ///
    /// The replacement is atomic: on error the candidate chain is unchanged.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<Header>)` - The displaced headers, lowest first
    /// * `Err(StoreError)` - If the fork point is not on the candidate chain or
    ///   the store failed
    fn reorganize(&self, fork_point: &ForkPoint, incoming: &[Header]) -> StoreResult<Vec<Header>>;

    /// Returns the header at `height` in the selected chain.
    fn get_header(&self, height: u32, candidate: bool) -> StoreResult<Option<Header>>;

    /// Returns the height of `hash` if it is in the selected chain.
    fn get_height(&self, hash: &BlockHash, candidate: bool) -> StoreResult<Option<u32>>;

    /// Returns the height and hash of the top of the selected chain.
    fn top(&self, candidate: bool) -> StoreResult<Option<Checkpoint>>;
}
