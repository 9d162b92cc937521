use bitcoin::hashes::Hash;

use crate::{
    blockdata::block::{BlockHash, Header},
    chain::{Checkpoint, ForkPoint},
    pow::Work,
};

/// Contiguous, linked headers rooted at an indexed fork point.
///
/// The first header's parent is the fork point, and each following header's
/// parent is the header before it. Headers occupy consecutive heights from
/// `fork_point.height + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBranch {
    fork_point: ForkPoint,
    headers: Vec<Header>,
}

impl HeaderBranch {
    /// A branch with no headers, signalling the header is already known.
    pub fn empty() -> Self {
        HeaderBranch {
            fork_point: Checkpoint::new(0, BlockHash::all_zeros()),
            headers: Vec::new(),
        }
    }

    /// Creates a branch from a fork point and linked headers, lowest first.
    pub fn new(fork_point: ForkPoint, headers: Vec<Header>) -> Self {
        HeaderBranch {
            fork_point,
            headers,
        }
    }

    /// Returns true if the branch holds no headers.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Number of headers in the branch.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// The indexed ancestor the branch extends.
    pub fn fork_point(&self) -> &ForkPoint {
        &self.fork_point
    }

    /// Height of the fork point.
    pub fn height(&self) -> u32 {
        self.fork_point.height
    }

    /// Headers in the branch, lowest first.
    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// The highest header.
    pub fn top(&self) -> Option<&Header> {
        self.headers.last()
    }

    /// Height of the highest header, fork point height plus branch length.
    pub fn top_height(&self) -> Option<u32> {
        let length = u32::try_from(self.headers.len()).ok()?;
        self.fork_point.height.checked_add(length)
    }

    /// Header of the branch at `height`, if the branch covers it.
    pub fn header_at(&self, height: u32) -> Option<&Header> {
        let offset = height.checked_sub(self.fork_point.height)?.checked_sub(1)?;
        self.headers.get(usize::try_from(offset).ok()?)
    }

    /// Cumulative work of the branch headers.
    pub fn work(&self) -> Work {
        self.headers.iter().map(Header::work).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_chain, genesis};

    #[test]
    fn test_empty_branch() {
        let branch = HeaderBranch::empty();
        assert!(branch.is_empty());
        assert!(branch.top().is_none());
        assert_eq!(branch.top_height(), Some(0));
        assert_eq!(branch.work(), Work::ZERO);
    }

    #[test]
    fn test_heights_and_work() {
        let headers = build_chain(genesis(), 5, 0);
        let fork_point = Checkpoint::new(2, headers[2].block_hash());
        let branch = HeaderBranch::new(fork_point, headers[3..].to_vec());

        assert_eq!(branch.len(), 3);
        assert_eq!(branch.height(), 2);
        assert_eq!(branch.top_height(), Some(5));
        assert_eq!(branch.top(), Some(&headers[5]));
        assert_eq!(branch.header_at(3), Some(&headers[3]));
        assert_eq!(branch.header_at(5), Some(&headers[5]));
        assert_eq!(branch.header_at(2), None);
        assert_eq!(branch.header_at(6), None);
        assert_eq!(
            branch.work(),
            headers[3].work().saturating_add(headers[4].work()).saturating_add(headers[5].work())
        );
    }

    #[test]
    fn test_top_height_overflow() {
        let headers = build_chain(genesis(), 1, 0);
        let branch = HeaderBranch::new(Checkpoint::new(u32::MAX, headers[0].block_hash()), headers);
        assert_eq!(branch.top_height(), None);
    }
}
