//! The header organizer.
//!
//! Each incoming header is checked without the lock, then, under the
//! high-priority section of the organizer's [`PriorityLock`], drawn into a
//! branch, accepted against its chain state and weighed against the
//! candidate chain above the branch's fork point. A branch with strictly
//! more work replaces the candidate chain above the fork point; otherwise
//! its top goes back into the pool to wait for more work.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, error, info, warn};

use crate::{
    blockdata::block::Header,
    consensus::Params,
    error::{Error, ErrorKind, Result},
    interface::FastChain,
    metadata::MetadataTable,
    mutex::{Priority, PriorityGuard, PriorityLock},
    pools::{HeaderBranch, HeaderPool},
    settings::Settings,
    validate::ValidateHeader,
};

/// Validates incoming headers and organizes them into the candidate chain.
pub struct HeaderOrganizer {
    chain: Arc<dyn FastChain>,
    pool: Arc<dyn HeaderPool>,
    mutex: Arc<dyn PriorityLock>,
    validator: ValidateHeader,
    metadata: Arc<MetadataTable>,
    stopped: AtomicBool,
    pool_prune_depth: u32,
}

impl HeaderOrganizer {
    /// Creates a stopped organizer for the network of `settings`.
    ///
    /// # Arguments
    ///
    /// * `chain` - The authoritative chain, mutated only by this organizer
    /// * `pool` - Headers not yet on the candidate chain
    /// * `mutex` - Lock shared with block processing
    /// * `settings` - Validation and pool settings
    pub fn new(
        chain: Arc<dyn FastChain>,
        pool: Arc<dyn HeaderPool>,
        mutex: Arc<dyn PriorityLock>,
        settings: Settings,
    ) -> Self {
        let params = settings.params();
        Self::with_params(chain, pool, mutex, settings, params)
    }

    /// Creates a stopped organizer with explicit consensus parameters.
    pub fn with_params(
        chain: Arc<dyn FastChain>,
        pool: Arc<dyn HeaderPool>,
        mutex: Arc<dyn PriorityLock>,
        settings: Settings,
        params: Params,
    ) -> Self {
        let metadata = Arc::new(MetadataTable::new());
        let pool_prune_depth = settings.pool_prune_depth;
        let validator =
            ValidateHeader::with_params(chain.clone(), metadata.clone(), settings, params);

        HeaderOrganizer {
            chain,
            pool,
            mutex,
            validator,
            metadata,
            stopped: AtomicBool::new(true),
            pool_prune_depth,
        }
    }

    /// Starts organizing. Returns true.
    pub fn start(&self) -> bool {
        self.stopped.store(false, Ordering::Release);
        self.validator.start()
    }

    /// Stops organizing. An organize call in flight finishes, but its
    /// remaining contextual steps fail with [`Error::ServiceStopped`].
    /// Returns true.
    pub fn stop(&self) -> bool {
        self.validator.stop();
        self.stopped.store(true, Ordering::Release);
        true
    }

    /// Returns true if the organizer is stopped.
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Header metadata recorded during validation.
    pub fn metadata(&self) -> &Arc<MetadataTable> {
        &self.metadata
    }

    /// Context-free validation, available whether or not the organizer runs.
    pub fn check(&self, header: &Header) -> Result<()> {
        self.validator.check(header)
    }

    /// Validates `header` and organizes its branch.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The candidate chain now ends with the header's branch
    /// * `Err(Error::DuplicateBlock)` - The header is already known
    /// * `Err(Error::InsufficientWork)` - The header was pooled to wait for
    ///   more work
    /// * `Err(Error::Store)` - The candidate chain could not be updated; the
    ///   store is no longer consistent
    /// * `Err(Error)` - Any other rejection
    pub fn organize(&self, header: Header) -> Result<()> {
        self.check(&header)?;

        let _guard = PriorityGuard::acquire(self.mutex.as_ref(), Priority::High);
        self.organize_locked(&header)
    }

    /// Like [`organize`](HeaderOrganizer::organize), reporting the result to
    /// `handler` once the lock has been released.
    pub fn organize_with<F>(&self, header: Header, handler: F)
    where
        F: FnOnce(Result<()>),
    {
        let result = self.organize(header);
        handler(result);
    }

    fn organize_locked(&self, header: &Header) -> Result<()> {
        if self.stopped() {
            return Err(Error::ServiceStopped);
        }

        let branch = self.pool.get_branch(header)?;
        if branch.is_empty() {
            debug!(hash = %header.block_hash(), "Header already known");
            return Err(Error::DuplicateBlock);
        }

        let result = self
            .accept(&branch)
            .and_then(|()| self.handle_accept(&branch));

        // Metadata lives only as long as a header waits in the pool.
        match &result {
            Ok(()) => self.forget(branch.headers()),
            Err(Error::InsufficientWork) => {}
            Err(_) => self.forget(branch.top().map(std::slice::from_ref).unwrap_or_default()),
        }
        result
    }

    fn forget(&self, headers: &[Header]) {
        for header in headers {
            self.metadata.remove(&header.block_hash());
        }
    }

    fn accept(&self, branch: &HeaderBranch) -> Result<()> {
        let Err(error) = self.validator.accept(branch) else {
            return Ok(());
        };

        let hash = branch.top().map(Header::block_hash);
        match error.kind() {
            ErrorKind::Duplicate | ErrorKind::Stopped => {
                debug!(?hash, %error, "Header not accepted");
            }
            ErrorKind::Contextual => {
                warn!(?hash, %error, "Invalid header");
            }
            _ => {
                warn!(?hash, %error, "Header acceptance failed");
            }
        }
        Err(error)
    }

    fn handle_accept(&self, branch: &HeaderBranch) -> Result<()> {
        let top = *branch
            .top()
            .ok_or(Error::Internal("branch has no top header"))?;
        let top_height = branch
            .top_height()
            .ok_or(Error::Internal("branch height overflow"))?;

        let work = branch.work();
        let required = self
            .chain
            .get_work(work, branch.height(), true)
            .map_err(|error| {
                warn!(fork_height = branch.height(), %error, "Failed to get chain work");
                Error::OperationFailed
            })?;

        // Equal work never displaces the existing chain.
        if work <= required {
            debug!(
                hash = %top.block_hash(),
                height = top_height,
                %work,
                %required,
                "Insufficient work to reorganize"
            );
            self.pool.add(top, top_height);
            return Err(Error::InsufficientWork);
        }

        let outgoing = self
            .chain
            .reorganize(branch.fork_point(), branch.headers())
            .map_err(|store| {
                error!(
                    fork_point = %branch.fork_point(),
                    incoming = branch.len(),
                    error = %store,
                    "Failure writing header branch, store is now corrupted"
                );
                Error::Store(store)
            })?;

        self.pool.remove(branch.headers());
        for (header, height) in outgoing.iter().zip(branch.height().saturating_add(1)..) {
            self.pool.add(*header, height);
        }
        let pruned = self.pool.prune(top_height, self.pool_prune_depth);
        self.forget(&pruned);

        info!(
            hash = %top.block_hash(),
            height = top_height,
            fork_height = branch.height(),
            incoming = branch.len(),
            outgoing = outgoing.len(),
            pruned = pruned.len(),
            "Organized header branch"
        );
        Ok(())
    }
}

impl std::fmt::Debug for HeaderOrganizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderOrganizer")
            .field("stopped", &self.stopped())
            .field("validator", &self.validator)
            .field("pool_prune_depth", &self.pool_prune_depth)
            .finish_non_exhaustive()
    }
}
