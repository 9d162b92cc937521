use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    interface::FastChain,
    metadata::MetadataTable,
    populate::PopulateChainState,
    pools::HeaderBranch,
};

/// Attaches chain state to the top header of a branch.
pub struct PopulateHeader {
    chain_state: PopulateChainState,
    chain: Arc<dyn FastChain>,
    metadata: Arc<MetadataTable>,
}

impl PopulateHeader {
    /// Creates a header populator.
    pub fn new(
        chain_state: PopulateChainState,
        chain: Arc<dyn FastChain>,
        metadata: Arc<MetadataTable>,
    ) -> Self {
        PopulateHeader {
            chain_state,
            chain,
            metadata,
        }
    }

    /// Populates the metadata of the branch top.
    ///
    /// A header on the confirmed chain has had its block validated, so it is
    /// marked validated. A header that already carries a chain state is left
    /// alone. Nothing is attached if population fails.
    pub fn populate(&self, branch: &HeaderBranch) -> Result<()> {
        let top = branch.top().ok_or(Error::Internal("branch has no top header"))?;
        let hash = top.block_hash();

        let confirmed = self.chain.get_height(&hash, false).map_err(|error| {
            warn!(%hash, %error, "Confirmed height lookup failed");
            Error::OperationFailed
        })?;
        if confirmed.is_some() {
            self.metadata.set_validated(hash);
        }

        if self.metadata.state(&hash).is_some() {
            debug!(%hash, "Header already populated");
            return Ok(());
        }

        let state = self.chain_state.populate_branch(branch)?;
        self.metadata.set_state(hash, Arc::new(state));
        Ok(())
    }
}

impl std::fmt::Debug for PopulateHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopulateHeader")
            .field("chain_state", &self.chain_state)
            .field("metadata", &self.metadata.len())
            .finish_non_exhaustive()
    }
}
