//! Chain state population.
//!
//! The populator walks the ancestry of a header and gathers the bits,
//! versions and timestamps named by the height map, then works out the
//! version bits deployment states. Ancestry is read either from one of the
//! indexed chains or from a branch layered over the candidate chain.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{trace, warn};

use crate::{
    blockdata::block::{BlockHash, Header},
    chain::{
        Bits, ChainState, ChainStateData, Deployment, HeightMap, ThresholdState, Timestamps,
        Versions, state::version_signals,
    },
    consensus::Params,
    error::{Error, Result},
    interface::FastChain,
    pools::HeaderBranch,
    settings::Settings,
};

/// Where ancestor headers are read from.
#[derive(Clone, Copy)]
enum Ancestry<'a> {
    /// The candidate or confirmed index.
    Indexed { candidate: bool },
    /// A branch, falling back to the candidate index at or below its fork
    /// point.
    Branch(&'a HeaderBranch),
}

/// Builds [`ChainState`] values from the authoritative chain.
pub struct PopulateChainState {
    chain: Arc<dyn FastChain>,
    params: Params,
    settings: Settings,
    // Deployment state of a period keyed by the hash of the header that
    // closes the previous period.
    bip9_cache: Mutex<HashMap<(u8, BlockHash), ThresholdState>>,
}

impl PopulateChainState {
    /// Creates a populator using the network parameters of `settings`.
    pub fn new(chain: Arc<dyn FastChain>, settings: Settings) -> Self {
        let params = settings.params();
        Self::with_params(chain, settings, params)
    }

    /// Creates a populator with explicit consensus parameters.
    pub fn with_params(chain: Arc<dyn FastChain>, settings: Settings, params: Params) -> Self {
        PopulateChainState {
            chain,
            params,
            settings,
            bip9_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Chain state of the top of the selected chain.
    pub fn populate(&self, candidate: bool) -> Result<ChainState> {
        let top = self
            .chain
            .top(candidate)
            .map_err(|error| {
                warn!(%error, candidate, "Chain top lookup failed");
                Error::OperationFailed
            })?
            .ok_or(Error::MissingAncestor(0))?;
        self.populate_at(top.height, candidate)
    }

    /// Chain state of the indexed header at `height`.
    pub fn populate_at(&self, height: u32, candidate: bool) -> Result<ChainState> {
        let ancestry = Ancestry::Indexed { candidate };
        let header = self.header_at(height, ancestry)?;
        self.populate_all(&header, height, ancestry)
    }

    /// Chain state of `header` at `height`, whose ancestors are in the
    /// selected chain.
    pub fn populate_for(
        &self,
        header: &Header,
        height: u32,
        candidate: bool,
    ) -> Result<ChainState> {
        self.populate_all(header, height, Ancestry::Indexed { candidate })
    }

    /// Chain state of the top of `branch`.
    pub fn populate_branch(&self, branch: &HeaderBranch) -> Result<ChainState> {
        let top = branch.top().ok_or(Error::Internal("branch has no top header"))?;
        let height = branch
            .top_height()
            .ok_or(Error::Internal("branch height overflow"))?;
        self.populate_all(top, height, Ancestry::Branch(branch))
    }

    fn populate_all(
        &self,
        header: &Header,
        height: u32,
        ancestry: Ancestry<'_>,
    ) -> Result<ChainState> {
        let map = ChainState::get_map(height, &self.params, &self.settings);
        let mut data = ChainStateData {
            height,
            hash: header.block_hash(),
            bits: Bits {
                current: header.bits().to_consensus(),
                ordered: Vec::new(),
            },
            version: Versions {
                current: header.version(),
                ordered: Vec::new(),
            },
            timestamp: Timestamps {
                current: header.timestamp(),
                retarget: None,
                ordered: Vec::new(),
            },
            bip9_bit0: ThresholdState::Defined,
            bip9_bit1: ThresholdState::Defined,
        };

        self.populate_bits(&mut data, &map, ancestry)?;
        self.populate_versions(&mut data, &map, ancestry)?;
        self.populate_timestamps(&mut data, &map, ancestry)?;
        self.populate_bip9_bit0(&mut data, ancestry)?;
        self.populate_bip9_bit1(&mut data, ancestry)?;

        trace!(height, hash = %data.hash, "Populated chain state");
        Ok(ChainState::new(data, &self.params, &self.settings))
    }

    fn populate_bits(
        &self,
        data: &mut ChainStateData,
        map: &HeightMap,
        ancestry: Ancestry<'_>,
    ) -> Result<()> {
        data.bits.ordered = map
            .bits
            .heights()
            .map(|height| Ok(self.header_at(height, ancestry)?.bits().to_consensus()))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn populate_versions(
        &self,
        data: &mut ChainStateData,
        map: &HeightMap,
        ancestry: Ancestry<'_>,
    ) -> Result<()> {
        data.version.ordered = map
            .version
            .heights()
            .map(|height| Ok(self.header_at(height, ancestry)?.version()))
            .collect::<Result<_>>()?;
        Ok(())
    }

    fn populate_timestamps(
        &self,
        data: &mut ChainStateData,
        map: &HeightMap,
        ancestry: Ancestry<'_>,
    ) -> Result<()> {
        data.timestamp.ordered = map
            .timestamp
            .heights()
            .map(|height| Ok(self.header_at(height, ancestry)?.timestamp()))
            .collect::<Result<_>>()?;

        data.timestamp.retarget = match map.timestamp_retarget {
            Some(height) => Some(self.header_at(height, ancestry)?.timestamp()),
            None => None,
        };
        Ok(())
    }

    fn populate_bip9_bit0(&self, data: &mut ChainStateData, ancestry: Ancestry<'_>) -> Result<()> {
        data.bip9_bit0 =
            self.threshold_state(0, self.settings.bip9_bit0, data.height, ancestry)?;
        Ok(())
    }

    fn populate_bip9_bit1(&self, data: &mut ChainStateData, ancestry: Ancestry<'_>) -> Result<()> {
        data.bip9_bit1 =
            self.threshold_state(1, self.settings.bip9_bit1, data.height, ancestry)?;
        Ok(())
    }

    /// Deployment state of the period containing `height`.
    fn threshold_state(
        &self,
        bit: u8,
        deployment: Deployment,
        height: u32,
        ancestry: Ancestry<'_>,
    ) -> Result<ThresholdState> {
        let window = self.params.miner_confirmation_window.max(1);
        let threshold = self.params.rule_change_activation_threshold;
        let mut period = height.saturating_sub(height.checked_rem(window).unwrap_or(0));

        // Walk back to a period whose state is known.
        let mut pending = Vec::new();
        let mut state = loop {
            if let Some(base) = deployment.base_state(period, window) {
                break base;
            }

            let closing = period
                .checked_sub(1)
                .ok_or(Error::Internal("deployment period underflow"))?;
            let key = (bit, self.header_at(closing, ancestry)?.block_hash());
            if let Some(cached) = self.cached_state(&key) {
                break cached;
            }

            pending.push((period, key));
            period = period
                .checked_sub(window)
                .ok_or(Error::Internal("deployment period underflow"))?;
        };

        // Replay forward, tallying each previous period.
        for (period, key) in pending.into_iter().rev() {
            let first = period.saturating_sub(window);
            let mut tally = 0u32;
            for height in first..period {
                if version_signals(self.header_at(height, ancestry)?.version_bits(), bit) {
                    tally = tally.saturating_add(1);
                }
            }
            state = deployment.next_state(state, period, window, tally, threshold);
            self.bip9_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, state);
        }

        Ok(state)
    }

    fn cached_state(&self, key: &(u8, BlockHash)) -> Option<ThresholdState> {
        self.bip9_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn header_at(&self, height: u32, ancestry: Ancestry<'_>) -> Result<Header> {
        let (header, candidate) = match ancestry {
            Ancestry::Branch(branch) => match branch.header_at(height) {
                Some(header) => return Ok(*header),
                None => (self.chain.get_header(height, true), true),
            },
            Ancestry::Indexed { candidate } => (self.chain.get_header(height, candidate), candidate),
        };

        header
            .map_err(|error| {
                warn!(height, candidate, %error, "Ancestor lookup failed");
                Error::OperationFailed
            })?
            .ok_or(Error::MissingAncestor(height))
    }
}

impl std::fmt::Debug for PopulateChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopulateChainState")
            .field("params", &self.params)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain::{Checkpoint, Forks},
        interface::{MemoryChain, StoreError},
        network::Network,
        test_utils::{FailingChain, build_chain, build_chain_with, genesis},
    };

    fn populator(chain: Arc<dyn FastChain>) -> PopulateChainState {
        PopulateChainState::new(chain, Settings::new(Network::Regtest))
    }

    #[test]
    fn test_populate_top() {
        let headers = build_chain(genesis(), 12, 0);
        let chain = Arc::new(MemoryChain::with_headers(&headers));
        let state = populator(chain).populate(true).unwrap();

        assert_eq!(state.height(), 12);
        assert_eq!(state.hash(), headers[12].block_hash());
        assert_eq!(state.data().timestamp.ordered.len(), 11);
        assert_eq!(state.data().timestamp.ordered.last(), Some(&headers[11].timestamp()));
        assert_eq!(state.data().version.ordered.len(), 12);
        assert_eq!(state.data().bits.ordered, vec![headers[11].bits().to_consensus()]);
        assert_eq!(state.work_required(), headers[11].bits().to_consensus());
    }

    #[test]
    fn test_candidate_and_confirmed_agree_on_shared_ancestry() {
        let headers = build_chain(genesis(), 6, 0);
        let chain = Arc::new(MemoryChain::with_headers(&headers));
        let alternative = build_chain(headers[3], 3, 7);
        chain
            .reorganize(&Checkpoint::new(3, headers[3].block_hash()), &alternative[1..])
            .unwrap();

        let populate = populator(chain);
        let candidate = populate.populate_at(3, true).unwrap();
        let confirmed = populate.populate_at(3, false).unwrap();
        assert_eq!(candidate, confirmed);

        let candidate = populate.populate_at(5, true).unwrap();
        let confirmed = populate.populate_at(5, false).unwrap();
        assert_ne!(candidate.hash(), confirmed.hash());
    }

    #[test]
    fn test_branch_matches_indexed_population() {
        let headers = build_chain(genesis(), 8, 0);
        let indexed = Arc::new(MemoryChain::with_headers(&headers));
        let expected = populator(indexed).populate_at(8, true).unwrap();

        let partial = Arc::new(MemoryChain::with_headers(&headers[..5]));
        let branch = HeaderBranch::new(
            Checkpoint::new(4, headers[4].block_hash()),
            headers[5..].to_vec(),
        );
        let populated = populator(partial).populate_branch(&branch).unwrap();
        assert_eq!(populated, expected);
    }

    #[test]
    fn test_populate_for_unindexed_header() {
        let headers = build_chain(genesis(), 3, 0);
        let chain = Arc::new(MemoryChain::with_headers(&headers[..3]));
        let state = populator(chain).populate_for(&headers[3], 3, true).unwrap();
        assert_eq!(state.hash(), headers[3].block_hash());
        assert_eq!(state.previous_timestamp(), Some(headers[2].timestamp()));
    }

    #[test]
    fn test_missing_ancestor_fails_population() {
        let headers = build_chain(genesis(), 4, 0);
        let chain = Arc::new(MemoryChain::with_headers(&headers[..2]));
        assert_eq!(
            populator(chain).populate_for(&headers[4], 4, true),
            Err(Error::MissingAncestor(3))
        );
    }

    #[test]
    fn test_store_failure_fails_population() {
        let headers = build_chain(genesis(), 2, 0);
        let chain = FailingChain::new(MemoryChain::with_headers(&headers));
        chain.fail_lookups(StoreError::Backend("disk".to_string()));
        assert_eq!(
            populator(Arc::new(chain)).populate_at(2, true),
            Err(Error::OperationFailed)
        );
    }

    #[test]
    fn test_empty_branch_is_internal_error() {
        let chain = Arc::new(MemoryChain::new(genesis()));
        assert!(matches!(
            populator(chain).populate_branch(&HeaderBranch::empty()),
            Err(Error::Internal(_))
        ));
    }

    fn deployment_populator(
        chain: Arc<dyn FastChain>,
        lock_in_on_timeout: bool,
    ) -> PopulateChainState {
        let settings = Settings {
            forks: Forks::DEFAULT | Forks::BIP9_BIT0,
            bip9_bit0: Deployment {
                start_height: 4,
                timeout_height: 16,
                lock_in_on_timeout,
            },
            ..Settings::new(Network::Regtest)
        };
        let params = Params {
            miner_confirmation_window: 4,
            rule_change_activation_threshold: 3,
            ..Params::REGTEST
        };
        PopulateChainState::with_params(chain, settings, params)
    }

    #[test]
    fn test_deployment_locks_in_and_activates() {
        // Signal bit 0 from height 4 onwards.
        let headers = build_chain_with(genesis(), 16, 0, |height| {
            if height >= 4 { 0x2000_0001 } else { 0x2000_0000 }
        });
        let chain = Arc::new(MemoryChain::with_headers(&headers));
        let populate = deployment_populator(chain, false);

        let state = |height| populate.populate_at(height, true).unwrap().bip9_state(0);
        assert_eq!(state(3), ThresholdState::Defined);
        assert_eq!(state(4), ThresholdState::Started);
        assert_eq!(state(8), ThresholdState::LockedIn);
        assert_eq!(state(12), ThresholdState::Active);
        assert_eq!(state(15), ThresholdState::Active);

        let active = populate.populate_at(12, true).unwrap();
        assert!(active.is_enabled(Forks::BIP9_BIT0));
    }

    #[test]
    fn test_deployment_must_signal_before_timeout() {
        let headers = build_chain(genesis(), 14, 0);
        let chain = Arc::new(MemoryChain::with_headers(&headers));

        let forced = deployment_populator(chain.clone(), true);
        let state = forced.populate_at(12, true).unwrap();
        assert_eq!(state.bip9_state(0), ThresholdState::MustSignal);
        assert!(state.must_signal(0));
        assert_eq!(forced.populate_at(8, true).unwrap().bip9_state(0), ThresholdState::Started);

        let lapsing = deployment_populator(chain, false);
        assert_eq!(lapsing.populate_at(12, true).unwrap().bip9_state(0), ThresholdState::Started);
    }

    #[test]
    fn test_deployment_state_is_cached() {
        let headers = build_chain(genesis(), 12, 0);
        let chain = FailingChain::new(MemoryChain::with_headers(&headers));
        let chain = Arc::new(chain);
        let populate = deployment_populator(chain.clone(), false);

        let first = populate.populate_at(12, true).unwrap();
        let reads = chain.lookups();
        let second = populate.populate_at(12, true).unwrap();
        assert_eq!(first, second);
        // Without the cache the second pass would re-tally two periods.
        assert!(chain.lookups() - reads < reads);
    }
}
