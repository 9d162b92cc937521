use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    blockdata::block::Header,
    consensus::Params,
    error::{Error, Result},
    interface::FastChain,
    metadata::MetadataTable,
    populate::{PopulateChainState, PopulateHeader},
    pools::HeaderBranch,
    pow::{ProofOfWork, Target, proof_of_work},
    settings::Settings,
};

/// Two-phase header validation.
///
/// [`check`](ValidateHeader::check) applies the context-free rules and is
/// always available. [`accept`](ValidateHeader::accept) populates the chain
/// state of a branch top and applies the contextual rules; it refuses work
/// while the validator is stopped.
pub struct ValidateHeader {
    stopped: AtomicBool,
    populator: PopulateHeader,
    metadata: Arc<MetadataTable>,
    pow: Box<dyn ProofOfWork>,
    pow_limit: Target,
    timestamp_limit_seconds: u32,
}

impl ValidateHeader {
    /// Creates a stopped validator for the network of `settings`.
    pub fn new(
        chain: Arc<dyn FastChain>,
        metadata: Arc<MetadataTable>,
        settings: Settings,
    ) -> Self {
        let params = settings.params();
        Self::with_params(chain, metadata, settings, params)
    }

    /// Creates a stopped validator with explicit consensus parameters.
    pub fn with_params(
        chain: Arc<dyn FastChain>,
        metadata: Arc<MetadataTable>,
        settings: Settings,
        params: Params,
    ) -> Self {
        let pow = proof_of_work(settings.scrypt_proof_of_work);
        let timestamp_limit_seconds = settings.timestamp_limit_seconds;
        let chain_state = PopulateChainState::with_params(chain.clone(), settings, params);

        ValidateHeader {
            stopped: AtomicBool::new(true),
            populator: PopulateHeader::new(chain_state, chain, metadata.clone()),
            metadata,
            pow,
            pow_limit: params.max_attainable_target,
            timestamp_limit_seconds,
        }
    }

    /// Starts accepting work. Returns true.
    pub fn start(&self) -> bool {
        self.stopped.store(false, Ordering::Release);
        true
    }

    /// Stops accepting work. Returns true.
    pub fn stop(&self) -> bool {
        self.stopped.store(true, Ordering::Release);
        true
    }

    /// Returns true if the validator is stopped.
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Context-free validation of a header.
    ///
    /// Never consults or modifies header metadata, so repeated calls give the
    /// same result.
    pub fn check(&self, header: &Header) -> Result<()> {
        header.check(self.timestamp_limit_seconds, self.pow_limit, self.pow.as_ref())
    }

    /// Contextual validation of the top header of a branch.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the top header is valid in its chain state, or was
    ///   already validated with its block
    /// * `Err(Error::ServiceStopped)` - If the validator stopped
    /// * `Err(Error::Internal)` - If the branch is empty or no chain state was
    ///   attached
    /// * `Err(Error)` - The population failure or the first contextual rule
    ///   the header breaks
    pub fn accept(&self, branch: &HeaderBranch) -> Result<()> {
        let top = branch.top().ok_or(Error::Internal("branch has no top header"))?;
        let populated = self.populator.populate(branch);

        if self.stopped() {
            return Err(Error::ServiceStopped);
        }
        populated?;

        let hash = top.block_hash();
        if self.metadata.is_validated(&hash) {
            return Ok(());
        }

        let state = self
            .metadata
            .state(&hash)
            .ok_or(Error::Internal("chain state not populated"))?;
        top.accept(&state)
    }
}

impl std::fmt::Debug for ValidateHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidateHeader")
            .field("stopped", &self.stopped())
            .field("pow", &self.pow)
            .field("pow_limit", &self.pow_limit)
            .field("timestamp_limit_seconds", &self.timestamp_limit_seconds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::Hash;

    use super::*;
    use crate::{
        chain::{Bits, ChainState, ChainStateData, Checkpoint, ThresholdState, Timestamps, Versions},
        interface::MemoryChain,
        network::Network,
        test_utils::{build_chain, genesis, mine},
    };

    struct Fixture {
        headers: Vec<Header>,
        metadata: Arc<MetadataTable>,
        validator: ValidateHeader,
    }

    /// A chain of `indexed + 1` headers with one more header to accept.
    fn fixture(indexed: u32) -> Fixture {
        let headers = build_chain(genesis(), indexed + 1, 0);
        let chain = Arc::new(MemoryChain::with_headers(&headers[..headers.len() - 1]));
        let metadata = Arc::new(MetadataTable::new());
        let validator =
            ValidateHeader::new(chain, metadata.clone(), Settings::new(Network::Regtest));
        validator.start();
        Fixture {
            headers,
            metadata,
            validator,
        }
    }

    fn branch_to(fixture: &Fixture, top: Header) -> HeaderBranch {
        let height = u32::try_from(fixture.headers.len() - 2).unwrap();
        HeaderBranch::new(
            Checkpoint::new(height, fixture.headers[fixture.headers.len() - 2].block_hash()),
            vec![top],
        )
    }

    #[test]
    fn test_lifecycle() {
        let fixture = fixture(1);
        assert!(!fixture.validator.stopped());
        assert!(fixture.validator.stop());
        assert!(fixture.validator.stopped());
        assert!(fixture.validator.start());
        assert!(!fixture.validator.stopped());
    }

    #[test]
    fn test_check_is_repeatable_and_leaves_metadata() {
        let fixture = fixture(1);
        let header = fixture.headers[2];
        assert_eq!(fixture.validator.check(&header), Ok(()));
        assert_eq!(fixture.validator.check(&header), Ok(()));
        assert!(fixture.metadata.is_empty());
    }

    #[test]
    fn test_accept_valid_branch() {
        let fixture = fixture(3);
        let top = *fixture.headers.last().unwrap();
        assert_eq!(fixture.validator.accept(&branch_to(&fixture, top)), Ok(()));
        assert_eq!(fixture.metadata.state(&top.block_hash()).unwrap().height(), 4);
    }

    #[test]
    fn test_accept_contextual_failure() {
        let fixture = fixture(3);
        let parent = fixture.headers[3];
        // Timestamp at the median of the previous eleven.
        let early = mine(parent.block_hash(), fixture.headers[2].timestamp());
        assert_eq!(
            fixture.validator.accept(&branch_to(&fixture, early)),
            Err(Error::TimestampTooEarly)
        );
    }

    #[test]
    fn test_accept_when_stopped() {
        let fixture = fixture(1);
        fixture.validator.stop();
        let top = fixture.headers[2];
        assert_eq!(
            fixture.validator.accept(&branch_to(&fixture, top)),
            Err(Error::ServiceStopped)
        );
    }

    #[test]
    fn test_accept_empty_branch() {
        let fixture = fixture(1);
        assert!(matches!(
            fixture.validator.accept(&HeaderBranch::empty()),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_accept_reports_population_failure() {
        let fixture = fixture(1);
        let top = fixture.headers[2];
        let branch = HeaderBranch::new(Checkpoint::new(5, top.previous_block_hash()), vec![top]);
        assert_eq!(fixture.validator.accept(&branch), Err(Error::MissingAncestor(5)));
        assert!(fixture.metadata.get(&top.block_hash()).is_none());
    }

    #[test]
    fn test_validated_header_skips_contextual_rules() {
        let fixture = fixture(1);
        let top = fixture.headers[2];
        let hash = top.block_hash();

        // A state the header could never satisfy.
        let bogus = ChainState::new(
            ChainStateData {
                height: 2,
                hash,
                bits: Bits {
                    current: 0x1d00ffff,
                    ordered: vec![0x1d00ffff],
                },
                version: Versions::default(),
                timestamp: Timestamps {
                    current: 0,
                    retarget: None,
                    ordered: vec![u32::MAX],
                },
                bip9_bit0: ThresholdState::Defined,
                bip9_bit1: ThresholdState::Defined,
            },
            &Params::REGTEST,
            &Settings {
                checkpoints: vec![Checkpoint::new(2, bitcoin::BlockHash::all_zeros())],
                ..Settings::new(Network::Regtest)
            },
        );
        fixture.metadata.set_state(hash, Arc::new(bogus));
        assert_eq!(
            fixture.validator.accept(&branch_to(&fixture, top)),
            Err(Error::CheckpointsFailed)
        );

        fixture.metadata.set_validated(hash);
        assert_eq!(fixture.validator.accept(&branch_to(&fixture, top)), Ok(()));
    }
}
