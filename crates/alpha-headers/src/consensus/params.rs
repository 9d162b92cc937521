use crate::{network::Network, pow::Target};

/// Consensus parameters for different networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    /// Network for which these parameters are defined.
    pub network: Network,
    /// The block height which BIP34 becomes active.
    pub bip34_height: u32,
    /// The block height which BIP65 becomes active.
    pub bip65_height: u32,
    /// The block height which BIP66 becomes active.
    pub bip66_height: u32,
    /// Minimum blocks signalling a version bit within one confirmation
    /// window for the deployment to lock in. Examples: 1815 for 90%, 108 for
    /// test chains.
    pub rule_change_activation_threshold: u32,
    /// Number of blocks with the same set of rules.
    pub miner_confirmation_window: u32,
    /// The maximum attainable target value for these params.
    pub max_attainable_target: Target,
    /// Expected amount of time to mine one block, in seconds.
    pub pow_target_spacing: u64,
    /// Difficulty recalculation timespan, in seconds.
    pub pow_target_timespan: u64,
    /// Determines whether minimal difficulty may be used for blocks or not.
    pub allow_min_difficulty_blocks: bool,
    /// Determines whether retargeting is disabled for this network or not.
    pub no_pow_retargeting: bool,
}

impl Params {
    /// Consensus parameters for the Unicity mainnet network.
    pub const MAINNET: Self = Self {
        network: Network::Mainnet,
        bip34_height: 70_228, // 953181e5afbf5a0052bdf405d6a23360ba6afa9c4a5bb2eda4a9b8f5de52fdcc
        bip65_height: 70_228, // 953181e5afbf5a0052bdf405d6a23360ba6afa9c4a5bb2eda4a9b8f5de52fdcc
        bip66_height: 70_228, // 953181e5afbf5a0052bdf405d6a23360ba6afa9c4a5bb2eda4a9b8f5de52fdcc
        rule_change_activation_threshold: 1815, // 90% of 2016
        miner_confirmation_window: 2016,
        max_attainable_target: Target::mainnet_max_target(),
        pow_target_spacing: 2 * 60,                 // 2 minutes
        pow_target_timespan: 14 * 24 * 60 * 60 / 5, // two weeks / 5
        allow_min_difficulty_blocks: false,
        no_pow_retargeting: false,
    };
    /// Consensus parameters for the Unicity regtest network.
    pub const REGTEST: Self = Self {
        network: Network::Regtest,
        bip34_height: 1, // Always active
        bip65_height: 1, // Always active
        bip66_height: 1, // Always active
        rule_change_activation_threshold: 108, // 75% of 144
        miner_confirmation_window: 144,
        max_attainable_target: Target::regtest_max_target(),
        pow_target_spacing: 2 * 60,
        pow_target_timespan: 14 * 24 * 60 * 60 / 5,
        allow_min_difficulty_blocks: true,
        no_pow_retargeting: true,
    };
    /// Consensus parameters for the Unicity testnet network.
    pub const TESTNET: Self = Self {
        network: Network::Testnet,
        bip34_height: 1,
        bip65_height: 1,
        bip66_height: 1,
        rule_change_activation_threshold: 1512, // 75% of 2016
        miner_confirmation_window: 2016,
        max_attainable_target: Target::mainnet_max_target(),
        pow_target_spacing: 2 * 60,
        pow_target_timespan: 14 * 24 * 60 * 60 / 5,
        allow_min_difficulty_blocks: true,
        no_pow_retargeting: false,
    };

    /// Retargets never move the target by more than this factor per period.
    pub const RETARGET_FACTOR: u64 = 4;

    /// Seconds a retarget-height header may precede its parent under the
    /// time-warp patch.
    pub const TIME_WARP_LIMIT_SECONDS: u32 = 600;

    /// Number of headers between difficulty adjustments.
    ///
    /// Returns at least one so that height arithmetic never divides by zero.
    pub fn difficulty_adjustment_interval(&self) -> u32 {
        let interval = self
            .pow_target_timespan
            .checked_div(self.pow_target_spacing)
            .unwrap_or(1);
        u32::try_from(interval).unwrap_or(u32::MAX).max(1)
    }

    /// Returns true if the difficulty is recomputed at `height`.
    pub fn is_retarget_height(&self, height: u32) -> bool {
        height
            .checked_rem(self.difficulty_adjustment_interval())
            .is_some_and(|rem| rem == 0)
    }

    /// Height of the first header in the retarget period containing `height`.
    pub fn retarget_period_start(&self, height: u32) -> u32 {
        let rem = height
            .checked_rem(self.difficulty_adjustment_interval())
            .unwrap_or(0);
        height.saturating_sub(rem)
    }

    /// Compact form of the network proof-of-work limit.
    pub fn pow_limit_bits(&self) -> u32 {
        self.max_attainable_target
            .to_compact()
            .map_or(0, |bits| bits.to_consensus())
    }
}
