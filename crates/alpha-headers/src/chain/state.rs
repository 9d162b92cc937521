//! Chain state: the consensus context of a header at a given height.
//!
//! A [`ChainState`] is built from [`ChainStateData`], the raw ancestry values
//! gathered by the populator, plus configuration. Everything else (active
//! forks, minimum version, work required, median time past) is derived once
//! at construction, so the state is a pure function of its inputs.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::{
    blockdata::block::BlockHash,
    chain::Checkpoint,
    consensus::Params,
    pow::{CompactTarget, Target},
    settings::Settings,
};

/// Number of timestamps whose median bounds the next timestamp.
pub const MEDIAN_TIME_PAST_INTERVAL: u32 = 11;

/// Version bits must carry this prefix in their top three bits to signal.
const VERSION_BITS_TOP_MASK: u32 = 0xe000_0000;
const VERSION_BITS_TOP_BITS: u32 = 0x2000_0000;

/// Set of consensus rule forks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Forks(u32);

impl Forks {
    /// No forks.
    pub const NONE: Forks = Forks(0);
    /// Difficulty retargeting; header bits must equal the work required.
    pub const RETARGET: Forks = Forks(1 << 0);
    /// Height in coinbase; minimum version 2.
    pub const BIP34: Forks = Forks(1 << 1);
    /// Strict DER signatures; minimum version 3.
    pub const BIP66: Forks = Forks(1 << 2);
    /// CHECKLOCKTIMEVERIFY; minimum version 4.
    pub const BIP65: Forks = Forks(1 << 3);
    /// BIP34/66/65 activate at fixed heights instead of by super-majority.
    pub const BIP90: Forks = Forks(1 << 4);
    /// Retarget headers may not precede their parent by more than the
    /// time-warp limit.
    pub const TIME_WARP_PATCH: Forks = Forks(1 << 5);
    /// Version bit 0 deployment.
    pub const BIP9_BIT0: Forks = Forks(1 << 6);
    /// Version bit 1 deployment.
    pub const BIP9_BIT1: Forks = Forks(1 << 7);
    /// Forks enabled unless configured otherwise.
    pub const DEFAULT: Forks = Forks(
        Self::RETARGET.0
            | Self::BIP34.0
            | Self::BIP66.0
            | Self::BIP65.0
            | Self::BIP90.0
            | Self::TIME_WARP_PATCH.0,
    );
    /// Every known fork.
    pub const ALL: Forks = Forks(Self::DEFAULT.0 | Self::BIP9_BIT0.0 | Self::BIP9_BIT1.0);

    /// Creates a set from raw flags.
    pub const fn from_bits(bits: u32) -> Self {
        Forks(bits)
    }

    /// Returns the raw flags.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every fork in `other` is in this set.
    pub const fn contains(self, other: Forks) -> bool {
        self.0 & other.0 == other.0
    }

    /// Adds the forks in `other`.
    pub fn insert(&mut self, other: Forks) {
        self.0 |= other.0;
    }

    /// Removes the forks in `other`.
    pub fn remove(&mut self, other: Forks) {
        self.0 &= !other.0;
    }

    /// The deployment fork for a version bit.
    pub fn for_version_bit(bit: u8) -> Forks {
        if bit == 0 {
            Forks::BIP9_BIT0
        } else {
            Forks::BIP9_BIT1
        }
    }
}

impl BitOr for Forks {
    type Output = Forks;

    fn bitor(self, rhs: Forks) -> Forks {
        Forks(self.0 | rhs.0)
    }
}

/// Activation state of a version bits deployment for one period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdState {
    /// Before the start height.
    Defined,
    /// Signalling is being tallied.
    Started,
    /// Last period before timeout with lock-in on timeout; signalling is
    /// mandatory.
    MustSignal,
    /// Threshold reached; activates next period.
    LockedIn,
    /// Rules are enforced.
    Active,
    /// Timed out without locking in.
    Failed,
}

/// Height-based schedule of a version bits deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Deployment {
    /// First height at which signalling is counted.
    pub start_height: u32,
    /// Height at which an unsuccessful deployment fails.
    pub timeout_height: u32,
    /// Force lock-in by making signalling mandatory before the timeout.
    pub lock_in_on_timeout: bool,
}

impl Deployment {
    /// A deployment that never starts.
    pub const NEVER: Deployment = Deployment {
        start_height: u32::MAX,
        timeout_height: u32::MAX,
        lock_in_on_timeout: false,
    };

    /// State of a period that can be decided without looking further back.
    ///
    /// Any period beginning before the start height is `Defined`, and the
    /// first period at or after it is `Started` regardless of signalling.
    pub fn base_state(&self, period_start: u32, window: u32) -> Option<ThresholdState> {
        if period_start < self.start_height {
            Some(ThresholdState::Defined)
        } else if period_start < self.start_height.saturating_add(window) {
            Some(ThresholdState::Started)
        } else {
            None
        }
    }

    /// State of the period starting at `period_start`, given the state and
    /// signalling tally of the previous period.
    pub fn next_state(
        &self,
        previous: ThresholdState,
        period_start: u32,
        window: u32,
        tally: u32,
        threshold: u32,
    ) -> ThresholdState {
        match previous {
            ThresholdState::Defined if period_start >= self.start_height => {
                ThresholdState::Started
            }
            ThresholdState::Defined => ThresholdState::Defined,
            ThresholdState::Started if tally >= threshold => ThresholdState::LockedIn,
            ThresholdState::Started
                if self.lock_in_on_timeout
                    && period_start.saturating_add(window) >= self.timeout_height =>
            {
                ThresholdState::MustSignal
            }
            ThresholdState::Started if period_start >= self.timeout_height => {
                ThresholdState::Failed
            }
            ThresholdState::Started => ThresholdState::Started,
            ThresholdState::MustSignal => ThresholdState::LockedIn,
            ThresholdState::LockedIn | ThresholdState::Active => ThresholdState::Active,
            ThresholdState::Failed => ThresholdState::Failed,
        }
    }
}

impl Default for Deployment {
    fn default() -> Self {
        Deployment::NEVER
    }
}

/// Returns true if a version signals the given deployment bit.
pub fn version_signals(version: u32, bit: u8) -> bool {
    let Some(mask) = 1u32.checked_shl(u32::from(bit)) else {
        return false;
    };
    version & VERSION_BITS_TOP_MASK == VERSION_BITS_TOP_BITS && version & mask != 0
}

/// Compact targets of the header and of its ancestors in the bits window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bits {
    /// Bits of the header itself.
    pub current: u32,
    /// Ancestor bits, oldest first.
    pub ordered: Vec<u32>,
}

/// Versions of the header and of its ancestors in the sample window.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Versions {
    /// Version of the header itself.
    pub current: i32,
    /// Ancestor versions, oldest first.
    pub ordered: Vec<i32>,
}

/// Timestamps of the header and of its ancestors.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Timestamps {
    /// Timestamp of the header itself.
    pub current: u32,
    /// Timestamp of the first header of the closing retarget period.
    pub retarget: Option<u32>,
    /// Ancestor timestamps in the median window, oldest first.
    pub ordered: Vec<u32>,
}

/// Raw values gathered from the ancestry of a header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainStateData {
    /// Height of the header.
    pub height: u32,
    /// Hash of the header.
    pub hash: BlockHash,
    /// Bits window.
    pub bits: Bits,
    /// Versions window.
    pub version: Versions,
    /// Timestamps window.
    pub timestamp: Timestamps,
    /// Version bit 0 deployment state for the header's period.
    pub bip9_bit0: ThresholdState,
    /// Version bit 1 deployment state for the header's period.
    pub bip9_bit1: ThresholdState,
}

/// A contiguous run of heights, `[start, start + count)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeightRange {
    /// First height.
    pub start: u32,
    /// Number of heights.
    pub count: u32,
}

impl HeightRange {
    /// The `count` heights immediately below `height`, fewer near genesis.
    pub fn below(height: u32, count: u32) -> Self {
        let count = count.min(height);
        HeightRange {
            start: height.saturating_sub(count),
            count,
        }
    }

    /// Iterates the heights in ascending order.
    pub fn heights(&self) -> std::ops::Range<u32> {
        self.start..self.start.saturating_add(self.count)
    }

    /// Returns true if the range holds no heights.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Heights whose values are needed to build the state at a height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeightMap {
    /// Heights whose bits feed the work required.
    pub bits: HeightRange,
    /// Heights whose versions are tallied.
    pub version: HeightRange,
    /// Heights whose timestamps form the median window.
    pub timestamp: HeightRange,
    /// Height of the first header of the closing retarget period.
    pub timestamp_retarget: Option<u32>,
}

/// Consensus context of a header at a given height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainState {
    data: ChainStateData,
    params: Params,
    configured: Forks,
    forks: Forks,
    checkpoints: Vec<Checkpoint>,
    minimum_version: i32,
    work_required: u32,
    median_time_past: u32,
}

impl ChainState {
    /// Derives the chain state from gathered ancestry values.
    ///
    /// # Arguments
    ///
    /// * `data` - Ancestry values for the header
    /// * `params` - Consensus parameters of the network
    /// * `settings` - Configured forks, checkpoints and version thresholds
    pub fn new(data: ChainStateData, params: &Params, settings: &Settings) -> Self {
        let forks = Self::active_forks(&data, params, settings);
        let minimum_version = Self::minimum_version_for(forks);
        let work_required = Self::work_required_for(&data, params, forks);
        let median_time_past = Self::median_time_past_of(&data.timestamp.ordered);
        let checkpoints = settings
            .checkpoints
            .iter()
            .filter(|checkpoint| checkpoint.height >= data.height)
            .copied()
            .collect();

        ChainState {
            data,
            params: *params,
            configured: settings.forks,
            forks,
            checkpoints,
            minimum_version,
            work_required,
            median_time_past,
        }
    }

    /// Heights the populator must read to build the state at `height`.
    pub fn get_map(height: u32, params: &Params, settings: &Settings) -> HeightMap {
        let retargeting =
            settings.forks.contains(Forks::RETARGET) && !params.no_pow_retargeting;
        let retarget_height = params.is_retarget_height(height);

        let bits = if retargeting && params.allow_min_difficulty_blocks && !retarget_height {
            let start = params.retarget_period_start(height);
            HeightRange {
                start,
                count: height.saturating_sub(start),
            }
        } else {
            HeightRange::below(height, 1)
        };

        let interval = params.difficulty_adjustment_interval();
        let timestamp_retarget = if retargeting && retarget_height && height >= interval {
            height.checked_sub(interval)
        } else {
            None
        };

        HeightMap {
            bits,
            version: HeightRange::below(height, settings.version_sample_size),
            timestamp: HeightRange::below(height, MEDIAN_TIME_PAST_INTERVAL),
            timestamp_retarget,
        }
    }

    fn active_forks(data: &ChainStateData, params: &Params, settings: &Settings) -> Forks {
        let configured = settings.forks;
        let height = data.height;
        let fixed_heights = configured.contains(Forks::BIP90);
        let threshold = usize::try_from(settings.version_enforce_threshold).unwrap_or(usize::MAX);
        let enforced = |version: i32| {
            data.version
                .ordered
                .iter()
                .filter(|ordered| **ordered >= version)
                .count()
                >= threshold
        };

        let mut active = Forks::NONE;
        for fork in [Forks::RETARGET, Forks::TIME_WARP_PATCH] {
            if configured.contains(fork) {
                active.insert(fork);
            }
        }

        let upgrades = [
            (Forks::BIP34, params.bip34_height, 2),
            (Forks::BIP66, params.bip66_height, 3),
            (Forks::BIP65, params.bip65_height, 4),
        ];
        for (fork, activation_height, version) in upgrades {
            if configured.contains(fork)
                && ((fixed_heights && height >= activation_height) || enforced(version))
            {
                active.insert(fork);
            }
        }

        if configured.contains(Forks::BIP9_BIT0) && data.bip9_bit0 == ThresholdState::Active {
            active.insert(Forks::BIP9_BIT0);
        }
        if configured.contains(Forks::BIP9_BIT1) && data.bip9_bit1 == ThresholdState::Active {
            active.insert(Forks::BIP9_BIT1);
        }

        active
    }

    fn minimum_version_for(forks: Forks) -> i32 {
        if forks.contains(Forks::BIP65) {
            4
        } else if forks.contains(Forks::BIP66) {
            3
        } else if forks.contains(Forks::BIP34) {
            2
        } else {
            1
        }
    }

    fn work_required_for(data: &ChainStateData, params: &Params, forks: Forks) -> u32 {
        if data.height == 0 {
            return data.bits.current;
        }

        let previous = data.bits.ordered.last().copied().unwrap_or(data.bits.current);
        if !forks.contains(Forks::RETARGET) || params.no_pow_retargeting {
            return previous;
        }

        if params.is_retarget_height(data.height) {
            return Self::retarget(data, params, previous);
        }

        if params.allow_min_difficulty_blocks {
            return Self::minimum_difficulty(data, params, previous);
        }

        previous
    }

    fn retarget(data: &ChainStateData, params: &Params, previous: u32) -> u32 {
        let limit = params.max_attainable_target;
        let limit_bits = params.pow_limit_bits();
        let (Some(first), Some(last)) = (data.timestamp.retarget, data.timestamp.ordered.last())
        else {
            return previous;
        };

        let timespan = params.pow_target_timespan;
        let minimum = timespan.checked_div(Params::RETARGET_FACTOR).unwrap_or(0);
        let maximum = timespan.saturating_mul(Params::RETARGET_FACTOR);
        let actual = u64::from(last.saturating_sub(first)).clamp(minimum, maximum);

        let Some(target) = Target::from_compact(CompactTarget::new(previous)) else {
            return limit_bits;
        };

        target
            .scale(actual, timespan)
            .filter(|retargeted| *retargeted <= limit)
            .unwrap_or(limit)
            .to_compact()
            .map_or(limit_bits, CompactTarget::to_consensus)
    }

    fn minimum_difficulty(data: &ChainStateData, params: &Params, previous: u32) -> u32 {
        let limit_bits = params.pow_limit_bits();
        let previous_time = data.timestamp.ordered.last().copied().unwrap_or(0);
        let spacing = u32::try_from(params.pow_target_spacing.saturating_mul(2)).unwrap_or(u32::MAX);

        // A header that follows a long gap may use the limit itself.
        if data.timestamp.current > previous_time.saturating_add(spacing) {
            return limit_bits;
        }

        // Otherwise the last difficulty that was not the limit in this period.
        data.bits
            .ordered
            .iter()
            .rev()
            .find(|bits| **bits != limit_bits)
            .or_else(|| data.bits.ordered.first())
            .copied()
            .unwrap_or(previous)
    }

    fn median_time_past_of(timestamps: &[u32]) -> u32 {
        let mut sorted = timestamps.to_vec();
        sorted.sort_unstable();
        sorted
            .len()
            .checked_div(2)
            .and_then(|middle| sorted.get(middle))
            .copied()
            .unwrap_or(0)
    }

    /// Height of the header.
    pub fn height(&self) -> u32 {
        self.data.height
    }

    /// Hash of the header.
    pub fn hash(&self) -> BlockHash {
        self.data.hash
    }

    /// Gathered ancestry values.
    pub fn data(&self) -> &ChainStateData {
        &self.data
    }

    /// Consensus parameters the state was built with.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Forks in force at this height.
    pub fn forks(&self) -> Forks {
        self.forks
    }

    /// Returns true if `fork` is in force at this height.
    pub fn is_enabled(&self, fork: Forks) -> bool {
        self.forks.contains(fork)
    }

    /// Checkpoints at or above this height.
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Lowest header version accepted at this height.
    pub fn minimum_version(&self) -> i32 {
        self.minimum_version
    }

    /// Compact target the header must carry.
    pub fn work_required(&self) -> u32 {
        self.work_required
    }

    /// Median of the ancestor timestamps in the median window.
    pub fn median_time_past(&self) -> u32 {
        self.median_time_past
    }

    /// Timestamp of the parent header, if any.
    pub fn previous_timestamp(&self) -> Option<u32> {
        self.data.timestamp.ordered.last().copied()
    }

    /// Returns true if the difficulty is recomputed at this height.
    pub fn is_retarget_height(&self) -> bool {
        self.data.height != 0 && self.params.is_retarget_height(self.data.height)
    }

    /// Deployment state of a version bit for this height's period.
    pub fn bip9_state(&self, bit: u8) -> ThresholdState {
        if bit == 0 {
            self.data.bip9_bit0
        } else {
            self.data.bip9_bit1
        }
    }

    /// Returns true if headers at this height must signal `bit`.
    pub fn must_signal(&self, bit: u8) -> bool {
        self.configured.contains(Forks::for_version_bit(bit))
            && self.bip9_state(bit) == ThresholdState::MustSignal
    }
}
