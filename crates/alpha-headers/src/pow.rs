//! Proof of work targets, compact bits and chain work.
//!
//! A [`Target`] is the 256-bit threshold a header's proof-of-work hash must not
//! exceed. Headers carry it in the 32-bit [`CompactTarget`] encoding. [`Work`]
//! is the expected number of hashes needed to meet a target, and cumulative
//! work is what orders competing header branches.

use std::fmt;

use bitcoin::{consensus::encode::serialize, hashes::Hash};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::blockdata::block::Header;

/// A difficulty target expressed as an unsigned 256-bit integer.
///
/// Lower targets mean higher difficulty.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Target(U256);

impl Target {
    /// Wraps a raw 256-bit value.
    pub const fn new(target: U256) -> Self {
        Target(target)
    }

    /// The zero target, which no hash can meet.
    pub const fn zero() -> Self {
        Target(U256::zero())
    }

    /// Maximum attainable target on mainnet and testnet (compact `0x1d0fffff`).
    pub const fn mainnet_max_target() -> Self {
        Target(U256([0, 0, 0, 0x0000_000f_ffff_0000]))
    }

    /// Maximum attainable target on regtest (compact `0x207fffff`).
    pub const fn regtest_max_target() -> Self {
        Target(U256([0, 0, 0, 0x7fff_ff00_0000_0000]))
    }

    /// Parses a big-endian hexadecimal representation.
    pub fn from_hex(hex: &str) -> Option<Self> {
        U256::from_str_radix(hex, 16).ok().map(Target)
    }

    /// Creates a target from its big-endian byte representation.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(U256::from_big_endian(bytes))
    }

    /// Returns the underlying integer.
    pub fn as_u256(self) -> U256 {
        self.0
    }

    /// Returns true if the target is zero.
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if a proof-of-work hash, in internal (little-endian) byte
    /// order, does not exceed this target.
    pub fn is_met_by(self, hash: &[u8; 32]) -> bool {
        U256::from_little_endian(hash) <= self.0
    }

    /// Calculates the difficulty relative to a maximum attainable target.
    ///
    /// Returns `None` for a zero target. Values beyond `u128::MAX` saturate.
    pub fn difficulty(self, max_attainable_target: Target) -> Option<u128> {
        let diff = max_attainable_target.0.checked_div(self.0)?;
        if diff > U256::from(u128::MAX) {
            Some(u128::MAX)
        } else {
            Some(diff.as_u128())
        }
    }

    /// Multiplies the target by `numerator / denominator`.
    ///
    /// Returns `None` on overflow or a zero denominator. Used by difficulty
    /// retargeting, where the ratio is the actual over the expected timespan.
    pub fn scale(self, numerator: u64, denominator: u64) -> Option<Self> {
        let product = self.0.checked_mul(U256::from(numerator))?;
        let quotient = product.checked_div(U256::from(denominator))?;
        Some(Target(quotient))
    }

    /// Converts the target into the work it represents, `2^256 / (target + 1)`.
    pub fn to_work(self) -> Option<Work> {
        if self.0.is_zero() {
            return Some(Work::new(U256::max_value()));
        }

        if self.0 == U256::one() {
            return Some(Work::new(U256::max_value()));
        }

        if self.0 == U256::max_value() {
            return Some(Work::new(U256::one()));
        }

        // 2^256 does not fit, so compute (~x / (x + 1)) + 1 instead.
        let increment = self.0.checked_add(U256::one())?;
        let inverted = !self.0;
        let result = inverted.checked_div(increment)?;
        Some(Work::new(result.checked_add(U256::one())?))
    }

    /// Expands a compact target.
    ///
    /// The compact format stores a one-byte exponent and a three-byte
    /// mantissa: `target = mantissa * 256^(exponent - 3)`. Returns `None` for
    /// a negative (sign bit set) or zero mantissa, and for exponents that
    /// would overflow 256 bits.
    pub fn from_compact(compact: CompactTarget) -> Option<Self> {
        let n = compact.0;
        let exponent = n >> 24;
        let mantissa = n & 0x007fffff;

        if n & 0x00800000 != 0 {
            return None;
        }

        if mantissa == 0 {
            return None;
        }

        if exponent > 32 {
            return None;
        }

        let base = U256::from(mantissa);

        #[allow(clippy::arithmetic_side_effects, reason = "Shift bounds are checked")]
        let target = if exponent <= 3 {
            let shift_bits = 3u32.checked_sub(exponent)?.checked_mul(8)?;
            base >> shift_bits
        } else {
            let shift_bits = exponent.checked_sub(3)?.checked_mul(8)?;
            let shifted = base << shift_bits;
            // Bits pushed out of the top mean the value did not fit.
            if shifted >> shift_bits != base {
                return None;
            }
            shifted
        };

        Some(Target(target))
    }

    /// Encodes the target in compact form.
    ///
    /// Precision below the top three significant bytes is dropped, so
    /// `from_compact(to_compact(t)) <= t`.
    pub fn to_compact(self) -> Option<CompactTarget> {
        if self.0.is_zero() {
            return Some(CompactTarget(0));
        }

        let bit_length = u32::try_from(self.0.bits()).ok()?;
        let size = bit_length.checked_add(7)?.checked_div(8)?;

        let mantissa = if size <= 3 {
            let shift_bits = 3u32.checked_sub(size)?.checked_mul(8)?;
            self.0.low_u32().checked_shl(shift_bits)? & 0x00ffffff
        } else {
            let shift_bits = size.checked_sub(3)?.checked_mul(8)?;
            #[allow(clippy::arithmetic_side_effects, reason = "Shift is below 256 bits")]
            let shifted = self.0 >> shift_bits;
            shifted.low_u32() & 0x00ffffff
        };

        // A set sign bit would make the mantissa negative, so move a byte
        // into the exponent instead.
        let (mantissa, size) = if mantissa & 0x00800000 != 0 {
            (mantissa.checked_shr(8)?, size.checked_add(1)?)
        } else {
            (mantissa, size)
        };

        if size > 0xff {
            return None;
        }

        Some(CompactTarget(size.checked_shl(24)? | mantissa))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:064x}", self.0)
    }
}

/// Compact representation of a target, as carried in header `bits`.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CompactTarget(u32);

impl CompactTarget {
    /// Wraps a raw consensus value.
    pub const fn new(bits: u32) -> Self {
        CompactTarget(bits)
    }

    /// Returns the raw consensus value.
    pub const fn to_consensus(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CompactTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<bitcoin::CompactTarget> for CompactTarget {
    fn from(bits: bitcoin::CompactTarget) -> Self {
        CompactTarget(bits.to_consensus())
    }
}

impl From<CompactTarget> for bitcoin::CompactTarget {
    fn from(bits: CompactTarget) -> Self {
        bitcoin::CompactTarget::from_consensus(bits.0)
    }
}

/// Expected number of hashes represented by one or more headers.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Work(U256);

impl Work {
    /// No work at all.
    pub const ZERO: Work = Work(U256::zero());

    /// Wraps a raw 256-bit value.
    pub const fn new(work: U256) -> Self {
        Work(work)
    }

    /// Returns the underlying integer.
    pub fn as_u256(self) -> U256 {
        self.0
    }

    /// Adds work, saturating at the maximum representable value.
    pub fn saturating_add(self, other: Work) -> Work {
        Work(self.0.saturating_add(other.0))
    }

    /// Subtracts work, saturating at zero.
    pub fn saturating_sub(self, other: Work) -> Work {
        Work(self.0.saturating_sub(other.0))
    }

    /// Big-endian byte representation, used for storage.
    pub fn to_be_bytes(self) -> [u8; 32] {
        self.0.to_big_endian()
    }

    /// Creates work from its big-endian byte representation.
    pub fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        Work(U256::from_big_endian(bytes))
    }
}

impl fmt::Display for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl std::iter::Sum for Work {
    fn sum<I: Iterator<Item = Work>>(iter: I) -> Self {
        iter.fold(Work::ZERO, Work::saturating_add)
    }
}

/// A proof-of-work hash function.
///
/// The hash is returned in internal byte order and compared against the
/// header's target as a little-endian integer.
pub trait ProofOfWork: fmt::Debug + Send + Sync {
    /// Computes the proof-of-work hash of a header, or `None` if it cannot be
    /// computed.
    fn pow_hash(&self, header: &Header) -> Option<[u8; 32]>;
}

/// Bitcoin's double SHA-256 proof of work. The hash is the block hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256dProofOfWork;

impl ProofOfWork for Sha256dProofOfWork {
    fn pow_hash(&self, header: &Header) -> Option<[u8; 32]> {
        Some(header.block_hash().to_byte_array())
    }
}

/// Litecoin-style scrypt proof of work (N = 1024, r = 1, p = 1) over the
/// serialized header, with the header as both password and salt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScryptProofOfWork;

impl ScryptProofOfWork {
    const LOG_N: u8 = 10;
    const R: u32 = 1;
    const P: u32 = 1;
}

impl ProofOfWork for ScryptProofOfWork {
    fn pow_hash(&self, header: &Header) -> Option<[u8; 32]> {
        let params = scrypt::Params::new(Self::LOG_N, Self::R, Self::P, 32).ok()?;
        let data = serialize(header.inner());
        let mut output = [0u8; 32];
        scrypt::scrypt(&data, &data, &params, &mut output).ok()?;
        Some(output)
    }
}

/// Selects the proof-of-work function for the configured algorithm.
pub fn proof_of_work(scrypt: bool) -> Box<dyn ProofOfWork> {
    if scrypt {
        Box::new(ScryptProofOfWork)
    } else {
        Box::new(Sha256dProofOfWork)
    }
}
