//! Header chain organizer for the Unicity Alpha network.
//!
//! This library accepts block headers observed on the network, validates them
//! against consensus rules, extends or reorganizes the candidate header chain
//! and decides when accumulated proof of work justifies moving the candidate
//! tip.

#![cfg_attr(test, allow(clippy::arithmetic_side_effects))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::cast_sign_loss))]
#![cfg_attr(test, allow(clippy::indexing_slicing))]
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::cast_possible_truncation))]

/// Block header data structures.
pub mod blockdata;
/// Chain state, checkpoints and fork flags.
pub mod chain;
/// Consensus parameters.
pub mod consensus;
/// Persistent header index backed by redb.
pub mod database;
/// Error types shared by the validation and organization pipeline.
pub mod error;
/// Interfaces to the authoritative chain.
pub mod interface;
/// Out-of-band header metadata.
pub mod metadata;
/// Two-tier priority mutual exclusion.
pub mod mutex;
/// Network types.
pub mod network;
/// Header organization.
pub mod organizer;
/// Header branches and the unconnected header pool.
pub mod pools;
/// Chain state population.
pub mod populate;
/// Proof of work related functionality.
pub mod pow;
/// Organizer settings.
pub mod settings;
/// Header validation.
pub mod validate;

#[cfg(test)]
pub(crate) mod test_utils;

pub use blockdata::block::{BlockHash, Header};
pub use chain::{ChainState, Checkpoint, ForkPoint, Forks};
pub use error::{Error, ErrorKind, Result};
pub use interface::{FastChain, MemoryChain, StoreError, StoreResult};
pub use metadata::{HeaderMetadata, MetadataTable};
pub use mutex::{PrioritizedMutex, Priority, PriorityGuard, PriorityLock};
pub use network::Network;
pub use organizer::HeaderOrganizer;
pub use pools::{HeaderBranch, HeaderPool, MemoryHeaderPool};
pub use settings::Settings;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
