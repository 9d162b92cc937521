//! Block data structures.

pub mod block;
pub mod genesis;

pub use genesis::GenesisInfo;
