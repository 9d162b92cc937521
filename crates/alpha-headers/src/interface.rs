//! Interfaces to the authoritative header chain.

pub mod fast_chain;
pub mod memory;

pub use fast_chain::{FastChain, StoreError, StoreResult};
pub use memory::MemoryChain;
