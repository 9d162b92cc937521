//! Header branches and the pool of headers not yet on the candidate chain.

pub mod branch;
pub mod header_pool;

pub use branch::HeaderBranch;
pub use header_pool::{HeaderPool, MemoryHeaderPool};
