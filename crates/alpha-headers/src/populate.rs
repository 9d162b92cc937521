//! Chain state population for headers and branches.

pub mod chain_state;
pub mod header;

pub use chain_state::PopulateChainState;
pub use header::PopulateHeader;
