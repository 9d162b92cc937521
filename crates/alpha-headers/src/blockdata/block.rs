//! Block headers.

pub mod header;

pub use bitcoin::BlockHash;
pub use header::{Header, InnerHeader};
