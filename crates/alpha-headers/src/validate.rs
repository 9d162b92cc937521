//! Header validation.

pub mod header;

pub use header::ValidateHeader;
