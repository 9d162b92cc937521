//! Consensus rules shared by header validation.

pub mod params;

pub use params::Params;
