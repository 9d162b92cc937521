//! Header organization.

pub mod header;

pub use header::HeaderOrganizer;
