//! Derived chain context used to validate a header at a given height.

pub mod checkpoint;
pub mod state;

pub use checkpoint::{Checkpoint, CheckpointError, ForkPoint};
pub use state::{
    Bits, ChainState, ChainStateData, Deployment, Forks, HeightMap, HeightRange, ThresholdState,
    Timestamps, Versions,
};
