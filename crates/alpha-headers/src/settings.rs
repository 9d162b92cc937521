use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    chain::{Checkpoint, Deployment, Forks},
    consensus::Params,
    network::Network,
};

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON for [`Settings`].
    #[error("Failed to parse settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Organizer and validation settings.
///
/// Every field has a default, so a settings file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Network whose consensus parameters apply.
    pub network: Network,
    /// Rule forks that may become active.
    pub forks: Forks,
    /// Hashes pinned at heights.
    pub checkpoints: Vec<Checkpoint>,
    /// Seconds a header timestamp may run ahead of the local clock.
    pub timestamp_limit_seconds: u32,
    /// Use scrypt instead of double SHA-256 for proof of work.
    pub scrypt_proof_of_work: bool,
    /// Number of recent versions tallied for super-majority activation.
    pub version_sample_size: u32,
    /// Versions within the sample required to enforce an upgrade.
    pub version_enforce_threshold: u32,
    /// Version bit 0 deployment schedule.
    pub bip9_bit0: Deployment,
    /// Version bit 1 deployment schedule.
    pub bip9_bit1: Deployment,
    /// Pooled headers this far below the candidate top are discarded.
    pub pool_prune_depth: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            network: Network::Mainnet,
            forks: Forks::DEFAULT,
            checkpoints: Vec::new(),
            timestamp_limit_seconds: 2 * 60 * 60,
            scrypt_proof_of_work: false,
            version_sample_size: 1000,
            version_enforce_threshold: 950,
            bip9_bit0: Deployment::NEVER,
            bip9_bit1: Deployment::NEVER,
            pool_prune_depth: 2016,
        }
    }
}

impl Settings {
    /// Default settings for a network.
    pub fn new(network: Network) -> Self {
        Settings {
            network,
            ..Settings::default()
        }
    }

    /// Parses settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Consensus parameters of the configured network.
    pub fn params(&self) -> Params {
        self.network.consensus_params()
    }
}
