use thiserror::Error;

use crate::interface::StoreError;

/// Errors produced while checking, accepting and organizing headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Header timestamp is too far in the future.
    #[error("Header timestamp is too far in the future")]
    FuturisticTimestamp,
    /// Header bits do not decode to a valid target within the network limit.
    #[error("Proof of work target is invalid or above the network limit")]
    InvalidProofOfWork,
    /// Header proof-of-work hash does not meet its own target.
    #[error("Proof of work hash is above the target")]
    HighHash,
    /// Header bits differ from the work required at its height.
    #[error("Header bits do not match the required work")]
    IncorrectProofOfWork,
    /// Header timestamp is not above the median time past.
    #[error("Header timestamp is not above the median time past")]
    TimestampTooEarly,
    /// Retarget header timestamp is too far before its parent.
    #[error("Header timestamp violates the time warp limit")]
    TimeWarp,
    /// Header version is below the minimum version in force.
    #[error("Header version is obsolete")]
    OldVersionBlock,
    /// Header does not signal a deployment bit that is mandatory.
    #[error("Header does not signal mandatory version bit {0}")]
    MissingVersionSignal(u8),
    /// Header hash conflicts with a checkpoint at its height.
    #[error("Header conflicts with a checkpoint")]
    CheckpointsFailed,
    /// Header parent is neither indexed nor pooled.
    #[error("Header parent is unknown")]
    OrphanHeader,
    /// An ancestor required for chain state population was not found.
    #[error("Missing ancestor at height {0}")]
    MissingAncestor(u32),
    /// Header is already indexed or pooled.
    #[error("Header is already known")]
    DuplicateBlock,
    /// Branch work does not exceed the work of the chain it would replace.
    #[error("Branch has insufficient work")]
    InsufficientWork,
    /// A dependency query failed.
    #[error("Operation failed")]
    OperationFailed,
    /// The organizer or validator is not running.
    #[error("Service stopped")]
    ServiceStopped,
    /// A contract between components was violated.
    #[error("Internal error: {0}")]
    Internal(&'static str),
    /// The authoritative chain failed to persist a reorganization.
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

/// Error classes that decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rejected by context-free checks.
    Structural,
    /// Already known.
    Duplicate,
    /// Rejected against the derived chain state.
    Contextual,
    /// Valid but not enough work; re-pooled.
    InsufficientWork,
    /// A dependency failed; the submission may be retried.
    Operational,
    /// The service is not running.
    Stopped,
    /// The authoritative chain is inconsistent.
    Fatal,
    /// Contract violation.
    Internal,
}

impl Error {
    /// Returns the class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FuturisticTimestamp | Error::InvalidProofOfWork | Error::HighHash => {
                ErrorKind::Structural
            }
            Error::DuplicateBlock => ErrorKind::Duplicate,
            Error::IncorrectProofOfWork
            | Error::TimestampTooEarly
            | Error::TimeWarp
            | Error::OldVersionBlock
            | Error::MissingVersionSignal(_)
            | Error::CheckpointsFailed
            | Error::OrphanHeader => ErrorKind::Contextual,
            Error::InsufficientWork => ErrorKind::InsufficientWork,
            Error::MissingAncestor(_) | Error::OperationFailed => ErrorKind::Operational,
            Error::ServiceStopped => ErrorKind::Stopped,
            Error::Store(_) => ErrorKind::Fatal,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if the authoritative chain can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

/// Result type for header processing.
pub type Result<T> = std::result::Result<T, Error>;
