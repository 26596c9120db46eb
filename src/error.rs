//! WolfStream Error Types
//!
//! Two families live here. [`Error`] covers hard failures: bad configuration
//! and storage that could not be created or mapped. [`OfferError`] covers the
//! outcome codes a producer sees from `offer`/`try_claim`, most of which are
//! expected steady-state conditions rather than faults.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for WolfStream operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfStream error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Term length {length} is not a power of two in [{min}, {max}]")]
    InvalidTermLength { length: usize, min: usize, max: usize },

    #[error("Image term buffer larger than max length: {length} > {max}")]
    TermLengthExceedsMax { length: usize, max: usize },

    // Storage errors
    #[error("Log buffer corrupted at {path:?}: {reason}")]
    LogBufferCorrupted { path: PathBuf, reason: String },

    #[error("Log buffer already closed: {0}")]
    LogBufferClosed(String),

    #[error("Log buffer tails not initialised: {0}")]
    LogBufferUninitialised(String),

    #[error("Failed to allocate log buffer at {path:?}: {source}")]
    ResourceAllocation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Hard errors abort the attempt that raised them and are never retried
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Check if this error was raised while validating configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::InvalidTermLength { .. }
                | Error::TermLengthExceedsMax { .. }
        )
    }
}

/// Outcome of a publication operation that did not produce a position.
///
/// The negative codes are stable and match what a transport or a monitoring
/// tool reads back from a shared position counter.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// No subscriber has advertised a flow-control limit yet
    #[error("publication is not connected")]
    NotConnected,

    /// The claim would pass the advertised flow-control limit
    #[error("publication is back pressured")]
    BackPressured,

    /// Term rotation or term cleaning is in progress
    #[error("administrative action in progress")]
    AdminAction,

    #[error("publication is closed")]
    Closed,

    /// The logical position space of the stream is exhausted
    #[error("maximum stream position exceeded")]
    MaxPositionExceeded,

    /// The caller passed a message longer than the log can ever hold
    #[error("message length {length} exceeds max message length {max}")]
    MessageTooLarge { length: usize, max: usize },
}

impl OfferError {
    /// Sentinel code for this outcome
    pub fn code(&self) -> i64 {
        match self {
            OfferError::NotConnected => -1,
            OfferError::BackPressured => -2,
            OfferError::AdminAction => -3,
            OfferError::Closed => -4,
            OfferError::MaxPositionExceeded => -5,
            OfferError::MessageTooLarge { .. } => -6,
        }
    }

    /// Transient flow conditions the caller should retry later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OfferError::NotConnected | OfferError::BackPressured | OfferError::AdminAction
        )
    }

    /// Conditions after which the handle or stream must not be used again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OfferError::Closed | OfferError::MaxPositionExceeded)
    }

    /// Programming errors on the caller's side
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, OfferError::MessageTooLarge { .. })
    }
}
