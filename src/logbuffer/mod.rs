//! Log Buffer Module
//!
//! The shared, memory-mapped structure producers append into: three term
//! buffers used round-robin, their metadata, and the rules for turning a
//! stream position into a term and an offset.

pub mod appender;
mod buffers;
pub mod frame;
pub mod layout;
pub mod metadata;

pub use appender::{
    clean_term, initialise_tails, rotate_log, tails_consistent, AppendOutcome, RotateOutcome,
    TermAppender,
};
pub use buffers::{LogBuffers, MappedRegion, TermBuffer};
pub use frame::HeaderWriter;
pub use layout::{
    LogLayout, LOG_META_DATA_LENGTH, PARTITION_COUNT, TERM_MAX_LENGTH, TERM_META_DATA_LENGTH,
    TERM_MIN_LENGTH,
};
pub use metadata::{LogMetaData, TermMetaData, TermStatus};
