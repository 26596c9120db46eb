//! WolfStream - Memory-Mapped Log Buffers for Zero-Copy Messaging
//!
//! The transport-buffer core of a low-latency message-passing layer: a
//! partitioned, memory-mapped log shared between producers and a transport,
//! the factory that allocates such logs on disk, and the publication handle
//! producers write through under flow control.
//!
//! # Architecture
//!
//! A log holds three term buffers used round-robin, a metadata block per
//! term and one log-wide metadata block. Producers claim space in the active
//! term with a single atomic fetch-and-add; the producer whose claim crosses
//! the end of a term pads it out and rotates to the next one. Coordination is
//! purely through atomics in the mapped memory, so producers may live in
//! separate processes.
//!
//! # Features
//!
//! - Lock-free, multi-producer `offer` and zero-copy `try_claim`
//! - Deterministic on-disk naming so independent processes map the same log
//! - Sparse or eagerly allocated storage
//! - Reference-counted publications that unmap exactly once
//! - Distinct error log for allocation and mapping failures

pub mod buffer;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logbuffer;
pub mod publication;

pub use config::WolfStreamConfig;
pub use error::{Error, OfferError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::buffer::{RawLog, RawLogFactory, StreamIdentity};
    pub use crate::config::WolfStreamConfig;
    pub use crate::diagnostics::DistinctErrorLog;
    pub use crate::error::{Error, OfferError, Result};
    pub use crate::logbuffer::{LogBuffers, LogLayout};
    pub use crate::publication::{
        BufferClaim, LocalConductor, Publication, PublicationConductor, PublicationLimit,
    };
}
