//! Raw Log Storage
//!
//! Backing files for log buffers: where they live, how they are allocated
//! and validated, and the factory that hands them out.

pub mod factory;
pub mod naming;
pub mod raw_log;

pub use factory::{RawLogFactory, IPC_CHANNEL};
pub use naming::{stream_location, FileMappingConvention};
pub use raw_log::{RawLog, StreamIdentity};
