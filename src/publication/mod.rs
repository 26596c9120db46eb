//! Publication Module
//!
//! The producer side of a stream: the `Publication` handle, zero-copy
//! buffer claims, the flow-control limit and the conductor it reports to.

pub mod claim;
pub mod conductor;
pub mod handle;
pub mod limit;

pub use claim::BufferClaim;
pub use conductor::{LocalConductor, PublicationConductor};
pub use handle::Publication;
pub use limit::PublicationLimit;
