//! Publication Limit
//!
//! Flow-control ceiling advertised by the transport. Producers read it on
//! every claim; the transport raises it as subscribers consume.

use std::sync::atomic::{AtomicI64, Ordering};

/// Position a publication may not claim past
#[derive(Debug, Default)]
pub struct PublicationLimit {
    position: AtomicI64,
}

impl PublicationLimit {
    pub fn new(initial: i64) -> Self {
        Self {
            position: AtomicI64::new(initial),
        }
    }

    pub fn get_volatile(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn set_ordered(&self, position: i64) {
        self.position.store(position, Ordering::Release);
    }

    /// Raise the limit, ignoring updates that would lower it
    pub fn propose_max(&self, position: i64) -> bool {
        self.position.fetch_max(position, Ordering::AcqRel) < position
    }
}
