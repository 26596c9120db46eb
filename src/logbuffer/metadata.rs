//! Term and log metadata blocks.
//!
//! Both blocks are `#[repr(C)]` views laid directly over the mapped file, so
//! every field is atomic-typed and the field order is part of the on-disk
//! format. Zeroed memory is a valid (if uninitialised) state for both.

use std::mem::size_of;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};

use super::layout::{LOG_META_DATA_LENGTH, TERM_META_DATA_LENGTH};

/// Magic number identifying a log buffer file ("WOLFSTRM")
pub const LOG_MAGIC: u64 = u64::from_le_bytes(*b"WOLFSTRM");

/// Log buffer format version
pub const LOG_VERSION: i32 = 1;

/// Cleaning status of a term buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermStatus {
    /// Zeroed and ready to be rotated into
    Clean,
    /// Rotated out of and awaiting the cleaner
    NeedsCleaning,
}

impl TermStatus {
    fn from_raw(raw: i32) -> Self {
        if raw == 0 {
            TermStatus::Clean
        } else {
            TermStatus::NeedsCleaning
        }
    }

    fn to_raw(self) -> i32 {
        match self {
            TermStatus::Clean => 0,
            TermStatus::NeedsCleaning => 1,
        }
    }
}

/// Per-term metadata: the raw tail and the cleaning status.
///
/// The raw tail packs the term id in its high 32 bits and the tail offset in
/// its low 32 bits, so a single fetch-and-add claims space and identifies the
/// term it was claimed in.
#[repr(C, align(64))]
pub struct TermMetaData {
    raw_tail: AtomicI64,
    status: AtomicI32,
    _pad: [u8; TERM_META_DATA_LENGTH - 12],
}

const _: () = assert!(size_of::<TermMetaData>() == TERM_META_DATA_LENGTH);

impl TermMetaData {
    pub fn raw_tail_volatile(&self) -> i64 {
        self.raw_tail.load(Ordering::Acquire)
    }

    /// Claim `delta` bytes, returning the raw tail before the claim
    pub fn get_and_add_raw_tail(&self, delta: i32) -> i64 {
        self.raw_tail.fetch_add(delta as i64, Ordering::AcqRel)
    }

    pub fn cas_raw_tail(&self, expected: i64, update: i64) -> bool {
        self.raw_tail
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn set_raw_tail(&self, raw_tail: i64) {
        self.raw_tail.store(raw_tail, Ordering::Release);
    }

    pub fn status(&self) -> TermStatus {
        TermStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: TermStatus) {
        self.status.store(status.to_raw(), Ordering::Release);
    }
}

/// Log-wide metadata shared by every process mapping the log
#[repr(C)]
pub struct LogMetaData {
    magic: AtomicU64,
    version: AtomicI32,
    term_length: AtomicI32,
    initial_term_id: AtomicI32,
    active_term_count: AtomicI32,
    mtu_length: AtomicI32,
    session_id: AtomicI32,
    stream_id: AtomicI32,
    _reserved: AtomicI32,
    correlation_id: AtomicI64,
    time_of_last_status_message: AtomicI64,
    end_of_stream_position: AtomicI64,
    _pad: [u8; LOG_META_DATA_LENGTH - 64],
}

const _: () = assert!(size_of::<LogMetaData>() == LOG_META_DATA_LENGTH);

impl LogMetaData {
    pub fn magic(&self) -> u64 {
        self.magic.load(Ordering::Acquire)
    }

    pub fn version(&self) -> i32 {
        self.version.load(Ordering::Acquire)
    }

    /// Stamp the format header. Written last when creating a log so a reader
    /// that sees the magic also sees the fields stored before it.
    pub fn stamp_header(&self, term_length: usize) {
        self.version.store(LOG_VERSION, Ordering::Relaxed);
        self.term_length.store(term_length as i32, Ordering::Relaxed);
        self.magic.store(LOG_MAGIC, Ordering::Release);
    }

    pub fn term_length(&self) -> usize {
        self.term_length.load(Ordering::Acquire) as usize
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id.load(Ordering::Acquire)
    }

    pub fn set_initial_term_id(&self, term_id: i32) {
        self.initial_term_id.store(term_id, Ordering::Release);
    }

    pub fn active_term_count(&self) -> i32 {
        self.active_term_count.load(Ordering::Acquire)
    }

    pub fn set_active_term_count(&self, term_count: i32) {
        self.active_term_count.store(term_count, Ordering::Release);
    }

    /// Advance the active term count; only one racer can succeed per value
    pub fn cas_active_term_count(&self, expected: i32, update: i32) -> bool {
        self.active_term_count
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn mtu_length(&self) -> usize {
        self.mtu_length.load(Ordering::Acquire) as usize
    }

    pub fn set_mtu_length(&self, mtu_length: usize) {
        self.mtu_length.store(mtu_length as i32, Ordering::Release);
    }

    pub fn session_id(&self) -> i32 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id.load(Ordering::Acquire)
    }

    pub fn correlation_id(&self) -> i64 {
        self.correlation_id.load(Ordering::Acquire)
    }

    pub fn set_stream_identity(&self, session_id: i32, stream_id: i32, correlation_id: i64) {
        self.session_id.store(session_id, Ordering::Relaxed);
        self.stream_id.store(stream_id, Ordering::Relaxed);
        self.correlation_id.store(correlation_id, Ordering::Release);
    }

    /// Time in epoch millis the transport last heard from a subscriber
    pub fn time_of_last_status_message(&self) -> i64 {
        self.time_of_last_status_message.load(Ordering::Acquire)
    }

    pub fn set_time_of_last_status_message(&self, time_ms: i64) {
        self.time_of_last_status_message.store(time_ms, Ordering::Release);
    }

    pub fn end_of_stream_position(&self) -> i64 {
        self.end_of_stream_position.load(Ordering::Acquire)
    }

    pub fn set_end_of_stream_position(&self, position: i64) {
        self.end_of_stream_position.store(position, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_status_round_trip() {
        assert_eq!(TermStatus::from_raw(TermStatus::Clean.to_raw()), TermStatus::Clean);
        assert_eq!(
            TermStatus::from_raw(TermStatus::NeedsCleaning.to_raw()),
            TermStatus::NeedsCleaning
        );
    }

    #[test]
    fn test_magic_spells_name() {
        assert_eq!(&LOG_MAGIC.to_le_bytes(), b"WOLFSTRM");
    }
}
