//! Term Appender and Rotation
//!
//! Producers claim space in the active term with a single fetch-and-add on
//! its raw tail, so concurrent claims always receive disjoint ranges. The one
//! claim whose range straddles the end of the term pads out the remainder;
//! every claim past the end fails. Either way the producer then asks for a
//! rotation, which advances the active term count by compare-and-set so only
//! one racer rotates.

use super::buffers::{MappedRegion, TermBuffer};
use super::frame::{aligned_frame_length, frame_length_ordered, HeaderWriter, HEADER_LENGTH};
use super::layout::{index_by_term_count, pack_tail, term_id, PARTITION_COUNT};
use super::metadata::{TermMetaData, TermStatus};

/// Result of claiming space in a term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Frame reserved at `term_offset`; the term tail now sits at `resulting_offset`
    Appended {
        term_offset: usize,
        resulting_offset: usize,
    },
    /// This claim crossed the end of the term and padded the remainder
    Tripped,
    /// The term had already been filled by earlier claims
    Failed,
}

/// Result of asking for a rotation to the next term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateOutcome {
    /// This caller advanced the active term
    Rotated,
    /// Another producer advanced the active term first
    AlreadyRotated,
    /// The next term has not been cleaned yet
    Unavailable,
}

/// Appends frames into one partition of a mapped log
pub struct TermAppender<'a> {
    term: TermBuffer<'a>,
    meta: &'a TermMetaData,
    partition: usize,
}

impl<'a> TermAppender<'a> {
    pub fn new(region: &'a MappedRegion<'_>, partition: usize) -> Self {
        Self {
            term: region.term_buffer(partition),
            meta: region.term_meta_data(partition),
            partition,
        }
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn term_buffer(&self) -> TermBuffer<'a> {
        self.term
    }

    pub fn raw_tail_volatile(&self) -> i64 {
        self.meta.raw_tail_volatile()
    }

    /// Reserve a frame for `length` payload bytes and write its uncommitted
    /// header. The caller fills the payload and commits the frame.
    pub fn claim(&self, header: &HeaderWriter, length: usize) -> (i32, AppendOutcome) {
        let frame_length = length + HEADER_LENGTH;
        let aligned_length = aligned_frame_length(length);
        let raw_tail = self.meta.get_and_add_raw_tail(aligned_length as i32);
        let term_id = term_id(raw_tail);
        let term_offset = (raw_tail & 0xFFFF_FFFF) as usize;
        let term_length = self.term.capacity();

        let resulting_offset = term_offset + aligned_length;
        if resulting_offset > term_length {
            return (term_id, self.handle_end_of_term(header, term_offset, term_id));
        }

        header.write(&self.term, term_offset, frame_length, term_id);
        (
            term_id,
            AppendOutcome::Appended {
                term_offset,
                resulting_offset,
            },
        )
    }

    /// Claim, copy and commit a message carried in a single frame
    pub fn append_unfragmented(&self, header: &HeaderWriter, payload: &[u8]) -> (i32, AppendOutcome) {
        let (term_id, outcome) = self.claim(header, payload.len());
        if let AppendOutcome::Appended { term_offset, .. } = outcome {
            self.term.put_bytes(term_offset + HEADER_LENGTH, payload);
            frame_length_ordered(&self.term, term_offset, (payload.len() + HEADER_LENGTH) as i32);
        }
        (term_id, outcome)
    }

    fn handle_end_of_term(&self, header: &HeaderWriter, term_offset: usize, term_id: i32) -> AppendOutcome {
        let term_length = self.term.capacity();
        if term_offset > term_length {
            return AppendOutcome::Failed;
        }
        if term_offset < term_length {
            header.write_padding(&self.term, term_offset, term_length - term_offset, term_id);
        }
        AppendOutcome::Tripped
    }
}

/// Stamp the tails for a fresh log whose first term is `initial_term_id`.
///
/// Partition `i > 0` is tagged with the term id it held three rotations ago,
/// which is what [`rotate_log`] expects to find before taking it over.
pub fn initialise_tails(region: &MappedRegion<'_>, initial_term_id: i32) {
    region.term_meta_data(0).set_raw_tail(pack_tail(initial_term_id, 0));
    for partition in 1..PARTITION_COUNT {
        let expected_term_id = initial_term_id
            .wrapping_add(partition as i32)
            .wrapping_sub(PARTITION_COUNT as i32);
        region.term_meta_data(partition).set_raw_tail(pack_tail(expected_term_id, 0));
    }
    let log_meta = region.log_meta_data();
    log_meta.set_initial_term_id(initial_term_id);
    log_meta.set_active_term_count(0);
}

/// Check that every tail carries a term id consistent with its partition
/// and that the active partition holds the active term.
///
/// A log whose tails were never stamped by [`initialise_tails`] fails this.
pub fn tails_consistent(region: &MappedRegion<'_>) -> bool {
    let log_meta = region.log_meta_data();
    let initial_term_id = log_meta.initial_term_id();
    let active_term_count = log_meta.active_term_count();

    (0..PARTITION_COUNT).all(|partition| {
        let tail_term_id = term_id(region.term_meta_data(partition).raw_tail_volatile());
        let term_count = tail_term_id.wrapping_sub(initial_term_id);
        if partition == index_by_term_count(active_term_count) {
            term_count == active_term_count
        } else {
            term_count.rem_euclid(PARTITION_COUNT as i32) as usize == partition
        }
    })
}

/// Rotate from the term at `term_count`/`term_id` to the next one.
///
/// Safe to call from every producer that saw the term end: the next tail is
/// only reset while it still carries its stale term id, and the active term
/// count only moves by a compare-and-set from `term_count`. A next tail
/// holding any other term id than the stale or the new one leaves the log
/// where it is.
pub fn rotate_log(region: &MappedRegion<'_>, term_count: i32, term_id_now: i32) -> RotateOutcome {
    let log_meta = region.log_meta_data();
    if log_meta.active_term_count() != term_count {
        return RotateOutcome::AlreadyRotated;
    }

    let next_term_id = term_id_now.wrapping_add(1);
    let next_term_count = term_count.wrapping_add(1);
    let next_meta = region.term_meta_data(index_by_term_count(next_term_count));
    let expected_term_id = next_term_id.wrapping_sub(PARTITION_COUNT as i32);

    loop {
        let raw_tail = next_meta.raw_tail_volatile();
        let next_tail_term_id = term_id(raw_tail);
        if next_tail_term_id == next_term_id {
            break;
        }
        if next_tail_term_id != expected_term_id {
            tracing::warn!(
                "Refusing rotation to term {}: partition tail holds term {}, expected {}",
                next_term_id,
                next_tail_term_id,
                expected_term_id
            );
            return RotateOutcome::Unavailable;
        }
        if next_meta.status() != TermStatus::Clean {
            return RotateOutcome::Unavailable;
        }
        if next_meta.cas_raw_tail(raw_tail, pack_tail(next_term_id, 0)) {
            break;
        }
    }

    if log_meta.cas_active_term_count(term_count, next_term_count) {
        region
            .term_meta_data(index_by_term_count(term_count))
            .set_status(TermStatus::NeedsCleaning);
        tracing::debug!(
            "Rotated log from term {} to term {} (count {})",
            term_id_now,
            next_term_id,
            next_term_count
        );
        RotateOutcome::Rotated
    } else {
        RotateOutcome::AlreadyRotated
    }
}

/// Zero a drained term and mark it clean so it can be rotated into again.
///
/// Returns `false` if the partition is active or already clean. Deciding
/// that every consumer has drained the term is up to the caller.
pub fn clean_term(region: &MappedRegion<'_>, partition: usize) -> bool {
    let active = index_by_term_count(region.log_meta_data().active_term_count());
    let meta = region.term_meta_data(partition);
    if partition == active || meta.status() == TermStatus::Clean {
        return false;
    }

    let term = region.term_buffer(partition);
    term.set_memory(0, term.capacity(), 0);
    meta.set_status(TermStatus::Clean);
    true
}
