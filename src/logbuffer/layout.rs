//! Log Buffer Layout
//!
//! A log buffer is one contiguous region split into three term buffers, three
//! term metadata blocks and one log metadata block:
//!
//! ```text
//! ┌────────────────┬────────────────┬────────────────┐
//! │  Term 0        │  Term 1        │  Term 2        │  3 × term length
//! ├────────────────┴────────────────┴────────────────┤
//! │  Term meta 0  │  Term meta 1  │  Term meta 2     │  3 × 128 bytes
//! ├──────────────────────────────────────────────────┤
//! │  Log meta                                        │  4096 bytes
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Every rule in this module is a pure function of the term length, so any
//! process mapping the same file derives the same partitioning.

use crate::error::{Error, Result};

/// Number of term buffers a log rotates through
pub const PARTITION_COUNT: usize = 3;

/// Smallest permitted term length
pub const TERM_MIN_LENGTH: usize = 64 * 1024;

/// Largest permitted term length
pub const TERM_MAX_LENGTH: usize = 1024 * 1024 * 1024;

/// Length of each term metadata block (two cache lines)
pub const TERM_META_DATA_LENGTH: usize = 128;

/// Length of the log metadata block
pub const LOG_META_DATA_LENGTH: usize = 4096;

/// Check a term length is a power of two within the permitted range
pub fn check_term_length(term_length: usize) -> Result<()> {
    check_term_length_within(term_length, TERM_MAX_LENGTH)
}

/// Check a term length against a tighter configured maximum
pub fn check_term_length_within(term_length: usize, max_length: usize) -> Result<()> {
    let max = max_length.min(TERM_MAX_LENGTH);
    if term_length < TERM_MIN_LENGTH || !term_length.is_power_of_two() {
        return Err(Error::InvalidTermLength {
            length: term_length,
            min: TERM_MIN_LENGTH,
            max,
        });
    }
    if term_length > max {
        return Err(Error::TermLengthExceedsMax {
            length: term_length,
            max,
        });
    }
    Ok(())
}

/// Partition selected by a monotonic term count
pub fn index_by_term_count(term_count: i32) -> usize {
    (term_count as u32 as usize) % PARTITION_COUNT
}

/// Partition holding a given term id
pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    index_by_term_count(active_term_id.wrapping_sub(initial_term_id))
}

/// Partition holding a given stream position
pub fn index_by_position(position: i64, position_bits_to_shift: u32) -> usize {
    ((position as u64 >> position_bits_to_shift) % PARTITION_COUNT as u64) as usize
}

/// Number of bits a position is shifted by to get its term count
pub fn position_bits_to_shift(term_length: usize) -> u32 {
    term_length.trailing_zeros()
}

/// Offset within its term of a stream position
pub fn term_offset(position: i64, term_length: usize) -> usize {
    (position & (term_length as i64 - 1)) as usize
}

/// Term id a stream position falls in
pub fn compute_term_id(initial_term_id: i32, position_bits_to_shift: u32, position: i64) -> i32 {
    initial_term_id.wrapping_add((position >> position_bits_to_shift) as i32)
}

/// Stream position at which a term begins
pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = active_term_id.wrapping_sub(initial_term_id) as i64;
    term_count << position_bits_to_shift
}

/// Stream position of an offset within a term
pub fn compute_position(
    active_term_id: i32,
    term_offset: usize,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    compute_term_begin_position(active_term_id, position_bits_to_shift, initial_term_id)
        + term_offset as i64
}

/// Largest message that can be offered into a term of this length.
///
/// An eighth of the term keeps a message from ever needing more than a
/// single rotation to find room.
pub fn compute_max_message_length(term_length: usize) -> usize {
    term_length / 8
}

/// Total length of a log buffer's backing storage
pub fn compute_log_length(term_length: usize) -> usize {
    PARTITION_COUNT * term_length + PARTITION_COUNT * TERM_META_DATA_LENGTH + LOG_META_DATA_LENGTH
}

/// Pack a term id and tail offset into a raw tail value
pub fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as i64 & 0xFFFF_FFFF)
}

/// Term id held in the high half of a raw tail
pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Tail offset held in the low half of a raw tail, capped at the term length
pub fn term_offset_from_tail(raw_tail: i64, term_length: usize) -> usize {
    ((raw_tail & 0xFFFF_FFFF) as usize).min(term_length)
}

/// Validated partitioning of a log buffer for one term length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLayout {
    term_length: usize,
    position_bits_to_shift: u32,
}

impl LogLayout {
    /// Create a layout, rejecting invalid term lengths
    pub fn new(term_length: usize) -> Result<Self> {
        Self::with_max(term_length, TERM_MAX_LENGTH)
    }

    /// Create a layout whose term length must not exceed `max_length`
    pub fn with_max(term_length: usize, max_length: usize) -> Result<Self> {
        check_term_length_within(term_length, max_length)?;
        Ok(Self {
            term_length,
            position_bits_to_shift: position_bits_to_shift(term_length),
        })
    }

    /// Recover the layout from the length of existing storage
    pub fn from_log_length(log_length: usize) -> Result<Self> {
        let fixed = PARTITION_COUNT * TERM_META_DATA_LENGTH + LOG_META_DATA_LENGTH;
        if log_length <= fixed || (log_length - fixed) % PARTITION_COUNT != 0 {
            return Err(Error::Config(format!(
                "log length {} does not describe a log buffer",
                log_length
            )));
        }
        Self::new((log_length - fixed) / PARTITION_COUNT)
    }

    pub fn term_length(&self) -> usize {
        self.term_length
    }

    pub fn position_bits_to_shift(&self) -> u32 {
        self.position_bits_to_shift
    }

    pub fn log_length(&self) -> usize {
        compute_log_length(self.term_length)
    }

    pub fn max_message_length(&self) -> usize {
        compute_max_message_length(self.term_length)
    }

    /// First position that can never be reached by this stream
    pub fn max_possible_position(&self) -> i64 {
        (self.term_length as i64) << 31
    }

    /// Byte offset of a term buffer within the log
    pub fn term_buffer_offset(&self, partition: usize) -> usize {
        debug_assert!(partition < PARTITION_COUNT);
        partition * self.term_length
    }

    /// Byte offset of a term metadata block within the log
    pub fn term_meta_data_offset(&self, partition: usize) -> usize {
        debug_assert!(partition < PARTITION_COUNT);
        PARTITION_COUNT * self.term_length + partition * TERM_META_DATA_LENGTH
    }

    /// Byte offset of the log metadata block within the log
    pub fn log_meta_data_offset(&self) -> usize {
        PARTITION_COUNT * (self.term_length + TERM_META_DATA_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_term_lengths() {
        assert!(LogLayout::new(TERM_MIN_LENGTH).is_ok());
        assert!(LogLayout::new(TERM_MIN_LENGTH + 1).is_err());
        assert!(LogLayout::new(TERM_MIN_LENGTH / 2).is_err());
        assert!(LogLayout::new(TERM_MAX_LENGTH * 2).is_err());

        let err = LogLayout::with_max(TERM_MIN_LENGTH * 4, TERM_MIN_LENGTH * 2).unwrap_err();
        assert!(matches!(err, Error::TermLengthExceedsMax { .. }));
    }

    #[test]
    fn test_partition_index_follows_term_count() {
        assert_eq!(index_by_term_count(0), 0);
        assert_eq!(index_by_term_count(1), 1);
        assert_eq!(index_by_term_count(2), 2);
        assert_eq!(index_by_term_count(3), 0);
        assert_eq!(index_by_term_count(7), 1);
        assert_eq!(index_by_term(5, 9), 1);
    }

    #[test]
    fn test_position_conversions() {
        let term_length = TERM_MIN_LENGTH;
        let bits = position_bits_to_shift(term_length);
        assert_eq!(bits, 16);

        let position = (2 * term_length + 96) as i64;
        assert_eq!(term_offset(position, term_length), 96);
        assert_eq!(compute_term_id(7, bits, position), 9);
        assert_eq!(index_by_position(position, bits), 2);
        assert_eq!(compute_position(9, 96, bits, 7), position);
        assert_eq!(compute_term_begin_position(9, bits, 7), (2 * term_length) as i64);
    }

    #[test]
    fn test_term_ids_wrap() {
        let bits = position_bits_to_shift(TERM_MIN_LENGTH);
        let initial = i32::MAX;
        let next = initial.wrapping_add(1);
        assert_eq!(compute_term_begin_position(next, bits, initial), TERM_MIN_LENGTH as i64);
        assert_eq!(compute_term_id(initial, bits, TERM_MIN_LENGTH as i64), next);
    }

    #[test]
    fn test_raw_tail_packing() {
        let raw = pack_tail(-3, 4096);
        assert_eq!(term_id(raw), -3);
        assert_eq!(term_offset_from_tail(raw, TERM_MIN_LENGTH), 4096);

        let overrun = pack_tail(1, (TERM_MIN_LENGTH + 64) as i32);
        assert_eq!(term_offset_from_tail(overrun, TERM_MIN_LENGTH), TERM_MIN_LENGTH);
    }

    #[test]
    fn test_log_length_round_trips_through_layout() {
        let layout = LogLayout::new(TERM_MIN_LENGTH * 2).unwrap();
        assert_eq!(
            layout.log_length(),
            3 * TERM_MIN_LENGTH * 2 + 3 * TERM_META_DATA_LENGTH + LOG_META_DATA_LENGTH
        );
        assert_eq!(LogLayout::from_log_length(layout.log_length()).unwrap(), layout);
        assert!(LogLayout::from_log_length(layout.log_length() + 1).is_err());
        assert_eq!(layout.log_meta_data_offset(), layout.term_meta_data_offset(2) + TERM_META_DATA_LENGTH);
        assert_eq!(layout.max_message_length(), TERM_MIN_LENGTH / 4);
    }
}
