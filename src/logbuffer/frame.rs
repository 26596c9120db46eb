//! Frame Descriptor
//!
//! Every message in a term is a frame: a 32-byte header followed by the
//! payload, padded to the frame alignment. The frame length field doubles as
//! the commit marker. It is written negative while a producer fills the frame
//! and stored positive with release ordering once the frame is complete, so a
//! reader never sees a frame before its contents.
//!
//! ```text
//!  0               4       5       6               8
//! ┌───────────────┬───────┬───────┬───────────────┐
//! │ frame length  │version│ flags │     type      │
//! ├───────────────┴───────┴───────┴───────────────┤
//! │ term offset (8) │ session id (12) │ stream id (16) │ term id (20) │
//! ├───────────────────────────────────────────────┤
//! │ reserved value (24..32)                       │
//! └───────────────────────────────────────────────┘
//! ```

use super::buffers::TermBuffer;

/// Length of the data frame header
pub const HEADER_LENGTH: usize = 32;

/// Alignment of every frame within a term
pub const FRAME_ALIGNMENT: usize = 32;

pub const FRAME_LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const TERM_OFFSET_OFFSET: usize = 8;
pub const SESSION_ID_OFFSET: usize = 12;
pub const STREAM_ID_OFFSET: usize = 16;
pub const TERM_ID_OFFSET: usize = 20;
pub const RESERVED_VALUE_OFFSET: usize = 24;

pub const CURRENT_VERSION: u8 = 0;

/// Flags for a message carried in a single frame
pub const UNFRAGMENTED: u8 = 0x80 | 0x40;

/// Frame type filling the unused end of a term or an aborted claim
pub const HDR_TYPE_PAD: u16 = 0x00;

/// Frame type carrying application data
pub const HDR_TYPE_DATA: u16 = 0x01;

/// Round `value` up to a multiple of `alignment` (a power of two)
pub fn align(value: usize, alignment: usize) -> usize {
    (value + (alignment - 1)) & !(alignment - 1)
}

/// Aligned length of the frame carrying a message of `message_length` bytes
pub fn aligned_frame_length(message_length: usize) -> usize {
    align(message_length + HEADER_LENGTH, FRAME_ALIGNMENT)
}

/// Commit a frame by storing its length with release ordering
pub fn frame_length_ordered(term: &TermBuffer<'_>, frame_offset: usize, frame_length: i32) {
    term.put_i32_ordered(frame_offset + FRAME_LENGTH_OFFSET, frame_length);
}

/// Frame length with acquire ordering; zero or negative means not committed
pub fn frame_length_volatile(term: &TermBuffer<'_>, frame_offset: usize) -> i32 {
    term.get_i32_volatile(frame_offset + FRAME_LENGTH_OFFSET)
}

pub fn frame_type(term: &TermBuffer<'_>, frame_offset: usize) -> u16 {
    term.get_u16(frame_offset + TYPE_OFFSET)
}

pub fn set_frame_type(term: &TermBuffer<'_>, frame_offset: usize, frame_type: u16) {
    term.put_u16(frame_offset + TYPE_OFFSET, frame_type);
}

pub fn is_padding_frame(term: &TermBuffer<'_>, frame_offset: usize) -> bool {
    frame_type(term, frame_offset) == HDR_TYPE_PAD
}

pub fn frame_term_id(term: &TermBuffer<'_>, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + TERM_ID_OFFSET)
}

pub fn frame_term_offset(term: &TermBuffer<'_>, frame_offset: usize) -> i32 {
    term.get_i32(frame_offset + TERM_OFFSET_OFFSET)
}

pub fn reserved_value(term: &TermBuffer<'_>, frame_offset: usize) -> i64 {
    term.get_i64(frame_offset + RESERVED_VALUE_OFFSET)
}

pub fn set_reserved_value(term: &TermBuffer<'_>, frame_offset: usize, value: i64) {
    term.put_i64(frame_offset + RESERVED_VALUE_OFFSET, value);
}

/// Writes the default header for one stream into claimed frames
#[derive(Debug, Clone, Copy)]
pub struct HeaderWriter {
    session_id: i32,
    stream_id: i32,
}

impl HeaderWriter {
    pub fn new(session_id: i32, stream_id: i32) -> Self {
        Self {
            session_id,
            stream_id,
        }
    }

    /// Write an uncommitted data header. The frame length is stored negated
    /// first so the frame stays invisible until committed.
    pub fn write(&self, term: &TermBuffer<'_>, frame_offset: usize, frame_length: usize, term_id: i32) {
        term.put_i32_ordered(frame_offset + FRAME_LENGTH_OFFSET, -(frame_length as i32));
        term.put_u8(frame_offset + VERSION_OFFSET, CURRENT_VERSION);
        term.put_u8(frame_offset + FLAGS_OFFSET, UNFRAGMENTED);
        term.put_u16(frame_offset + TYPE_OFFSET, HDR_TYPE_DATA);
        term.put_i32(frame_offset + TERM_OFFSET_OFFSET, frame_offset as i32);
        term.put_i32(frame_offset + SESSION_ID_OFFSET, self.session_id);
        term.put_i32(frame_offset + STREAM_ID_OFFSET, self.stream_id);
        term.put_i32(frame_offset + TERM_ID_OFFSET, term_id);
    }

    /// Fill `[frame_offset, frame_offset + padding_length)` with one committed
    /// padding frame
    pub fn write_padding(
        &self,
        term: &TermBuffer<'_>,
        frame_offset: usize,
        padding_length: usize,
        term_id: i32,
    ) {
        self.write(term, frame_offset, padding_length, term_id);
        set_frame_type(term, frame_offset, HDR_TYPE_PAD);
        frame_length_ordered(term, frame_offset, padding_length as i32);
    }
}
