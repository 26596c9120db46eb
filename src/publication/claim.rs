//! Buffer Claim
//!
//! A frame reserved by `Publication::try_claim`. The caller writes the
//! payload in place and then commits or aborts. Dropping an unresolved claim
//! aborts it, so a claimed frame can never stall consumers indefinitely.

use crate::logbuffer::frame::{
    frame_length_ordered, set_frame_type, set_reserved_value, HDR_TYPE_PAD, HEADER_LENGTH,
};
use crate::logbuffer::{MappedRegion, TermBuffer};

/// A claimed, uncommitted frame inside a mapped log
pub struct BufferClaim<'a> {
    region: MappedRegion<'a>,
    partition: usize,
    frame_offset: usize,
    length: usize,
    position: i64,
    resolved: bool,
}

impl<'a> BufferClaim<'a> {
    pub(crate) fn new(
        region: MappedRegion<'a>,
        partition: usize,
        frame_offset: usize,
        length: usize,
        position: i64,
    ) -> Self {
        Self {
            region,
            partition,
            frame_offset,
            length,
            position,
            resolved: false,
        }
    }

    /// Stream position after this frame
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Payload length in bytes
    pub fn length(&self) -> usize {
        self.length
    }

    /// Writable payload of the claimed frame
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        let term = self.region.term_buffer(self.partition);
        // SAFETY: the payload range was reserved by this claim's fetch-and-add
        // and nobody else writes it until the claim is resolved.
        unsafe { term.slice_mut(self.frame_offset + HEADER_LENGTH, self.length) }
    }

    /// Copy `src` into the payload at `offset`
    pub fn put_bytes(&mut self, offset: usize, src: &[u8]) {
        self.buffer_mut()[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Set the application-defined reserved value carried in the header
    pub fn set_reserved_value(&mut self, value: i64) {
        set_reserved_value(&self.term(), self.frame_offset, value);
    }

    /// Make the frame visible to consumers
    pub fn commit(mut self) {
        frame_length_ordered(&self.term(), self.frame_offset, self.frame_length());
        self.resolved = true;
    }

    /// Turn the frame into padding so consumers skip it
    pub fn abort(mut self) {
        self.pad();
        self.resolved = true;
    }

    fn pad(&self) {
        let term = self.term();
        set_frame_type(&term, self.frame_offset, HDR_TYPE_PAD);
        frame_length_ordered(&term, self.frame_offset, self.frame_length());
    }

    fn term(&self) -> TermBuffer<'_> {
        self.region.term_buffer(self.partition)
    }

    fn frame_length(&self) -> i32 {
        (self.length + HEADER_LENGTH) as i32
    }
}

impl Drop for BufferClaim<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.pad();
        }
    }
}

impl std::fmt::Debug for BufferClaim<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferClaim")
            .field("partition", &self.partition)
            .field("frame_offset", &self.frame_offset)
            .field("length", &self.length)
            .field("position", &self.position)
            .finish()
    }
}
