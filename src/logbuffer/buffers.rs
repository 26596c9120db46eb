//! Mapped log buffers.
//!
//! [`LogBuffers`] owns one memory mapping laid out per [`LogLayout`]. Access
//! goes through a [`MappedRegion`] guard: the guard counts as an in-flight
//! holder, and closing the buffers only unmaps once the last holder has
//! dropped its guard. The closed flag and the holder count share one atomic
//! word so the unmap runs exactly once however closes and acquires race.

use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use memmap2::MmapMut;

use super::layout::{LogLayout, PARTITION_COUNT};
use super::metadata::{LogMetaData, TermMetaData};
use crate::error::{Error, Result};

const CLOSED_BIT: u64 = 1 << 63;
const HOLDER_MASK: u64 = CLOSED_BIT - 1;

/// A mapped log buffer shared by every handle attached to one stream
pub struct LogBuffers {
    layout: LogLayout,
    base: *mut u8,
    /// Upper bit = closed, lower 63 bits = in-flight holders
    state: AtomicU64,
    mapping: Mutex<Option<MmapMut>>,
    path: Option<PathBuf>,
}

// SAFETY: `base` points into `mapping`, which is only dropped once the closed
// bit is set and no `MappedRegion` is alive. All concurrent access to the
// region goes through atomics or disjoint claimed byte ranges.
unsafe impl Send for LogBuffers {}
unsafe impl Sync for LogBuffers {}

impl LogBuffers {
    /// Map an anonymous, process-private log buffer
    pub fn map_anon(layout: LogLayout) -> Result<Self> {
        let mapping = MmapMut::map_anon(layout.log_length())?;
        Ok(Self::from_mapping(mapping, layout, None))
    }

    /// Map a file holding a log buffer of the given layout
    pub fn map_file(file: &File, path: &Path, layout: LogLayout) -> Result<Self> {
        let file_length = file.metadata()?.len() as usize;
        if file_length != layout.log_length() {
            return Err(Error::LogBufferCorrupted {
                path: path.to_path_buf(),
                reason: format!(
                    "file length {} does not match log length {}",
                    file_length,
                    layout.log_length()
                ),
            });
        }

        // SAFETY: the file is shared with other processes on purpose. Every
        // concurrently written field is accessed through atomics and claimed
        // ranges are disjoint, so no Rust reference aliases a foreign write.
        let mapping = unsafe { MmapMut::map_mut(file) }.map_err(|e| Error::ResourceAllocation {
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!("Mapped log buffer {:?} ({} bytes)", path, file_length);
        Ok(Self::from_mapping(mapping, layout, Some(path.to_path_buf())))
    }

    /// Moving the `MmapMut` does not move the mapped pages, so `base` stays valid
    fn from_mapping(mut mapping: MmapMut, layout: LogLayout, path: Option<PathBuf>) -> Self {
        Self {
            layout,
            base: mapping.as_mut_ptr(),
            state: AtomicU64::new(0),
            mapping: Mutex::new(Some(mapping)),
            path,
        }
    }

    pub fn layout(&self) -> LogLayout {
        self.layout
    }

    pub fn term_length(&self) -> usize {
        self.layout.term_length()
    }

    /// Backing file, if the buffer is file-mapped
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register as an in-flight holder. Returns `None` once closed.
    pub fn acquire(&self) -> Option<MappedRegion<'_>> {
        let prev = self.state.fetch_add(1, Ordering::AcqRel);
        if prev & CLOSED_BIT != 0 {
            self.release();
            return None;
        }
        Some(MappedRegion { buffers: self })
    }

    /// Close the buffers. The mapping is dropped now if nobody holds it, or
    /// by the last in-flight holder otherwise. Returns `true` for the single
    /// call that performed the close.
    pub fn close(&self) -> bool {
        let prev = self.state.fetch_or(CLOSED_BIT, Ordering::AcqRel);
        if prev & CLOSED_BIT != 0 {
            return false;
        }
        if prev & HOLDER_MASK == 0 {
            self.unmap();
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSED_BIT != 0
    }

    /// Whether the underlying mapping is still alive
    pub fn is_mapped(&self) -> bool {
        self.lock_mapping().is_some()
    }

    /// Flush dirty pages of a file-backed mapping to storage
    pub fn flush(&self) -> Result<()> {
        if let Some(mapping) = self.lock_mapping().as_ref() {
            mapping.flush()?;
        }
        Ok(())
    }

    fn release(&self) {
        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        if prev == CLOSED_BIT | 1 {
            self.unmap();
        }
    }

    fn unmap(&self) {
        if let Some(mapping) = self.lock_mapping().take() {
            drop(mapping);
            match &self.path {
                Some(path) => tracing::debug!("Unmapped log buffer {:?}", path),
                None => tracing::debug!("Unmapped anonymous log buffer"),
            }
        }
    }

    fn lock_mapping(&self) -> std::sync::MutexGuard<'_, Option<MmapMut>> {
        self.mapping.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for LogBuffers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBuffers")
            .field("term_length", &self.layout.term_length())
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Guard proving the mapping stays alive while it is held
pub struct MappedRegion<'a> {
    buffers: &'a LogBuffers,
}

impl<'a> MappedRegion<'a> {
    pub fn layout(&self) -> LogLayout {
        self.buffers.layout
    }

    pub fn term_buffer(&self, partition: usize) -> TermBuffer<'_> {
        assert!(partition < PARTITION_COUNT, "partition {} out of range", partition);
        let offset = self.buffers.layout.term_buffer_offset(partition);
        TermBuffer {
            // SAFETY: offset + term length lies within the mapping.
            ptr: unsafe { self.buffers.base.add(offset) },
            len: self.buffers.layout.term_length(),
            _marker: PhantomData,
        }
    }

    pub fn term_meta_data(&self, partition: usize) -> &TermMetaData {
        assert!(partition < PARTITION_COUNT, "partition {} out of range", partition);
        let offset = self.buffers.layout.term_meta_data_offset(partition);
        // SAFETY: the block is in bounds, 64-byte aligned within a page-aligned
        // mapping, and all-zero bytes are a valid `TermMetaData`.
        unsafe { &*(self.buffers.base.add(offset) as *const TermMetaData) }
    }

    pub fn log_meta_data(&self) -> &LogMetaData {
        let offset = self.buffers.layout.log_meta_data_offset();
        // SAFETY: as for `term_meta_data`.
        unsafe { &*(self.buffers.base.add(offset) as *const LogMetaData) }
    }
}

impl Drop for MappedRegion<'_> {
    fn drop(&mut self) {
        self.buffers.release();
    }
}

/// View of one term buffer inside a mapped region.
///
/// Writes go through raw pointers rather than `&mut [u8]`, since other
/// producers write disjoint ranges of the same term concurrently.
#[derive(Clone, Copy)]
pub struct TermBuffer<'a> {
    ptr: *mut u8,
    len: usize,
    _marker: PhantomData<&'a ()>,
}

impl<'a> TermBuffer<'a> {
    pub fn capacity(&self) -> usize {
        self.len
    }

    #[inline]
    fn check(&self, offset: usize, length: usize) {
        assert!(
            offset.checked_add(length).is_some_and(|end| end <= self.len),
            "range {}+{} outside term of {} bytes",
            offset,
            length,
            self.len
        );
    }

    pub fn get_bytes(&self, offset: usize, dest: &mut [u8]) {
        self.check(offset, dest.len());
        // SAFETY: bounds checked above; source and destination never overlap.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.add(offset), dest.as_mut_ptr(), dest.len()) }
    }

    pub(crate) fn put_bytes(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        // SAFETY: bounds checked above; the range belongs to the caller's claim.
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len()) }
    }

    pub(crate) fn set_memory(&self, offset: usize, length: usize, value: u8) {
        self.check(offset, length);
        // SAFETY: bounds checked above.
        unsafe { std::ptr::write_bytes(self.ptr.add(offset), value, length) }
    }

    /// Mutable view of a claimed range.
    ///
    /// # Safety
    /// The range must be exclusively claimed by the caller for `'a`.
    pub(crate) unsafe fn slice_mut(&self, offset: usize, length: usize) -> &'a mut [u8] {
        self.check(offset, length);
        std::slice::from_raw_parts_mut(self.ptr.add(offset), length)
    }

    pub fn get_u8(&self, offset: usize) -> u8 {
        let mut bytes = [0u8; 1];
        self.get_bytes(offset, &mut bytes);
        bytes[0]
    }

    pub(crate) fn put_u8(&self, offset: usize, value: u8) {
        self.put_bytes(offset, &[value]);
    }

    pub fn get_u16(&self, offset: usize) -> u16 {
        let mut bytes = [0u8; 2];
        self.get_bytes(offset, &mut bytes);
        u16::from_le_bytes(bytes)
    }

    pub(crate) fn put_u16(&self, offset: usize, value: u16) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub fn get_i32(&self, offset: usize) -> i32 {
        let mut bytes = [0u8; 4];
        self.get_bytes(offset, &mut bytes);
        i32::from_le_bytes(bytes)
    }

    pub(crate) fn put_i32(&self, offset: usize, value: i32) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub fn get_i64(&self, offset: usize) -> i64 {
        let mut bytes = [0u8; 8];
        self.get_bytes(offset, &mut bytes);
        i64::from_le_bytes(bytes)
    }

    pub(crate) fn put_i64(&self, offset: usize, value: i64) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        self.check(offset, 4);
        assert_eq!(offset % 4, 0, "unaligned atomic access at {}", offset);
        // SAFETY: in bounds and 4-byte aligned within a page-aligned mapping.
        unsafe { &*(self.ptr.add(offset) as *const AtomicI32) }
    }

    pub fn get_i32_volatile(&self, offset: usize) -> i32 {
        i32::from_le(self.atomic_i32(offset).load(Ordering::Acquire))
    }

    pub(crate) fn put_i32_ordered(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value.to_le(), Ordering::Release);
    }

    pub fn get_i64_volatile(&self, offset: usize) -> i64 {
        self.check(offset, 8);
        assert_eq!(offset % 8, 0, "unaligned atomic access at {}", offset);
        // SAFETY: in bounds and 8-byte aligned within a page-aligned mapping.
        let atomic = unsafe { &*(self.ptr.add(offset) as *const AtomicI64) };
        i64::from_le(atomic.load(Ordering::Acquire))
    }
}
