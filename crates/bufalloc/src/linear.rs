//! Bump allocation over a single buffer.
//!
//! The allocator keeps one offset into its buffer. Each allocation pads the
//! offset up to the requested alignment and advances it past the payload.
//! Nothing is released individually; `free` and `clear` rewind the offset to
//! the start of the buffer.

use snafu::ResultExt as _;

use crate::{
    align,
    buffer::Buffer,
    error::{self, BufferSnafu, InitError},
};

/// A bump allocator over a single buffer.
///
/// Allocations are carved from the front of the remaining space. Individual
/// allocations cannot be released; [`free`](Self::free) releases everything.
///
/// # Examples
///
/// ```
/// use bufalloc::LinearAllocator;
///
/// let mut allocator = LinearAllocator::new();
/// allocator.init(48).unwrap();
///
/// let ptr = allocator.allocate(20, 4).unwrap();
/// assert_eq!(ptr.addr() % 4, 0);
/// assert_eq!(allocator.offset(), 20);
///
/// assert!(allocator.allocate(30, 0).is_none());
/// allocator.free();
/// assert_eq!(allocator.offset(), 0);
/// ```
#[derive(Debug, Default)]
pub struct LinearAllocator {
    buffer: Option<Buffer>,
    offset: usize,
}

impl LinearAllocator {
    /// Creates an uninitialized allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: None,
            offset: 0,
        }
    }

    /// Acquires a `buffer_len`-byte buffer, releasing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Buffer`] if the buffer cannot be acquired. The
    /// allocator is left uninitialized.
    pub fn init(&mut self, buffer_len: usize) -> Result<(), InitError> {
        self.reset();
        let buffer = Buffer::new(buffer_len)
            .context(BufferSnafu)
            .inspect_err(error::log_rejected("linear"))?;
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Allocates `size` bytes whose start address is a multiple of `align`.
    ///
    /// An `align` of 0 or 1 requests no alignment. Returns `None` when `size`
    /// is 0, `align` is not a power of two, the allocator is uninitialized, or
    /// the remaining space cannot hold the padded request.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<*mut u8> {
        if size == 0 {
            return None;
        }
        let buffer = self.buffer.as_ref()?;
        let Some(padding) = align::padding(buffer.addr() + self.offset, align) else {
            tracing::debug!(align, "rejected non power-of-two alignment");
            return None;
        };
        let start = self.offset.checked_add(padding)?;
        let end = start.checked_add(size)?;
        if end > buffer.len() {
            tracing::trace!(size, align, offset = self.offset, "linear buffer exhausted");
            return None;
        }

        self.offset = end;
        tracing::trace!(start, size, padding, "linear allocate");
        Some(buffer.ptr_at(start))
    }

    /// Releases every allocation.
    ///
    /// Equivalent to [`clear`](Self::clear).
    pub fn free(&mut self) {
        self.clear();
    }

    /// Rewinds the offset to the start of the buffer.
    pub fn clear(&mut self) {
        self.offset = 0;
    }

    /// Releases the buffer and returns to the uninitialized state.
    pub fn reset(&mut self) {
        self.buffer = None;
        self.offset = 0;
    }

    /// Returns the number of bytes consumed, including alignment padding.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer.as_ref().map_or(0, Buffer::len)
    }

    #[must_use]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        self.buffer.as_ref()?.offset_of(ptr)
    }
}
