//! LIFO allocation with size footers.
//!
//! # Layout
//!
//! ```text
//! | padding | payload | footer (usize) | padding | payload | footer | ...
//! ```
//!
//! The footer records the bytes consumed by its allocation (padding, payload
//! and footer), so `free` reads the footer just below the current offset and
//! rolls the offset back by that amount.

use snafu::ResultExt as _;

use crate::{
    align,
    buffer::Buffer,
    error::{self, BufferSnafu, InitError},
};

/// Size of the footer written after every stack allocation.
pub const FOOTER_SIZE: usize = size_of::<usize>();

/// A LIFO allocator over a single buffer.
///
/// Every allocation is followed by a footer recording its total footprint
/// (alignment padding, payload, and footer), so [`free`](Self::free) can roll
/// the most recent allocation back.
///
/// # Examples
///
/// ```
/// use bufalloc::StackAllocator;
///
/// let mut allocator = StackAllocator::new();
/// allocator.init(128).unwrap();
///
/// let a = allocator.allocate(20, 8).unwrap();
/// let b = allocator.allocate(10, 8).unwrap();
/// allocator.free();
/// assert_eq!(allocator.allocate(10, 8), Some(b));
/// # let _ = a;
/// ```
#[derive(Debug, Default)]
pub struct StackAllocator {
    buffer: Option<Buffer>,
    offset: usize,
    blocks: usize,
}

impl StackAllocator {
    /// Creates an uninitialized allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: None,
            offset: 0,
            blocks: 0,
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
            .inspect_err(error::log_rejected("stack"))?;
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Allocates `size` bytes whose start address is a multiple of `align`.
    ///
    /// An `align` of 0 or 1 requests no alignment. Returns `None` when `size`
    /// is 0, `align` is not a power of two, the allocator is uninitialized, or
    /// the remaining space cannot hold the padded request and its footer.
    pub fn allocate(&mut self, size: usize, align: usize) -> Option<*mut u8> {
        if size == 0 {
            return None;
        }
        let buffer = self.buffer.as_mut()?;
        let Some(padding) = align::padding(buffer.addr() + self.offset, align) else {
            tracing::debug!(align, "rejected non power-of-two alignment");
            return None;
        };
        let start = self.offset.checked_add(padding)?;
        let footer = start.checked_add(size)?;
        let end = footer.checked_add(FOOTER_SIZE)?;
        if end > buffer.len() {
            tracing::trace!(size, align, offset = self.offset, "stack buffer exhausted");
            return None;
        }

        buffer.write_bytes(footer, (end - self.offset).to_ne_bytes());
        self.offset = end;
        self.blocks += 1;
        tracing::trace!(start, size, padding, "stack allocate");
        Some(buffer.ptr_at(start))
    }

    /// Releases the most recent allocation.
    ///
    /// Does nothing if the stack is empty.
    pub fn free(&mut self) {
        let Some(buffer) = &self.buffer else {
            return;
        };
        if self.blocks == 0 {
            tracing::debug!("ignored free on empty stack");
            return;
        }

        let total = usize::from_ne_bytes(buffer.read_bytes(self.offset - FOOTER_SIZE));
        assert!(
            total > FOOTER_SIZE && total <= self.offset,
            "corrupted stack footer: {total} bytes recorded at offset {}",
            self.offset
        );
        self.offset -= total;
        self.blocks -= 1;
        tracing::trace!(offset = self.offset, total, "stack free");
    }

    /// Releases every allocation.
    pub fn clear(&mut self) {
        self.offset = 0;
        self.blocks = 0;
    }

    /// Releases the buffer and returns to the uninitialized state.
    pub fn reset(&mut self) {
        self.buffer = None;
        self.clear();
    }

    /// Returns the number of bytes consumed, including padding and footers.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the number of live allocations.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks
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
