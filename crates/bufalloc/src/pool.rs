//! Fixed-size chunk allocation.
//!
//! The buffer is split into equally sized chunks. Free chunks form a singly
//! linked list whose links are stored in the first [`LINK_SIZE`] bytes of each
//! free chunk, so allocation pops the head and release pushes onto it.
//!
//! ```
//! use bufalloc::PoolAllocator;
//!
//! let mut pool = PoolAllocator::new();
//! pool.init(64, 16).unwrap();
//! let a = pool.allocate().unwrap();
//! let _b = pool.allocate().unwrap();
//! pool.free(a);
//! assert_eq!(pool.allocate(), Some(a));
//! ```

use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    buffer::Buffer,
    error::{
        self, BufferSnafu, ChunkTooSmallSnafu, InitError, LengthNotMultipleSnafu, PoolOverflowSnafu,
        ZeroChunksSnafu,
    },
};

/// Size of the free-list link stored in the first bytes of each free chunk.
///
/// This is the minimum chunk size.
pub const LINK_SIZE: usize = size_of::<usize>();

const NO_LINK: usize = usize::MAX;

/// A fixed-size chunk allocator.
///
/// The buffer is divided into equally sized chunks. Free chunks form a
/// singly-linked list whose links are stored inside the chunks themselves, so
/// the allocator has no bookkeeping overhead beyond the list head.
///
/// # Examples
///
/// ```
/// use bufalloc::PoolAllocator;
///
/// let mut allocator = PoolAllocator::new();
/// allocator.init(96, 8).unwrap();
/// assert_eq!(allocator.chunks_amount(), 12);
///
/// let chunk = allocator.allocate().unwrap();
/// assert_eq!(allocator.free_chunk_count(), 11);
/// assert!(!allocator.is_chunk_free(chunk));
///
/// allocator.free(chunk);
/// assert!(allocator.is_chunk_free(chunk));
/// ```
#[derive(Debug, Default)]
pub struct PoolAllocator {
    buffer: Option<Buffer>,
    chunk_size: usize,
    chunks_amount: usize,
    free_head: Option<usize>,
    free_count: usize,
}

impl PoolAllocator {
    /// Creates an uninitialized allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: None,
            chunk_size: 0,
            chunks_amount: 0,
            free_head: None,
            free_count: 0,
        }
    }

    /// Acquires a `buffer_len`-byte buffer divided into `chunk_size`-byte
    /// chunks, releasing any previous buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `chunk_size` is smaller than [`LINK_SIZE`],
    /// `buffer_len` is 0 or not a multiple of `chunk_size`, or the buffer
    /// cannot be acquired. The allocator is left uninitialized.
    pub fn init(&mut self, buffer_len: usize, chunk_size: usize) -> Result<(), InitError> {
        self.reset();
        self.try_init(buffer_len, chunk_size)
            .inspect_err(error::log_rejected("pool"))
    }

    /// Acquires a buffer holding `chunks_amount` chunks of `chunk_size` bytes,
    /// releasing any previous buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `chunk_size` is smaller than [`LINK_SIZE`],
    /// `chunks_amount` is 0, the total size overflows, or the buffer cannot
    /// be acquired. The allocator is left uninitialized.
    pub fn init_chunks(&mut self, chunk_size: usize, chunks_amount: usize) -> Result<(), InitError> {
        self.reset();
        chunk_size
            .checked_mul(chunks_amount)
            .context(PoolOverflowSnafu {
                chunk_size,
                chunks_amount,
            })
            .and_then(|buffer_len| self.try_init(buffer_len, chunk_size))
            .inspect_err(error::log_rejected("pool"))
    }

    fn try_init(&mut self, buffer_len: usize, chunk_size: usize) -> Result<(), InitError> {
        ensure!(
            chunk_size >= LINK_SIZE,
            ChunkTooSmallSnafu {
                chunk_size,
                min: LINK_SIZE,
            }
        );
        ensure!(buffer_len > 0, ZeroChunksSnafu);
        ensure!(
            buffer_len % chunk_size == 0,
            LengthNotMultipleSnafu {
                buffer_len,
                chunk_size,
            }
        );

        self.buffer = Some(Buffer::new(buffer_len).context(BufferSnafu)?);
        self.chunk_size = chunk_size;
        self.chunks_amount = buffer_len / chunk_size;
        self.thread_free_list();
        Ok(())
    }

    /// Links every chunk into the free list in address order.
    fn thread_free_list(&mut self) {
        let Some(buffer) = &mut self.buffer else {
            return;
        };
        for index in 0..self.chunks_amount {
            let next = if index + 1 < self.chunks_amount {
                (index + 1) * self.chunk_size
            } else {
                NO_LINK
            };
            buffer.write_bytes(index * self.chunk_size, next.to_ne_bytes());
        }
        self.free_head = Some(0);
        self.free_count = self.chunks_amount;
    }

    /// Pops a chunk from the free list.
    ///
    /// Returns `None` when every chunk is in use or the allocator is
    /// uninitialized.
    pub fn allocate(&mut self) -> Option<*mut u8> {
        let buffer = self.buffer.as_ref()?;
        let head = self.free_head?;
        let next = usize::from_ne_bytes(buffer.read_bytes(head));
        self.free_head = (next != NO_LINK).then_some(next);
        self.free_count -= 1;
        tracing::trace!(offset = head, free = self.free_count, "pool allocate");
        Some(buffer.ptr_at(head))
    }

    /// Pushes the chunk at `ptr` back onto the free list.
    ///
    /// Does nothing if `ptr` is null, outside the buffer, not at a chunk
    /// boundary, or already free.
    pub fn free(&mut self, ptr: *mut u8) {
        let Some(offset) = self.chunk_offset(ptr) else {
            tracing::debug!(?ptr, "ignored free of pointer outside pool chunks");
            return;
        };
        if self.free_offsets().any(|free| free == offset) {
            tracing::debug!(offset, "ignored free of free chunk");
            return;
        }
        let Some(buffer) = &mut self.buffer else {
            return;
        };
        buffer.write_bytes(offset, self.free_head.unwrap_or(NO_LINK).to_ne_bytes());
        self.free_head = Some(offset);
        self.free_count += 1;
        tracing::trace!(offset, free = self.free_count, "pool free");
    }

    /// Returns `true` if `ptr` is the start of a chunk on the free list.
    ///
    /// Pointers that do not start a chunk of this pool are never free.
    #[must_use]
    pub fn is_chunk_free(&self, ptr: *const u8) -> bool {
        self.chunk_offset(ptr)
            .is_some_and(|offset| self.free_offsets().any(|free| free == offset))
    }

    fn chunk_offset(&self, ptr: *const u8) -> Option<usize> {
        let buffer = self.buffer.as_ref()?;
        let offset = buffer.offset_of(ptr)?;
        (offset % self.chunk_size == 0).then_some(offset)
    }

    fn free_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        let buffer = self.buffer.as_ref();
        core::iter::successors(self.free_head, move |&offset| {
            let next = usize::from_ne_bytes(buffer?.read_bytes(offset));
            (next != NO_LINK).then_some(next)
        })
        .take(self.free_count)
    }

    /// Returns every chunk to the free list without releasing the buffer.
    pub fn clear(&mut self) {
        self.thread_free_list();
    }

    /// Releases the buffer and returns to the uninitialized state.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    #[must_use]
    pub fn free_chunk_count(&self) -> usize {
        self.free_count
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn chunks_amount(&self) -> usize {
        self.chunks_amount
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
