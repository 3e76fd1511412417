//! Free list allocator with in-buffer headers.
//!
//! # Layout
//!
//! Every chunk starts with a header. An allocated chunk stores its payload
//! size in a `u32` ([`ALLOC_HEADER_SIZE`] bytes) followed by the payload. A
//! free chunk stores the offset of the next free chunk and its own size
//! ([`FREE_HEADER_SIZE`] bytes). Sizes exclude the 4-byte alloc header, so a
//! chunk spans `size + ALLOC_HEADER_SIZE` bytes.
//!
//! Free chunks are linked in ascending offset order. Only the head offset is
//! stored outside the buffer.

use chunk_set::MemoryChunk;
use snafu::{ResultExt as _, ensure};

use super::FitPolicy;
use crate::{
    buffer::Buffer,
    error::{self, BufferSnafu, BufferTooLargeSnafu, BufferTooSmallSnafu, InitError},
};

/// Size of the header written before every allocation: the `u32` size.
pub const ALLOC_HEADER_SIZE: usize = size_of::<u32>();

/// Size of the header written at the start of every free chunk: the `u32`
/// offset of the next free chunk followed by the `u32` size.
pub const FREE_HEADER_SIZE: usize = 2 * size_of::<u32>();

/// Headers store offsets and sizes as `u32`.
const MAX_BUFFER_LEN: usize = u32::MAX as usize;

const NO_NEXT: usize = MAX_BUFFER_LEN;

/// Smallest recorded size of a chunk, so that it can hold a free header once
/// released.
const MIN_CHUNK_SIZE: usize = FREE_HEADER_SIZE - ALLOC_HEADER_SIZE;

/// A free list allocator whose bookkeeping lives inside the buffer.
///
/// Every chunk starts with a header. Allocated chunks carry their size;
/// free chunks carry the offset of the next free chunk and their size, and
/// form a singly-linked list in ascending offset order. A chunk with recorded
/// size `n` spans `n + ALLOC_HEADER_SIZE` bytes.
///
/// Pointers passed to [`free`](Self::free) are validated as far as the
/// headers allow: pointers outside the buffer, inside a free chunk, or whose
/// recorded size overruns the next free chunk are ignored. A pointer into the
/// middle of a live allocation cannot always be told apart from a real one;
/// freeing it leaves the allocator in an unspecified but memory-safe state.
///
/// # Examples
///
/// ```
/// use bufalloc::free_list::{ALLOC_HEADER_SIZE, FitPolicy, IntrusiveFreeListAllocator};
///
/// let mut allocator = IntrusiveFreeListAllocator::new(FitPolicy::FirstFit);
/// allocator.init(64).unwrap();
///
/// let ptr = allocator.allocate(12).unwrap();
/// assert_eq!(allocator.free_size(), 64 - 12 - 2 * ALLOC_HEADER_SIZE);
///
/// allocator.free(ptr);
/// assert_eq!(allocator.free_size(), 64 - ALLOC_HEADER_SIZE);
/// ```
#[derive(Debug, Default)]
pub struct IntrusiveFreeListAllocator {
    buffer: Option<Buffer>,
    head: Option<usize>,
    policy: FitPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeHeader {
    next: Option<usize>,
    size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeNode {
    prev: Option<usize>,
    offset: usize,
    header: FreeHeader,
}

impl FreeNode {
    fn end(&self) -> usize {
        self.offset + ALLOC_HEADER_SIZE + self.header.size
    }
}

impl IntrusiveFreeListAllocator {
    /// Creates an uninitialized allocator using `policy`.
    #[must_use]
    pub const fn new(policy: FitPolicy) -> Self {
        Self {
            buffer: None,
            head: None,
            policy,
        }
    }

    /// Acquires a `buffer_len`-byte buffer as a single free chunk, releasing
    /// any previous buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `buffer_len` cannot hold a free header, does not
    /// fit the `u32` header fields, or the buffer cannot be acquired. The
    /// allocator is left uninitialized.
    pub fn init(&mut self, buffer_len: usize) -> Result<(), InitError> {
        self.reset();
        self.try_init(buffer_len)
            .inspect_err(error::log_rejected("intrusive-free-list"))
    }

    fn try_init(&mut self, buffer_len: usize) -> Result<(), InitError> {
        ensure!(
            buffer_len >= FREE_HEADER_SIZE,
            BufferTooSmallSnafu {
                len: buffer_len,
                min: FREE_HEADER_SIZE,
            }
        );
        ensure!(
            buffer_len <= MAX_BUFFER_LEN,
            BufferTooLargeSnafu {
                len: buffer_len,
                max: MAX_BUFFER_LEN,
            }
        );
        self.buffer = Some(Buffer::new(buffer_len).context(BufferSnafu)?);
        self.clear();
        Ok(())
    }

    /// Allocates `size` bytes from the free chunk chosen by the fit policy.
    ///
    /// Requests smaller than a free header are raised so the chunk can be
    /// released later. When the rest of the chosen chunk is too small to hold
    /// a free header, the allocation takes the whole chunk. Returns `None`
    /// when `size` is 0, the allocator is uninitialized, or no free chunk is
    /// large enough.
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        if size == 0 {
            return None;
        }
        let size = if size < MIN_CHUNK_SIZE {
            tracing::debug!(size, raised = MIN_CHUNK_SIZE, "raised allocation to free header size");
            MIN_CHUNK_SIZE
        } else {
            size
        };

        let buffer = self.buffer.as_mut()?;
        let candidates = FreeNodes::new(buffer, self.head).map(|node| (node, node.header.size));
        let Some(node) = self.policy.find(candidates, size) else {
            tracing::trace!(size, policy = %self.policy, "no free chunk fits");
            return None;
        };

        let remainder = node.header.size - size;
        let (size, replacement) = if remainder > FREE_HEADER_SIZE {
            let split = node.offset + ALLOC_HEADER_SIZE + size;
            write_free_header(
                buffer,
                split,
                FreeHeader {
                    next: node.header.next,
                    size: remainder - ALLOC_HEADER_SIZE,
                },
            );
            (size, Some(split))
        } else {
            (node.header.size, node.header.next)
        };
        relink(buffer, &mut self.head, node.prev, replacement);
        write_u32(buffer, node.offset, size);

        tracing::trace!(offset = node.offset, size, policy = %self.policy, "intrusive allocate");
        Some(buffer.ptr_at(node.offset + ALLOC_HEADER_SIZE))
    }

    /// Releases the allocation at `ptr` and coalesces it with adjacent free
    /// chunks.
    ///
    /// Does nothing if `ptr` fails the header checks described on the type.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        let Some(offset) = buffer
            .offset_of(ptr)
            .and_then(|payload| payload.checked_sub(ALLOC_HEADER_SIZE))
        else {
            tracing::debug!(?ptr, "ignored free of pointer outside buffer");
            return;
        };
        let Some((prev, next)) = locate(buffer, self.head, offset) else {
            tracing::debug!(offset, "ignored free inside free chunk");
            return;
        };

        let size = read_u32(buffer, offset);
        let limit = next.map_or(buffer.len(), |next| next.offset);
        let end = offset + ALLOC_HEADER_SIZE + size;
        if size < MIN_CHUNK_SIZE || end > limit {
            tracing::debug!(offset, size, limit, "ignored free with invalid header");
            return;
        }

        let mut chunk = FreeHeader {
            next: next.map(|next| next.offset),
            size,
        };
        if let Some(next) = next.filter(|next| next.offset == end) {
            chunk.size += ALLOC_HEADER_SIZE + next.header.size;
            chunk.next = next.header.next;
        }
        if let Some(prev) = prev.filter(|prev| prev.end() == offset) {
            let merged = FreeHeader {
                next: chunk.next,
                size: prev.header.size + ALLOC_HEADER_SIZE + chunk.size,
            };
            write_free_header(buffer, prev.offset, merged);
            tracing::trace!(offset = prev.offset, size = merged.size, "intrusive free");
        } else {
            write_free_header(buffer, offset, chunk);
            relink(buffer, &mut self.head, prev.map(|prev| prev.offset), Some(offset));
            tracing::trace!(offset, size = chunk.size, "intrusive free");
        }
    }

    /// Releases every allocation without clearing the buffer contents.
    ///
    /// Only the header of the single remaining free chunk is rewritten.
    pub fn clear(&mut self) {
        let Some(buffer) = self.buffer.as_mut() else {
            self.head = None;
            return;
        };
        let size = buffer.len() - ALLOC_HEADER_SIZE;
        write_free_header(buffer, 0, FreeHeader { next: None, size });
        self.head = Some(0);
    }

    /// Releases the buffer and returns to the uninitialized state.
    ///
    /// The fit policy is kept.
    pub fn reset(&mut self) {
        self.buffer = None;
        self.head = None;
    }

    #[must_use]
    pub fn policy(&self) -> FitPolicy {
        self.policy
    }

    /// Changes the fit policy used by subsequent allocations.
    pub fn set_policy(&mut self, policy: FitPolicy) {
        self.policy = policy;
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer.as_ref().map_or(0, Buffer::len)
    }

    #[must_use]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        self.buffer.as_ref()?.offset_of(ptr)
    }

    /// Returns the free chunks in ascending offset order.
    ///
    /// Each chunk's `offset` is its header offset and its `length` is the
    /// recorded size, which excludes [`ALLOC_HEADER_SIZE`] bytes of the span.
    pub fn free_chunks(&self) -> impl Iterator<Item = MemoryChunk> + '_ {
        self.buffer
            .iter()
            .flat_map(|buffer| FreeNodes::new(buffer, self.head))
            .map(|node| MemoryChunk::new(node.offset, node.header.size))
    }

    #[must_use]
    pub fn free_chunk_count(&self) -> usize {
        self.free_chunks().count()
    }

    /// Returns the sum of the recorded sizes of all free chunks.
    #[must_use]
    pub fn free_size(&self) -> usize {
        self.free_chunks().map(|chunk| chunk.length).sum()
    }

    /// Returns the allocated chunks in ascending offset order, in the same
    /// form as [`free_chunks`](Self::free_chunks).
    ///
    /// Allocated chunks are found by walking the headers between free chunks.
    pub fn allocated_chunks(&self) -> impl Iterator<Item = MemoryChunk> + '_ {
        self.buffer.iter().flat_map(|buffer| {
            let mut free = FreeNodes::new(buffer, self.head).peekable();
            let mut offset = 0;
            core::iter::from_fn(move || {
                while let Some(node) = free.next_if(|node| node.offset == offset) {
                    offset = node.end();
                }
                let limit = free.peek().map_or(buffer.len(), |node| node.offset);
                if offset + ALLOC_HEADER_SIZE > limit {
                    return None;
                }
                let size = read_u32(buffer, offset);
                let chunk = MemoryChunk::new(offset, size);
                offset += ALLOC_HEADER_SIZE + size;
                (offset <= limit).then_some(chunk)
            })
        })
    }
}

/// Walks the free list from `head`.
///
/// The walk is bounded by the number of free headers the buffer can hold.
struct FreeNodes<'a> {
    buffer: &'a Buffer,
    prev: Option<usize>,
    current: Option<usize>,
    remaining: usize,
}

impl<'a> FreeNodes<'a> {
    fn new(buffer: &'a Buffer, head: Option<usize>) -> Self {
        Self {
            buffer,
            prev: None,
            current: head,
            remaining: buffer.len() / FREE_HEADER_SIZE + 1,
        }
    }
}

impl Iterator for FreeNodes<'_> {
    type Item = FreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.current?;
        self.remaining = self.remaining.checked_sub(1)?;
        let header = read_free_header(self.buffer, offset);
        let node = FreeNode {
            prev: self.prev,
            offset,
            header,
        };
        self.prev = Some(offset);
        self.current = header.next;
        Some(node)
    }
}

/// Finds the free nodes surrounding `offset`.
///
/// Returns `None` if `offset` lies inside a free chunk.
fn locate(
    buffer: &Buffer,
    head: Option<usize>,
    offset: usize,
) -> Option<(Option<FreeNode>, Option<FreeNode>)> {
    let mut prev = None;
    for node in FreeNodes::new(buffer, head) {
        if node.offset > offset {
            return Some((prev, Some(node)));
        }
        if offset < node.end() {
            return None;
        }
        prev = Some(node);
    }
    Some((prev, None))
}

/// Points the link before a free-list position at `next`.
fn relink(buffer: &mut Buffer, head: &mut Option<usize>, prev: Option<usize>, next: Option<usize>) {
    match prev {
        Some(prev) => write_u32(buffer, prev, next.unwrap_or(NO_NEXT)),
        None => *head = next,
    }
}

fn read_free_header(buffer: &Buffer, offset: usize) -> FreeHeader {
    let next = read_u32(buffer, offset);
    FreeHeader {
        next: (next != NO_NEXT).then_some(next),
        size: read_u32(buffer, offset + size_of::<u32>()),
    }
}

fn write_free_header(buffer: &mut Buffer, offset: usize, header: FreeHeader) {
    write_u32(buffer, offset, header.next.unwrap_or(NO_NEXT));
    write_u32(buffer, offset + size_of::<u32>(), header.size);
}

fn read_u32(buffer: &Buffer, offset: usize) -> usize {
    u32::from_ne_bytes(buffer.read_bytes(offset)) as usize
}

#[expect(clippy::cast_possible_truncation)]
fn write_u32(buffer: &mut Buffer, offset: usize, value: usize) {
    debug_assert!(value <= MAX_BUFFER_LEN, "header field {value} exceeds u32");
    buffer.write_bytes(offset, (value as u32).to_ne_bytes());
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    fn allocator(policy: FitPolicy, len: usize) -> IntrusiveFreeListAllocator {
        let mut allocator = IntrusiveFreeListAllocator::new(policy);
        allocator.init(len).unwrap();
        allocator
    }

    fn free_sizes(allocator: &IntrusiveFreeListAllocator) -> Vec<usize> {
        allocator.free_chunks().map(|chunk| chunk.length).collect()
    }

    #[track_caller]
    fn assert_tiles(allocator: &IntrusiveFreeListAllocator) {
        let mut chunks: Vec<_> = allocator
            .free_chunks()
            .chain(allocator.allocated_chunks())
            .collect();
        chunks.sort_by_key(|chunk| chunk.offset);
        let mut end = 0;
        for chunk in &chunks {
            assert_eq!(chunk.offset, end, "gap or overlap at {chunk}");
            end = chunk.end() + ALLOC_HEADER_SIZE;
        }
        assert_eq!(end, allocator.buffer_size());

        let free: Vec<_> = allocator.free_chunks().collect();
        for pair in free.windows(2) {
            assert!(
                pair[0].end() + ALLOC_HEADER_SIZE < pair[1].offset,
                "{} touches {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_init() {
        let allocator = allocator(FitPolicy::FirstFit, 16);
        assert_eq!(allocator.buffer_size(), 16);
        assert_eq!(free_sizes(&allocator), [16 - ALLOC_HEADER_SIZE]);
    }

    #[test]
    fn test_init_rejects_length() {
        let mut allocator = allocator(FitPolicy::FirstFit, 16);
        assert!(matches!(
            allocator.init(FREE_HEADER_SIZE - 1),
            Err(InitError::BufferTooSmall { .. })
        ));
        assert_eq!(allocator.buffer_size(), 0);
        assert_eq!(allocator.free_chunk_count(), 0);
        assert!(allocator.allocate(1).is_none());

        assert!(matches!(
            allocator.init(MAX_BUFFER_LEN + 1),
            Err(InitError::BufferTooLarge { .. })
        ));
    }

    #[test]
    fn test_allocate_splits() {
        for policy in [FitPolicy::FirstFit, FitPolicy::BestFit] {
            let mut allocator = allocator(policy, 64);
            allocator.allocate(12).unwrap();
            assert_eq!(free_sizes(&allocator), [64 - 12 - 2 * ALLOC_HEADER_SIZE]);
            assert_tiles(&allocator);
        }
    }

    #[test]
    fn test_allocate_whole_buffer() {
        let mut allocator = allocator(FitPolicy::FirstFit, 32);
        allocator.allocate(32 - ALLOC_HEADER_SIZE).unwrap();
        assert_eq!(allocator.free_chunk_count(), 0);
        assert!(allocator.allocate(1).is_none());
        assert_tiles(&allocator);
    }

    #[test]
    fn test_allocate_absorbs_small_remainder() {
        for policy in [FitPolicy::FirstFit, FitPolicy::BestFit] {
            let mut allocator = allocator(policy, 64);
            allocator.allocate(25).unwrap();
            allocator.allocate(25).unwrap();
            assert_eq!(allocator.free_chunk_count(), 0);
            assert!(allocator.allocate(25).is_none());

            let sizes: Vec<_> = allocator.allocated_chunks().map(|c| c.length).collect();
            assert_eq!(sizes, [25, 64 - 25 - 2 * ALLOC_HEADER_SIZE]);
        }
    }

    #[test]
    fn test_allocate_raises_tiny_request() {
        let mut allocator = allocator(FitPolicy::FirstFit, 64);
        let ptr = allocator.allocate(1).unwrap();
        let chunk = allocator.allocated_chunks().next().unwrap();
        assert_eq!(chunk, MemoryChunk::new(0, MIN_CHUNK_SIZE));
        allocator.free(ptr);
        assert_eq!(free_sizes(&allocator), [64 - ALLOC_HEADER_SIZE]);
    }

    #[test]
    fn test_first_fit_reuses_lowest_hole() {
        let mut allocator = allocator(FitPolicy::FirstFit, 256);
        let a = allocator.allocate(12).unwrap();
        allocator.allocate(16).unwrap();
        let b = allocator.allocate(32).unwrap();
        allocator.allocate(16).unwrap();
        allocator.free(a);
        allocator.free(b);

        assert_eq!(allocator.allocate(14), Some(b));
        let sizes = free_sizes(&allocator);
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[0], 12);
        assert_eq!(sizes[2], 256 - 12 - 16 - 32 - 16 - 5 * ALLOC_HEADER_SIZE);
        assert_tiles(&allocator);
    }

    #[test]
    fn test_best_fit_reuses_exact_hole() {
        let mut allocator = allocator(FitPolicy::BestFit, 256);
        let a = allocator.allocate(16).unwrap();
        allocator.allocate(12).unwrap();
        let b = allocator.allocate(14).unwrap();
        allocator.allocate(12).unwrap();
        allocator.free(a);
        allocator.free(b);

        assert_eq!(allocator.allocate(14), Some(b));
        assert_eq!(
            free_sizes(&allocator),
            [16, 256 - 16 - 12 - 14 - 12 - 5 * ALLOC_HEADER_SIZE]
        );
        assert_tiles(&allocator);
    }

    #[test]
    fn test_free_between_allocations() {
        let mut allocator = allocator(FitPolicy::FirstFit, 128);
        let a = allocator.allocate(16).unwrap();
        allocator.allocate(12).unwrap();
        let b = allocator.allocate(16).unwrap();
        allocator.allocate(12).unwrap();
        let c = allocator.allocate(16).unwrap();
        allocator.free(a);
        allocator.free(b);
        allocator.free(c);

        let sizes = free_sizes(&allocator);
        assert_eq!(sizes.len(), 3);
        assert_eq!(sizes[1], 16);
        assert_tiles(&allocator);
    }

    #[test]
    fn test_free_coalesces_everything() {
        let mut allocator = allocator(FitPolicy::FirstFit, 400);
        let ptrs: Vec<_> = (0..20).map(|_| allocator.allocate(16).unwrap()).collect();
        assert_eq!(allocator.free_chunk_count(), 0);
        for &ptr in ptrs.iter().step_by(2) {
            allocator.free(ptr);
            assert_tiles(&allocator);
        }
        for &ptr in ptrs.iter().skip(1).step_by(2) {
            allocator.free(ptr);
            assert_tiles(&allocator);
        }
        assert_eq!(free_sizes(&allocator), [400 - ALLOC_HEADER_SIZE]);
        assert_eq!(allocator.allocated_chunks().count(), 0);
    }

    #[test]
    fn test_free_invalid_is_noop() {
        let mut allocator = allocator(FitPolicy::FirstFit, 64);
        let ptr = allocator.allocate(16).unwrap();
        let before: Vec<_> = allocator.free_chunks().collect();

        let mut foreign = 0_u32;
        allocator.free((&raw mut foreign).cast());
        allocator.free(core::ptr::null_mut());
        // header offset would precede the buffer
        allocator.free(ptr.wrapping_sub(ALLOC_HEADER_SIZE));
        // inside the free tail
        allocator.free(ptr.wrapping_add(24));

        assert_eq!(allocator.free_chunks().collect::<Vec<_>>(), before);

        allocator.free(ptr);
        allocator.free(ptr);
        assert_eq!(free_sizes(&allocator), [64 - ALLOC_HEADER_SIZE]);
    }

    #[test]
    fn test_free_rejects_overlong_header() {
        let mut allocator = allocator(FitPolicy::FirstFit, 64);
        let ptr = allocator.allocate(16).unwrap();
        unsafe { ptr.cast::<u32>().write_unaligned(40) };
        // the bytes at `ptr + 4` now read as a 40-byte header running into
        // the free tail
        allocator.free(ptr.wrapping_add(ALLOC_HEADER_SIZE));
        assert_eq!(allocator.allocated_chunks().count(), 1);
        assert_tiles(&allocator);
    }

    #[test]
    fn test_clear() {
        let mut allocator = allocator(FitPolicy::FirstFit, 64);
        let ptr = allocator.allocate(16).unwrap();
        allocator.allocate(12).unwrap();
        allocator.free(ptr);
        allocator.clear();
        assert_eq!(free_sizes(&allocator), [64 - ALLOC_HEADER_SIZE]);
        assert_eq!(allocator.buffer_size(), 64);
    }

    #[test]
    fn test_reset_keeps_policy() {
        let mut allocator = allocator(FitPolicy::BestFit, 64);
        allocator.reset();
        assert_eq!(allocator.buffer_size(), 0);
        assert_eq!(allocator.free_chunk_count(), 0);
        assert_eq!(allocator.allocated_chunks().count(), 0);
        assert_eq!(allocator.policy(), FitPolicy::BestFit);
        allocator.set_policy(FitPolicy::FirstFit);
        assert_eq!(allocator.policy(), FitPolicy::FirstFit);
    }

    #[test]
    fn test_allocations_hold_data() {
        let mut allocator = allocator(FitPolicy::BestFit, 256);
        let ptrs: Vec<_> = (0..8).map(|_| allocator.allocate(24).unwrap()).collect();
        for (i, &ptr) in ptrs.iter().enumerate() {
            unsafe { ptr.write_bytes(0xF0 | i as u8, 24) };
        }
        for &ptr in ptrs.iter().step_by(3) {
            allocator.free(ptr);
        }
        for (i, &ptr) in ptrs.iter().enumerate().filter(|(i, _)| i % 3 != 0) {
            let bytes = unsafe { core::slice::from_raw_parts(ptr, 24) };
            assert!(bytes.iter().all(|&b| b == 0xF0 | i as u8));
        }
        assert_tiles(&allocator);
    }
}
