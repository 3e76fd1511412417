//! General-purpose free list allocators.
//!
//! Both allocators split a free chunk on allocation and coalesce adjacent free
//! chunks on release. They differ in where the bookkeeping lives:
//!
//! - [`FreeListAllocator`] keeps free and allocated chunks out-of-band, so the
//!   whole buffer is usable and invalid frees are always detected.
//! - [`IntrusiveFreeListAllocator`] stores chunk headers inside the buffer,
//!   trading a per-allocation header for zero external memory.

use alloc::collections::BTreeMap;

use chunk_set::ChunkSet;
pub use chunk_set::MemoryChunk;
use snafu::ResultExt as _;

pub use self::{
    fit::{FitPolicy, ParseFitPolicyError},
    intrusive::{ALLOC_HEADER_SIZE, FREE_HEADER_SIZE, IntrusiveFreeListAllocator},
};
use crate::{
    buffer::Buffer,
    error::{self, BufferSnafu, InitError},
};

mod fit;
mod intrusive;

/// A free list allocator with out-of-band bookkeeping.
///
/// Free chunks are kept in an offset-ordered [`ChunkSet`]; allocated chunks
/// are kept in a map from offset to length. Every byte of the buffer belongs
/// to exactly one free or allocated chunk.
///
/// # Examples
///
/// ```
/// use bufalloc::free_list::{FitPolicy, FreeListAllocator, MemoryChunk};
///
/// let mut allocator = FreeListAllocator::new(FitPolicy::FirstFit);
/// allocator.init(64).unwrap();
///
/// let ptr = allocator.allocate(12).unwrap();
/// assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(12, 52)]);
///
/// allocator.free(ptr);
/// assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(0, 64)]);
/// ```
#[derive(Debug, Default)]
pub struct FreeListAllocator {
    buffer: Option<Buffer>,
    free_chunks: ChunkSet,
    allocated: BTreeMap<usize, usize>,
    policy: FitPolicy,
}

impl FreeListAllocator {
    /// Creates an uninitialized allocator using `policy`.
    #[must_use]
    pub const fn new(policy: FitPolicy) -> Self {
        Self {
            buffer: None,
            free_chunks: ChunkSet::new(),
            allocated: BTreeMap::new(),
            policy,
        }
    }

    /// Acquires a `buffer_len`-byte buffer as a single free chunk, releasing
    /// any previous buffer.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::Buffer`] if the buffer cannot be acquired. The
    /// allocator is left uninitialized.
    pub fn init(&mut self, buffer_len: usize) -> Result<(), InitError> {
        self.reset();
        let buffer = Buffer::new(buffer_len)
            .context(BufferSnafu)
            .inspect_err(error::log_rejected("free-list"))?;
        self.free_chunks.reset(buffer.len());
        self.buffer = Some(buffer);
        Ok(())
    }

    /// Allocates `size` bytes from the free chunk chosen by the fit policy.
    ///
    /// The allocation is taken from the low end of the chosen chunk, and the
    /// remainder stays free. Returns `None` when `size` is 0, the allocator
    /// is uninitialized, or no free chunk is large enough.
    pub fn allocate(&mut self, size: usize) -> Option<*mut u8> {
        if size == 0 {
            return None;
        }
        let buffer = self.buffer.as_ref()?;
        let candidates = self
            .free_chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| (index, chunk.length));
        let Some(index) = self.policy.find(candidates, size) else {
            tracing::trace!(size, policy = %self.policy, "no free chunk fits");
            return None;
        };

        let chunk = self.free_chunks.carve(index, size);
        self.allocated.insert(chunk.offset, chunk.length);
        tracing::trace!(offset = chunk.offset, size, policy = %self.policy, "free-list allocate");
        Some(buffer.ptr_at(chunk.offset))
    }

    /// Releases the allocation starting at `ptr` and coalesces it with
    /// adjacent free chunks.
    ///
    /// Does nothing if `ptr` is null or is not the start of a live
    /// allocation.
    pub fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let Some(offset) = self.offset_of(ptr) else {
            tracing::debug!(?ptr, "ignored free of pointer outside buffer");
            return;
        };
        let Some(length) = self.allocated.remove(&offset) else {
            tracing::debug!(offset, "ignored free of unallocated offset");
            return;
        };
        let index = self.free_chunks.insert(MemoryChunk::new(offset, length));
        tracing::trace!(
            offset,
            length,
            merged = %self.free_chunks.as_slice()[index],
            "free-list free"
        );
    }

    /// Releases every allocation without touching the buffer contents.
    pub fn clear(&mut self) {
        self.allocated.clear();
        match &self.buffer {
            Some(buffer) => self.free_chunks.reset(buffer.len()),
            None => self.free_chunks.clear(),
        }
    }

    /// Releases the buffer and returns to the uninitialized state.
    ///
    /// The fit policy is kept.
    pub fn reset(&mut self) {
        self.buffer = None;
        self.free_chunks.clear();
        self.allocated.clear();
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

    /// Returns the free chunks in ascending offset order.
    #[must_use]
    pub fn free_chunks(&self) -> &[MemoryChunk] {
        self.free_chunks.as_slice()
    }

    #[must_use]
    pub fn free_chunk_count(&self) -> usize {
        self.free_chunks.len()
    }

    /// Returns the total number of free bytes.
    #[must_use]
    pub fn free_size(&self) -> usize {
        self.free_chunks.total_length()
    }

    /// Returns the allocated chunks in ascending offset order.
    pub fn allocated_chunks(&self) -> impl Iterator<Item = MemoryChunk> + '_ {
        self.allocated
            .iter()
            .map(|(&offset, &length)| MemoryChunk::new(offset, length))
    }

    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    /// Converts a pointer into an offset from the buffer start.
    ///
    /// Returns `None` when the allocator is uninitialized or `ptr` is outside
    /// the buffer.
    #[must_use]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        self.buffer.as_ref()?.offset_of(ptr)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;

    fn allocator(policy: FitPolicy, len: usize) -> FreeListAllocator {
        let mut allocator = FreeListAllocator::new(policy);
        allocator.init(len).unwrap();
        allocator
    }

    #[track_caller]
    fn assert_tiles(allocator: &FreeListAllocator) {
        let mut chunks: Vec<_> = allocator
            .free_chunks()
            .iter()
            .copied()
            .chain(allocator.allocated_chunks())
            .collect();
        chunks.sort_by_key(|chunk| chunk.offset);
        let mut end = 0;
        for chunk in &chunks {
            assert_eq!(chunk.offset, end, "gap or overlap at {chunk}");
            end = chunk.end();
        }
        assert_eq!(end, allocator.buffer_size());
        for pair in allocator.free_chunks().windows(2) {
            assert!(!pair[0].is_adjacent_to(&pair[1]), "{} touches {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_init() {
        let allocator = allocator(FitPolicy::FirstFit, 16);
        assert_eq!(allocator.buffer_size(), 16);
        assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(0, 16)]);
        assert_eq!(allocator.allocated_count(), 0);
    }

    #[test]
    fn test_init_zero_length() {
        let mut allocator = allocator(FitPolicy::FirstFit, 16);
        assert!(allocator.init(0).is_err());
        assert_eq!(allocator.buffer_size(), 0);
        assert_eq!(allocator.free_chunk_count(), 0);
        assert!(allocator.allocate(1).is_none());
    }

    #[test]
    fn test_allocate_splits() {
        for policy in [FitPolicy::FirstFit, FitPolicy::BestFit] {
            let mut allocator = allocator(policy, 64);
            allocator.allocate(12).unwrap();
            assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(12, 52)]);
            assert_tiles(&allocator);
        }
    }

    #[test]
    fn test_allocate_whole_buffer() {
        let mut allocator = allocator(FitPolicy::FirstFit, 32);
        allocator.allocate(32).unwrap();
        assert!(allocator.free_chunks().is_empty());
        assert!(allocator.allocate(1).is_none());
        assert_tiles(&allocator);
    }

    #[test]
    fn test_allocate_until_exhausted() {
        for policy in [FitPolicy::FirstFit, FitPolicy::BestFit] {
            let mut allocator = allocator(policy, 64);
            allocator.allocate(25).unwrap();
            allocator.allocate(25).unwrap();
            assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(50, 14)]);
            assert!(allocator.allocate(25).is_none());
            assert_eq!(allocator.allocated_count(), 2);
        }
    }

    #[test]
    fn test_allocate_zero() {
        let mut allocator = allocator(FitPolicy::FirstFit, 64);
        assert!(allocator.allocate(0).is_none());
        assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(0, 64)]);
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

        let c = allocator.allocate(14).unwrap();
        assert_eq!(c, b);
        assert_eq!(
            allocator.free_chunks(),
            &[
                MemoryChunk::new(0, 12),
                MemoryChunk::new(42, 18),
                MemoryChunk::new(76, 180),
            ]
        );
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

        let c = allocator.allocate(14).unwrap();
        assert_eq!(c, b);
        assert_eq!(
            allocator.free_chunks(),
            &[MemoryChunk::new(0, 16), MemoryChunk::new(54, 202)]
        );
        assert_tiles(&allocator);
    }

    #[test]
    fn test_set_policy_applies_to_next_allocation() {
        let mut allocator = allocator(FitPolicy::FirstFit, 128);
        let a = allocator.allocate(32).unwrap();
        allocator.allocate(8).unwrap();
        let b = allocator.allocate(16).unwrap();
        allocator.allocate(8).unwrap();
        allocator.free(a);
        allocator.free(b);

        allocator.set_policy(FitPolicy::BestFit);
        assert_eq!(allocator.policy(), FitPolicy::BestFit);
        assert_eq!(allocator.allocate(16), Some(b));

        allocator.set_policy(FitPolicy::FirstFit);
        assert_eq!(allocator.allocate(16), Some(a));
    }

    #[test]
    fn test_free_keeps_separated_chunks() {
        let mut allocator = allocator(FitPolicy::FirstFit, 128);
        let ptrs: Vec<_> = (0..5).map(|_| allocator.allocate(1).unwrap()).collect();
        allocator.free(ptrs[0]);
        allocator.free(ptrs[2]);
        allocator.free(ptrs[4]);
        assert_eq!(
            allocator.free_chunks(),
            &[
                MemoryChunk::new(0, 1),
                MemoryChunk::new(2, 1),
                MemoryChunk::new(4, 124),
            ]
        );
        assert_eq!(allocator.allocated_count(), 2);
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
        assert_eq!(allocator.free_chunk_count(), 3);
        assert_eq!(allocator.free_chunks()[1], MemoryChunk::new(28, 16));
        assert_tiles(&allocator);
    }

    #[test]
    fn test_free_coalesces_everything() {
        let mut allocator = allocator(FitPolicy::FirstFit, 100);
        let ptrs: Vec<_> = (0..100).map(|_| allocator.allocate(1).unwrap()).collect();
        assert!(allocator.free_chunks().is_empty());
        for &ptr in ptrs.iter().skip(1).step_by(2) {
            allocator.free(ptr);
            assert_tiles(&allocator);
        }
        assert_eq!(allocator.free_chunk_count(), 50);
        for &ptr in ptrs.iter().step_by(2) {
            allocator.free(ptr);
            assert_tiles(&allocator);
        }
        assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(0, 100)]);
        assert_eq!(allocator.allocated_count(), 0);
    }

    #[test]
    fn test_free_invalid_is_noop() {
        let mut allocator = allocator(FitPolicy::FirstFit, 64);
        let ptr = allocator.allocate(16).unwrap();
        let before: Vec<_> = allocator.free_chunks().to_vec();

        let mut foreign = 0_u32;
        allocator.free((&raw mut foreign).cast());
        allocator.free(core::ptr::null_mut());
        allocator.free(ptr.wrapping_add(2));
        allocator.free(ptr.wrapping_add(16));

        assert_eq!(allocator.free_chunks(), before.as_slice());
        assert_eq!(allocator.allocated_count(), 1);

        allocator.free(ptr);
        allocator.free(ptr);
        assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(0, 64)]);
    }

    #[test]
    fn test_clear() {
        let mut allocator = allocator(FitPolicy::FirstFit, 64);
        let ptr = allocator.allocate(16).unwrap();
        allocator.allocate(12).unwrap();
        allocator.free(ptr);
        allocator.clear();
        assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(0, 64)]);
        assert_eq!(allocator.allocated_count(), 0);
        assert_eq!(allocator.buffer_size(), 64);
    }

    #[test]
    fn test_reset() {
        let mut allocator = allocator(FitPolicy::BestFit, 64);
        allocator.allocate(16).unwrap();
        allocator.reset();
        assert_eq!(allocator.buffer_size(), 0);
        assert_eq!(allocator.free_chunk_count(), 0);
        assert_eq!(allocator.allocated_count(), 0);
        assert_eq!(allocator.policy(), FitPolicy::BestFit);
        assert!(allocator.allocate(1).is_none());
    }

    #[test]
    fn test_allocations_hold_data() {
        let mut allocator = allocator(FitPolicy::FirstFit, 400);
        let ptrs: Vec<_> = (0..20).map(|_| allocator.allocate(20).unwrap()).collect();
        for (i, &ptr) in ptrs.iter().enumerate() {
            unsafe { ptr.write_bytes(i as u8, 20) };
        }
        for (i, &ptr) in ptrs.iter().enumerate() {
            let bytes = unsafe { core::slice::from_raw_parts(ptr, 20) };
            assert!(bytes.iter().all(|&b| b == i as u8));
        }
        for &ptr in ptrs.iter().step_by(2) {
            allocator.free(ptr);
        }
        for &ptr in ptrs.iter().skip(1).step_by(2) {
            allocator.free(ptr);
        }
        assert_eq!(allocator.free_chunks(), &[MemoryChunk::new(0, 400)]);
    }
}
