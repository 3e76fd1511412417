//! Offset-ordered collections of buffer spans.
//!
//! [`MemoryChunk`] describes a byte span `[offset, offset + length)` inside a
//! managed buffer. [`ChunkSet`] stores non-overlapping chunks sorted by their
//! offset and merges chunks that become adjacent, which is exactly the
//! bookkeeping a free list needs: freeing a span is an [`insert`], handing out
//! part of a span is a [`carve`].
//!
//! # Examples
//!
//! ```
//! use chunk_set::{ChunkSet, MemoryChunk};
//!
//! let mut set = ChunkSet::new();
//!
//! set.insert(MemoryChunk::new(0, 4));
//! set.insert(MemoryChunk::new(8, 4));
//! set.insert(MemoryChunk::new(4, 4)); // fills the gap, all three merge
//!
//! assert_eq!(set.as_slice(), &[MemoryChunk::new(0, 12)]);
//!
//! // Take 5 bytes from the low end of the chunk
//! let taken = set.carve(0, 5);
//! assert_eq!(taken, MemoryChunk::new(0, 5));
//! assert_eq!(set.as_slice(), &[MemoryChunk::new(5, 7)]);
//! ```
//!
//! # Performance
//!
//! - Lookup by offset: O(log n)
//! - Insert: O(n) worst case for the element shift, O(log n) search
//! - Carve: O(1) unless the chunk is consumed entirely, then O(n)

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

use alloc::vec::Vec;
use core::{fmt, ops::Range, slice};

/// A span of bytes inside a buffer, identified by its offset from the buffer
/// start.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryChunk {
    /// Distance in bytes from the buffer start.
    pub offset: usize,
    /// Number of bytes covered by the chunk.
    pub length: usize,
}

impl MemoryChunk {
    /// Creates a chunk covering `[offset, offset + length)`.
    #[must_use]
    pub const fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Returns the offset one past the last byte of the chunk.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + self.length
    }

    /// Returns the chunk as a byte range.
    #[must_use]
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns `true` if `next` starts exactly where `self` ends.
    ///
    /// Adjacency is directional: `a.is_adjacent_to(&b)` does not imply
    /// `b.is_adjacent_to(&a)`.
    #[must_use]
    pub const fn is_adjacent_to(&self, next: &Self) -> bool {
        self.end() == next.offset
    }

    /// Returns `true` if the two chunks share at least one byte.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

impl fmt::Display for MemoryChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{} ({} bytes)", self.offset, self.end(), self.length)
    }
}

/// A collection of non-overlapping chunks stored in ascending offset order.
///
/// Adjacent chunks never coexist in the set: [`insert`](Self::insert) merges
/// the new chunk with its predecessor and successor when they touch it.
///
/// # Examples
///
/// ```
/// use chunk_set::{ChunkSet, MemoryChunk};
///
/// let mut set = ChunkSet::whole(16);
/// set.carve(0, 4);
/// set.insert(MemoryChunk::new(0, 4));
/// assert_eq!(set.as_slice(), &[MemoryChunk::new(0, 16)]);
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct ChunkSet {
    chunks: Vec<MemoryChunk>,
}

impl ChunkSet {
    /// Creates a new empty `ChunkSet`.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_set::ChunkSet;
    ///
    /// let set = ChunkSet::new();
    /// assert!(set.is_empty());
    /// ```
    #[must_use]
    pub const fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Creates a set holding one chunk `[0, length)`.
    ///
    /// A zero `length` yields an empty set.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_set::{ChunkSet, MemoryChunk};
    ///
    /// let set = ChunkSet::whole(64);
    /// assert_eq!(set.as_slice(), &[MemoryChunk::new(0, 64)]);
    /// ```
    #[must_use]
    pub fn whole(length: usize) -> Self {
        let mut this = Self::new();
        this.reset(length);
        this
    }

    /// Replaces the contents with one chunk `[0, length)`.
    pub fn reset(&mut self, length: usize) {
        self.chunks.clear();
        if length > 0 {
            self.chunks.push(MemoryChunk::new(0, length));
        }
    }

    /// Removes every chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// Returns an iterator over the chunks in ascending offset order.
    pub fn iter(&self) -> slice::Iter<'_, MemoryChunk> {
        self.chunks.iter()
    }

    /// Returns a slice containing all chunks in ascending offset order.
    #[must_use]
    pub fn as_slice(&self) -> &[MemoryChunk] {
        self.chunks.as_slice()
    }

    /// Returns the number of chunks in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if the set contains no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the sum of the lengths of all chunks.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_set::{ChunkSet, MemoryChunk};
    ///
    /// let set: ChunkSet = [MemoryChunk::new(0, 3), MemoryChunk::new(10, 5)]
    ///     .into_iter()
    ///     .collect();
    /// assert_eq!(set.total_length(), 8);
    /// ```
    #[must_use]
    pub fn total_length(&self) -> usize {
        self.chunks.iter().map(|chunk| chunk.length).sum()
    }

    /// Searches for the chunk starting at `offset`.
    ///
    /// Returns `Ok(index)` if a chunk starts exactly at `offset`, otherwise
    /// `Err(index)` with the position where a chunk starting at `offset` would
    /// be inserted.
    pub fn position_of(&self, offset: usize) -> Result<usize, usize> {
        self.chunks.binary_search_by_key(&offset, |chunk| chunk.offset)
    }

    /// Inserts a chunk, merging it with adjacent neighbours.
    ///
    /// Returns the index of the chunk that now covers the inserted span.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is empty or overlaps a chunk already in the set.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunk_set::{ChunkSet, MemoryChunk};
    ///
    /// let mut set = ChunkSet::new();
    /// set.insert(MemoryChunk::new(0, 2));
    /// set.insert(MemoryChunk::new(4, 2));
    /// assert_eq!(set.len(), 2);
    ///
    /// let index = set.insert(MemoryChunk::new(2, 2));
    /// assert_eq!(index, 0);
    /// assert_eq!(set.as_slice(), &[MemoryChunk::new(0, 6)]);
    /// ```
    pub fn insert(&mut self, chunk: MemoryChunk) -> usize {
        assert!(!chunk.is_empty(), "Cannot insert empty chunk: {chunk}");

        let index = match self.position_of(chunk.offset) {
            Ok(index) => panic!("Chunk {chunk} overlaps {}", self.chunks[index]),
            Err(index) => index,
        };
        if let Some(prev) = index.checked_sub(1).map(|i| &self.chunks[i]) {
            assert!(!prev.overlaps(&chunk), "Chunk {chunk} overlaps {prev}");
        }
        if let Some(next) = self.chunks.get(index) {
            assert!(!next.overlaps(&chunk), "Chunk {chunk} overlaps {next}");
        }

        let merge_prev = index > 0 && self.chunks[index - 1].is_adjacent_to(&chunk);
        let merge_next = self
            .chunks
            .get(index)
            .is_some_and(|next| chunk.is_adjacent_to(next));

        match (merge_prev, merge_next) {
            (true, true) => {
                let next = self.chunks.remove(index);
                self.chunks[index - 1].length += chunk.length + next.length;
                index - 1
            }
            (true, false) => {
                self.chunks[index - 1].length += chunk.length;
                index - 1
            }
            (false, true) => {
                let next = &mut self.chunks[index];
                next.offset = chunk.offset;
                next.length += chunk.length;
                index
            }
            (false, false) => {
                self.chunks.insert(index, chunk);
                index
            }
        }
    }

    /// Takes `size` bytes from the low end of the chunk at `index`.
    ///
    /// The chunk shrinks in place, or is removed when `size` equals its
    /// length. Returns the span that was taken.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds, `size` is zero, or `size` exceeds
    /// the chunk's length.
    pub fn carve(&mut self, index: usize, size: usize) -> MemoryChunk {
        let chunk = &mut self.chunks[index];
        assert!(
            size > 0 && size <= chunk.length,
            "Cannot carve {size} bytes from {chunk}"
        );

        let carved = MemoryChunk::new(chunk.offset, size);
        if size == chunk.length {
            self.chunks.remove(index);
        } else {
            chunk.offset += size;
            chunk.length -= size;
        }
        carved
    }

}

impl FromIterator<MemoryChunk> for ChunkSet {
    fn from_iter<T: IntoIterator<Item = MemoryChunk>>(iter: T) -> Self {
        let mut this = Self::new();
        this.extend(iter);
        this
    }
}

impl Extend<MemoryChunk> for ChunkSet {
    fn extend<T: IntoIterator<Item = MemoryChunk>>(&mut self, iter: T) {
        for chunk in iter {
            self.insert(chunk);
        }
    }
}
