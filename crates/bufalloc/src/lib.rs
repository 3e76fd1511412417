//! Allocators that hand out memory from a single owned buffer.
//!
//! Every allocator acquires one heap-backed [`Buffer`] in `init` and serves
//! requests from it until `reset` or drop. Capacity exhaustion and invalid
//! frees never panic: allocation returns `None` and a bad `free` is a no-op.
//!
//! # Available Allocators
//!
//! ## [`LinearAllocator`]
//!
//! A bump allocator. Each allocation advances an offset; the only way to
//! release memory is to release all of it at once.
//!
//! ## [`StackAllocator`]
//!
//! A bump allocator that records a footer after every allocation, so the most
//! recent allocation can be released (LIFO).
//!
//! ## [`PoolAllocator`]
//!
//! Fixed-size chunks threaded into an intrusive singly-linked free list.
//! Allocation and release are O(1) apart from double-free detection.
//!
//! ## [`FreeListAllocator`](free_list::FreeListAllocator)
//!
//! A general-purpose allocator that tracks free chunks out-of-band in an
//! offset-ordered set, selects a chunk with a [`FitPolicy`](free_list::FitPolicy),
//! splits it, and coalesces neighbours on release.
//!
//! ## [`IntrusiveFreeListAllocator`](free_list::IntrusiveFreeListAllocator)
//!
//! The same algorithm with chunk headers stored inside the buffer itself.
//!
//! # Performance Characteristics
//!
//! | Allocator | Allocation | Deallocation | Overhead per allocation |
//! |-----------|------------|--------------|-------------------------|
//! | `LinearAllocator` | O(1) | O(1) (all) | alignment padding |
//! | `StackAllocator` | O(1) | O(1) (last) | padding + `usize` footer |
//! | `PoolAllocator` | O(1) | O(n) | none |
//! | `FreeListAllocator` | O(n) | O(n) | none (out-of-band) |
//! | `IntrusiveFreeListAllocator` | O(n) | O(n) | 4-byte header |
//!
//! # Examples
//!
//! ```
//! use bufalloc::free_list::{FitPolicy, FreeListAllocator};
//!
//! let mut allocator = FreeListAllocator::new(FitPolicy::BestFit);
//! allocator.init(256).unwrap();
//!
//! let a = allocator.allocate(16).unwrap();
//! let b = allocator.allocate(32).unwrap();
//! assert_eq!(allocator.free_size(), 256 - 48);
//!
//! allocator.free(a);
//! allocator.free(b);
//! assert_eq!(allocator.free_chunk_count(), 1);
//! ```
//!
//! # Thread Safety
//!
//! The allocators are `Send` but not `Sync`. Every operation takes `&mut self`.

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub mod align;
pub mod buffer;
mod error;
pub mod free_list;
pub mod linear;
pub mod pool;
pub mod stack;

pub use self::{
    buffer::{BUFFER_ALIGN, Buffer, BufferError},
    error::InitError,
    linear::LinearAllocator,
    pool::PoolAllocator,
    stack::StackAllocator,
};
use self::free_list::{FreeListAllocator, IntrusiveFreeListAllocator};

/// Lifecycle operations shared by every allocator in this crate.
///
/// `init` and `allocate` differ in their parameters between allocators and
/// are inherent methods.
pub trait BufferAllocator {
    /// Returns the length of the owned buffer, or 0 when uninitialized.
    fn buffer_size(&self) -> usize;

    /// Returns `true` if the allocator owns a buffer.
    fn is_initialized(&self) -> bool {
        self.buffer_size() > 0
    }

    /// Converts a pointer handed out by the allocator into an offset from the
    /// buffer start.
    ///
    /// Returns `None` when uninitialized or when `ptr` is outside the buffer.
    fn offset_of(&self, ptr: *const u8) -> Option<usize>;

    /// Releases every allocation without touching the buffer contents.
    fn clear(&mut self);

    /// Releases the buffer and returns to the uninitialized state.
    fn reset(&mut self);
}

macro_rules! impl_buffer_allocator {
    ($($ty:ty),* $(,)?) => {
        $(
            impl BufferAllocator for $ty {
                fn buffer_size(&self) -> usize {
                    <$ty>::buffer_size(self)
                }

                fn offset_of(&self, ptr: *const u8) -> Option<usize> {
                    <$ty>::offset_of(self, ptr)
                }

                fn clear(&mut self) {
                    <$ty>::clear(self);
                }

                fn reset(&mut self) {
                    <$ty>::reset(self);
                }
            }
        )*
    };
}

impl_buffer_allocator!(
    LinearAllocator,
    StackAllocator,
    PoolAllocator,
    FreeListAllocator,
    IntrusiveFreeListAllocator,
);
