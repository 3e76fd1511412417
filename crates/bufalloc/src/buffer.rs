//! Heap-backed byte buffers managed by the allocators.
//!
//! A [`Buffer`] is acquired once per `init` call and owned by the allocator
//! until `reset` or drop. Bookkeeping that lives inside the buffer (stack
//! footers, pool links, intrusive free-list headers) goes through
//! [`Buffer::read_bytes`] and [`Buffer::write_bytes`], which are the only
//! places that touch the memory through raw pointers.

use alloc::alloc::{self as heap, Layout, LayoutError};
use core::{fmt, ptr::NonNull};

use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use snafu_utils::Location;

/// Alignment of the first byte of every buffer.
///
/// Alignment requests up to this value are satisfied purely by offset
/// arithmetic.
pub const BUFFER_ALIGN: usize = 16;

#[derive(Debug, Snafu)]
pub enum BufferError {
    #[snafu(display("buffer length must be greater than zero"))]
    ZeroLength {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid layout for a {len}-byte buffer: {source}"))]
    Layout {
        len: usize,
        #[snafu(source)]
        source: LayoutError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to acquire {len} bytes from the global allocator"))]
    OutOfMemory {
        len: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// An exclusively owned, zero-initialized, fixed-length byte region.
pub struct Buffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The buffer owns its allocation exclusively.
unsafe impl Send for Buffer {}

impl Buffer {
    /// Acquires a zeroed buffer of `len` bytes aligned to [`BUFFER_ALIGN`].
    ///
    /// # Examples
    ///
    /// ```
    /// use bufalloc::{BUFFER_ALIGN, Buffer};
    ///
    /// let buffer = Buffer::new(64).unwrap();
    /// assert_eq!(buffer.len(), 64);
    /// assert_eq!(buffer.as_ptr().addr() % BUFFER_ALIGN, 0);
    ///
    /// assert!(Buffer::new(0).is_err());
    /// ```
    pub fn new(len: usize) -> Result<Self, BufferError> {
        ensure!(len > 0, ZeroLengthSnafu);
        let layout = Layout::from_size_align(len, BUFFER_ALIGN).context(LayoutSnafu { len })?;
        let ptr = unsafe { heap::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).context(OutOfMemorySnafu { len })?;
        Ok(Self { ptr, layout })
    }

    /// Returns the length of the buffer in bytes.
    #[must_use]
    #[expect(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Returns a pointer to the first byte of the buffer.
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns the address of the first byte of the buffer.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.ptr.addr().get()
    }

    /// Converts a pointer into an offset from the buffer start.
    ///
    /// Returns `None` when `ptr` does not point inside the buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use bufalloc::Buffer;
    ///
    /// let buffer = Buffer::new(16).unwrap();
    /// assert_eq!(buffer.offset_of(buffer.ptr_at(5)), Some(5));
    /// assert_eq!(buffer.offset_of(core::ptr::null()), None);
    /// ```
    #[must_use]
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = ptr.addr().checked_sub(self.addr())?;
        (offset < self.len()).then_some(offset)
    }

    /// Returns a pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not inside the buffer.
    #[must_use]
    pub fn ptr_at(&self, offset: usize) -> *mut u8 {
        assert!(
            offset < self.len(),
            "offset {offset} out of bounds for {}-byte buffer",
            self.len()
        );
        unsafe { self.ptr.add(offset).as_ptr() }
    }

    /// Reads `N` bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the span `offset..offset + N` is not inside the buffer.
    pub(crate) fn read_bytes<const N: usize>(&self, offset: usize) -> [u8; N] {
        self.check_span(offset, N);
        unsafe { self.ptr.add(offset).cast::<[u8; N]>().read() }
    }

    /// Writes `bytes` starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the span `offset..offset + N` is not inside the buffer.
    pub(crate) fn write_bytes<const N: usize>(&mut self, offset: usize, bytes: [u8; N]) {
        self.check_span(offset, N);
        unsafe { self.ptr.add(offset).cast::<[u8; N]>().write(bytes) }
    }

    fn check_span(&self, offset: usize, len: usize) {
        assert!(
            offset
                .checked_add(len)
                .is_some_and(|end| end <= self.len()),
            "span {offset}+{len} out of bounds for {}-byte buffer",
            self.len()
        );
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { heap::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len())
            .finish()
    }
}
