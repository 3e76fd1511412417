use snafu::Snafu;
use snafu_utils::Location;

use crate::buffer::BufferError;

/// Errors returned when an allocator rejects its configuration at `init`.
///
/// A rejected `init` leaves the allocator uninitialized: every later
/// allocation fails until a successful `init`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display("failed to acquire buffer: {source}"))]
    Buffer {
        #[snafu(source)]
        source: BufferError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "chunk size {chunk_size} is smaller than the {min}-byte free-list link"
    ))]
    ChunkTooSmall {
        chunk_size: usize,
        min: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("buffer length {buffer_len} is not a multiple of chunk size {chunk_size}"))]
    LengthNotMultiple {
        buffer_len: usize,
        chunk_size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("pool must contain at least one chunk"))]
    ZeroChunks {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{chunks_amount} chunks of {chunk_size} bytes overflow the address space"))]
    PoolOverflow {
        chunk_size: usize,
        chunks_amount: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("buffer length {len} is smaller than the {min}-byte free header"))]
    BufferTooSmall {
        len: usize,
        min: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("buffer length {len} exceeds the {max}-byte header addressing limit"))]
    BufferTooLarge {
        len: usize,
        max: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Returns an `inspect_err` callback that logs a rejected `init`.
pub(crate) fn log_rejected(allocator: &'static str) -> impl Fn(&InitError) {
    move |err| tracing::warn!(allocator, error = %err, "rejected allocator init")
}
