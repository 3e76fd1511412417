//! Alignment arithmetic shared by the linear and stack allocators.

/// Returns the number of bytes needed to move `addr` up to a multiple of
/// `align`.
///
/// An `align` of 0 or 1 requests no alignment. Returns `None` when `align`
/// is not a power of two.
///
/// # Examples
///
/// ```
/// use bufalloc::align::padding;
///
/// assert_eq!(padding(0x1000, 8), Some(0));
/// assert_eq!(padding(0x1001, 8), Some(7));
/// assert_eq!(padding(0x1001, 0), Some(0));
/// assert_eq!(padding(0x1001, 12), None);
/// ```
#[must_use]
pub const fn padding(addr: usize, align: usize) -> Option<usize> {
    if align <= 1 {
        return Some(0);
    }
    if !align.is_power_of_two() {
        return None;
    }
    Some(addr.wrapping_neg() & (align - 1))
}
