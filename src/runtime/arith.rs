//! Overflow-checked size arithmetic

/// Multiply two sizes, returning `None` if the product overflows.
///
/// Overflow is detected by dividing the wrapped product back out, which
/// works for any unsigned width.
#[inline]
pub fn checked_multiply(a: u64, b: u64) -> Option<u64> {
    if a == 0 {
        return Some(0);
    }
    let t = a.wrapping_mul(b);
    if t / a != b {
        None
    } else {
        Some(t)
    }
}

/// Multiply two sizes that the caller has already proven cannot overflow.
///
/// # Panics
///
/// Panics if the product overflows. That is a logic error in the caller,
/// not bad input.
#[inline]
pub fn checked_multiply_assert(a: u64, b: u64) -> u64 {
    match checked_multiply(a, b) {
        Some(product) => product,
        None => panic!("Overflow in checked multiply: {} * {}", a, b),
    }
}
