//! Sequence-space arithmetic.
//!
//! Sequence numbers are byte offsets modulo 2^32. Ordering is only meaningful
//! between numbers less than half the space apart, which every window in this
//! crate guarantees. Both endpoints answer every "is this old / is this in
//! the window" question through [`in_range`] and [`is_duplicate_or_old`].

use crate::core::constants::SEQ_HALF_SPACE;

/// A 32-bit wrapping sequence (or acknowledgment) number.
pub type SeqNum = u32;

/// Check if `value` lies in the cyclic interval `[lo, hi]` walking forward
/// from `lo`.
///
/// When `hi` precedes `lo` numerically the interval wraps past `u32::MAX`.
#[inline]
pub fn in_range(value: SeqNum, lo: SeqNum, hi: SeqNum) -> bool {
    value.wrapping_sub(lo) <= hi.wrapping_sub(lo)
}

/// Check if `seq` precedes the window `[window_lo, window_hi]`, meaning the
/// byte was already consumed.
///
/// A number outside the window that lies more than half the space behind
/// `window_lo` is treated as "ahead" instead, and this returns `false`.
#[inline]
pub fn is_duplicate_or_old(seq: SeqNum, window_lo: SeqNum, window_hi: SeqNum) -> bool {
    !in_range(seq, window_lo, window_hi) && window_lo.wrapping_sub(seq) <= SEQ_HALF_SPACE
}

/// Forward distance from `from` to `to`.
#[inline]
pub fn distance(from: SeqNum, to: SeqNum) -> u32 {
    to.wrapping_sub(from)
}

/// `seq` moved forward by `bytes`.
#[inline]
pub fn advance(seq: SeqNum, bytes: usize) -> SeqNum {
    seq.wrapping_add(bytes as u32)
}

/// Check if `a` comes strictly before `b` (within half the space).
#[inline]
pub fn precedes(a: SeqNum, b: SeqNum) -> bool {
    a != b && in_range(b, a, a.wrapping_add(SEQ_HALF_SPACE - 1))
}
