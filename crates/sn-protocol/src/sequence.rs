//! Wraparound-aware sequence arithmetic
//!
//! Sequence numbers are unsigned 16-bit values that live on a circle: the
//! counter overflows from 65535 back to 0 without breaking ordering. Two
//! sequences are compared through the signed 16-bit result of their
//! difference, so anything up to 32767 steps "ahead" of a sequence orders
//! after it and anything up to 32768 steps "behind" orders before it.
//!
//! ```
//! use sn_protocol::sequence::{is_less_than, is_less_than_or_equal};
//!
//! assert!(is_less_than(65535, 2));
//! assert!(is_less_than_or_equal(7, 7));
//! assert!(!is_less_than(2, 65535));
//! ```

use std::cmp::Ordering;

/// Signed distance from `b` to `a` on the 16-bit circle.
///
/// This is `(a - b)` computed modulo 65536 and reinterpreted as `i16`.
#[inline]
pub fn sequence_diff(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

/// True iff `a` orders at or before `b`.
#[inline]
pub fn is_less_than_or_equal(a: u16, b: u16) -> bool {
    sequence_diff(a, b) <= 0
}

/// True iff `a` orders strictly before `b`.
#[inline]
pub fn is_less_than(a: u16, b: u16) -> bool {
    sequence_diff(a, b) < 0
}

/// True iff `a` orders strictly after `b`.
#[inline]
pub fn is_greater_than(a: u16, b: u16) -> bool {
    sequence_diff(a, b) > 0
}

/// Ordering of `a` relative to `b` under the wraparound comparator.
///
/// Not a total order over the whole space: two sequences exactly 32768
/// apart each compare as less than the other. Callers keep their windows
/// well inside half the space.
#[inline]
pub fn sequence_cmp(a: u16, b: u16) -> Ordering {
    sequence_diff(a, b).cmp(&0)
}

/// The sequence following `s`, wrapping at 65535.
#[inline]
pub fn next_sequence(s: u16) -> u16 {
    s.wrapping_add(1)
}
