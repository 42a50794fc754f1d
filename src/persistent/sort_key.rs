//! Dense sort keys for positional placement without renumbering.
//!
//! This module provides [`SortKey`], a member of a densely ordered space, and
//! [`SortKeySpace`], the pure functions that generate new keys before, after
//! or between existing ones.
//!
//! # Overview
//!
//! A key is an exact dyadic rational `integer + fraction`, where the fraction
//! is an arbitrary-length binary expansion stored as big-endian 64-bit words.
//! Every key produced from integer seeds by taking midpoints is dyadic, so no
//! rounding ever happens:
//!
//! - `after(k)` is `floor(k) + 1`
//! - `before(k)` is `ceil(k) - 1`
//! - `between(a, b)` is exactly `(a + b) / 2`
//!
//! Repeated insertion at the same boundary grows the fraction by one bit per
//! insertion. [`SortKey::fraction_bits`] exposes that growth so owners can
//! decide when to renumber.
//!
//! # Examples
//!
//! ```rust
//! use snapmap::persistent::{SortKey, SortKeySpace};
//!
//! let first = SortKeySpace::origin();
//! let last = SortKeySpace::after(&first).unwrap();
//! let middle = SortKeySpace::between(&first, &last);
//!
//! assert!(first < middle && middle < last);
//! assert_eq!(middle.fraction_bits(), 1);
//! assert_eq!(last, SortKey::from_integer(1));
//! ```

use smallvec::{SmallVec, smallvec};
use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Width of one fraction word in bits.
const WORD_BITS: u32 = 64;

/// Fraction words kept inline before spilling to the heap.
const INLINE_WORDS: usize = 2;

type Fraction = SmallVec<[u64; INLINE_WORDS]>;

// =============================================================================
// SortKey Definition
// =============================================================================

/// A key in a dense total order.
///
/// For any two keys `a < b` there is always a key strictly between them
/// (see [`SortKeySpace::between`]). Keys are compared numerically.
///
/// The fraction is kept canonical (no trailing zero words), which makes the
/// derived lexicographic ordering on `(integer, fraction)` coincide with the
/// numeric ordering.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    integer: i64,
    fraction: Fraction,
}

impl SortKey {
    /// Creates a key with no fractional part.
    #[inline]
    #[must_use]
    pub fn from_integer(integer: i64) -> Self {
        Self {
            integer,
            fraction: SmallVec::new(),
        }
    }

    /// Builds a key from raw parts, trimming trailing zero words.
    fn from_parts(integer: i64, mut fraction: Fraction) -> Self {
        while fraction.last() == Some(&0) {
            fraction.pop();
        }
        Self { integer, fraction }
    }

    /// Returns `floor(self)`.
    #[inline]
    #[must_use]
    pub const fn integer_part(&self) -> i64 {
        self.integer
    }

    /// Returns `true` if the key has no fractional part.
    #[inline]
    #[must_use]
    pub fn is_integer(&self) -> bool {
        self.fraction.is_empty()
    }

    /// Returns the number of significant binary digits after the point.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use snapmap::persistent::{SortKey, SortKeySpace};
    ///
    /// let zero = SortKey::from_integer(0);
    /// let one = SortKey::from_integer(1);
    /// let half = SortKeySpace::between(&zero, &one);
    /// let quarter = SortKeySpace::between(&zero, &half);
    ///
    /// assert_eq!(zero.fraction_bits(), 0);
    /// assert_eq!(half.fraction_bits(), 1);
    /// assert_eq!(quarter.fraction_bits(), 2);
    /// ```
    #[must_use]
    pub fn fraction_bits(&self) -> u32 {
        self.fraction.last().map_or(0, |last| {
            let words = u32::try_from(self.fraction.len()).unwrap_or(u32::MAX);
            words.saturating_mul(WORD_BITS) - last.trailing_zeros()
        })
    }

    /// Returns `ceil(self)`, or `None` if it does not fit in an `i64`.
    fn ceiling(&self) -> Option<i64> {
        if self.is_integer() {
            Some(self.integer)
        } else {
            self.integer.checked_add(1)
        }
    }

    #[inline]
    fn word(&self, position: usize) -> u64 {
        self.fraction.get(position).copied().unwrap_or(0)
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "SortKey({}", self.integer)?;
        if !self.fraction.is_empty() {
            formatter.write_str(" + 0x0.")?;
            for word in &self.fraction {
                write!(formatter, "{word:016x}")?;
            }
        }
        formatter.write_str(")")
    }
}

// =============================================================================
// SortKeySpace
// =============================================================================

/// Pure key generation over the dense [`SortKey`] order.
///
/// All functions are stateless. They are called from inside write
/// transactions, so no synchronisation is involved.
pub struct SortKeySpace;

impl SortKeySpace {
    /// The key assigned to the first element of an empty sequence.
    #[inline]
    #[must_use]
    pub fn origin() -> SortKey {
        SortKey::from_integer(0)
    }

    /// Returns a key strictly less than `key`.
    ///
    /// Returns `None` only when the integer range is exhausted.
    #[must_use]
    pub fn before(key: &SortKey) -> Option<SortKey> {
        key.ceiling()?.checked_sub(1).map(SortKey::from_integer)
    }

    /// Returns a key strictly greater than `key`.
    ///
    /// Returns `None` only when the integer range is exhausted.
    #[must_use]
    pub fn after(key: &SortKey) -> Option<SortKey> {
        key.integer.checked_add(1).map(SortKey::from_integer)
    }

    /// Returns the exact midpoint `(lower + upper) / 2`.
    ///
    /// `lower` must be strictly less than `upper`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use snapmap::persistent::{SortKey, SortKeySpace};
    ///
    /// let lower = SortKey::from_integer(-3);
    /// let upper = SortKey::from_integer(-2);
    /// let middle = SortKeySpace::between(&lower, &upper);
    ///
    /// assert!(lower < middle && middle < upper);
    /// assert_eq!(middle.integer_part(), -3);
    /// ```
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    pub fn between(lower: &SortKey, upper: &SortKey) -> SortKey {
        debug_assert!(lower < upper, "between requires lower < upper");

        let width = lower.fraction.len().max(upper.fraction.len());
        // One extra word receives the bit shifted out by the halving.
        let mut words: Fraction = smallvec![0; width + 1];

        let mut carry = 0u128;
        for position in (0..width).rev() {
            let sum = u128::from(lower.word(position)) + u128::from(upper.word(position)) + carry;
            words[position] = sum as u64;
            carry = sum >> WORD_BITS;
        }

        let integer_sum = i128::from(lower.integer) + i128::from(upper.integer) + carry as i128;
        let mut shifted_in = integer_sum.rem_euclid(2) as u64;
        // Halving two i64 values always lands back inside the i64 range.
        let integer = integer_sum.div_euclid(2) as i64;

        for word in &mut words {
            let shifted_out = *word & 1;
            *word = (shifted_in << (WORD_BITS - 1)) | (*word >> 1);
            shifted_in = shifted_out;
        }

        SortKey::from_parts(integer, words)
    }

    /// Returns `count` strictly increasing keys inside the open interval
    /// `(lower, upper)`, where a missing bound means unbounded.
    ///
    /// Bounded intervals are filled by recursive bisection, so precision
    /// grows with the logarithm of `count`. Returns `None` only when the
    /// integer range is exhausted at an unbounded end.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use snapmap::persistent::{SortKey, SortKeySpace};
    ///
    /// let lower = SortKey::from_integer(0);
    /// let upper = SortKey::from_integer(1);
    /// let keys = SortKeySpace::between_many(Some(&lower), Some(&upper), 7).unwrap();
    ///
    /// assert_eq!(keys.len(), 7);
    /// assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    /// assert!(keys.iter().all(|key| key.fraction_bits() <= 3));
    /// ```
    #[must_use]
    pub fn between_many(
        lower: Option<&SortKey>,
        upper: Option<&SortKey>,
        count: usize,
    ) -> Option<Vec<SortKey>> {
        if count == 0 {
            return Some(Vec::new());
        }
        let span = i64::try_from(count - 1).ok()?;

        match (lower, upper) {
            (None, None) => {
                let last = Self::origin().integer.checked_add(span)?;
                Some((0..=last).map(SortKey::from_integer).collect())
            }
            (Some(lower), None) => {
                let first = lower.integer.checked_add(1)?;
                let last = first.checked_add(span)?;
                Some((first..=last).map(SortKey::from_integer).collect())
            }
            (None, Some(upper)) => {
                let last = upper.ceiling()?.checked_sub(1)?;
                let first = last.checked_sub(span)?;
                Some((first..=last).map(SortKey::from_integer).collect())
            }
            (Some(lower), Some(upper)) => {
                let mut keys = Vec::with_capacity(count);
                Self::bisect(lower, upper, count, &mut keys);
                Some(keys)
            }
        }
    }

    fn bisect(lower: &SortKey, upper: &SortKey, count: usize, keys: &mut Vec<SortKey>) {
        if count == 0 {
            return;
        }
        let middle = Self::between(lower, upper);
        let before_middle = count / 2;
        Self::bisect(lower, &middle, before_middle, keys);
        keys.push(middle.clone());
        Self::bisect(&middle, upper, count - before_middle - 1, keys);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(-1, 0)]
    #[case(-7, 12)]
    #[case(i64::MIN, i64::MAX)]
    #[case(i64::MAX - 1, i64::MAX)]
    fn test_between_integers_is_strictly_inside(#[case] lower: i64, #[case] upper: i64) {
        let lower = SortKey::from_integer(lower);
        let upper = SortKey::from_integer(upper);
        let middle = SortKeySpace::between(&lower, &upper);
        assert!(lower < middle);
        assert!(middle < upper);
    }

    #[rstest]
    fn test_between_adjacent_integers_is_one_half() {
        let middle = SortKeySpace::between(&SortKey::from_integer(4), &SortKey::from_integer(5));
        assert_eq!(middle.integer_part(), 4);
        assert_eq!(middle.fraction_bits(), 1);
        assert_eq!(format!("{middle:?}"), "SortKey(4 + 0x0.8000000000000000)");
    }

    #[rstest]
    fn test_between_negative_adjacent_integers() {
        let middle = SortKeySpace::between(&SortKey::from_integer(-1), &SortKey::from_integer(0));
        assert_eq!(middle.integer_part(), -1);
        assert!(middle < SortKey::from_integer(0));
        assert!(middle > SortKey::from_integer(-1));
    }

    #[rstest]
    fn test_repeated_prepend_midpoints_keep_order_across_word_boundaries() {
        let lower = SortKey::from_integer(0);
        let mut upper = SortKey::from_integer(1);
        for step in 1..=200u32 {
            let middle = SortKeySpace::between(&lower, &upper);
            assert!(lower < middle, "step {step}");
            assert!(middle < upper, "step {step}");
            assert_eq!(middle.fraction_bits(), step);
            upper = middle;
        }
    }

    #[rstest]
    fn test_repeated_append_midpoints_keep_order_across_word_boundaries() {
        let mut lower = SortKey::from_integer(0);
        let upper = SortKey::from_integer(1);
        for step in 1..=150u32 {
            let middle = SortKeySpace::between(&lower, &upper);
            assert!(lower < middle, "step {step}");
            assert!(middle < upper, "step {step}");
            lower = middle;
        }
        assert_eq!(lower.integer_part(), 0);
    }

    #[rstest]
    fn test_before_and_after_fractional_key() {
        let key = SortKeySpace::between(&SortKey::from_integer(2), &SortKey::from_integer(3));
        assert_eq!(SortKeySpace::before(&key), Some(SortKey::from_integer(2)));
        assert_eq!(SortKeySpace::after(&key), Some(SortKey::from_integer(3)));
    }

    #[rstest]
    fn test_before_and_after_integer_key() {
        let key = SortKey::from_integer(2);
        assert_eq!(SortKeySpace::before(&key), Some(SortKey::from_integer(1)));
        assert_eq!(SortKeySpace::after(&key), Some(SortKey::from_integer(3)));
    }

    #[rstest]
    fn test_extremes_report_exhaustion() {
        assert_eq!(SortKeySpace::after(&SortKey::from_integer(i64::MAX)), None);
        assert_eq!(SortKeySpace::before(&SortKey::from_integer(i64::MIN)), None);
    }

    #[rstest]
    fn test_between_many_unbounded_seeds_from_origin() {
        let keys = SortKeySpace::between_many(None, None, 3).unwrap();
        assert_eq!(
            keys,
            vec![
                SortKey::from_integer(0),
                SortKey::from_integer(1),
                SortKey::from_integer(2)
            ]
        );
    }

    #[rstest]
    fn test_between_many_before_upper_bound() {
        let upper = SortKey::from_integer(0);
        let keys = SortKeySpace::between_many(None, Some(&upper), 2).unwrap();
        assert_eq!(keys, vec![SortKey::from_integer(-2), SortKey::from_integer(-1)]);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(15)]
    #[case(100)]
    fn test_between_many_bounded_is_sorted_and_inside(#[case] count: usize) {
        let lower = SortKey::from_integer(10);
        let upper = SortKeySpace::between(&lower, &SortKey::from_integer(11));
        let keys = SortKeySpace::between_many(Some(&lower), Some(&upper), count).unwrap();
        assert_eq!(keys.len(), count);
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(keys.iter().all(|key| &lower < key && key < &upper));
    }

    #[rstest]
    fn test_between_many_zero_count() {
        assert_eq!(SortKeySpace::between_many(None, None, 0), Some(Vec::new()));
    }
}
