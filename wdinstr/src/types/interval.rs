//! Closed integer intervals over arbitrary-precision bounds.
//!
//! Every operation returns the tightest interval that contains all
//! results of applying the operator to members of the operands. Bounds are
//! [`BigInt`], so computing a result interval never overflows itself; the
//! caller is responsible for checking the result against a declared width.
use std::fmt::Display;

use num_bigint::BigInt;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest shift amount for which an interval is computed. Anything wider is
/// considered unbounded.
const MAX_SHIFT: u32 = 1024;

/// A non-empty closed interval `[lo, hi]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interval {
    lo: BigInt,
    hi: BigInt,
}

impl Interval {
    /// Creates `[lo, hi]`, or `None` when `lo > hi`.
    pub fn new(lo: impl Into<BigInt>, hi: impl Into<BigInt>) -> Option<Self> {
        let (lo, hi) = (lo.into(), hi.into());
        (lo <= hi).then_some(Self { lo, hi })
    }

    /// The single-value interval `[v, v]`.
    pub fn point(v: impl Into<BigInt>) -> Self {
        let v = v.into();
        Self {
            lo: v.clone(),
            hi: v,
        }
    }

    #[inline]
    pub fn lo(&self) -> &BigInt {
        &self.lo
    }

    #[inline]
    pub fn hi(&self) -> &BigInt {
        &self.hi
    }

    /// Returns the value if the interval holds exactly one value.
    pub fn as_point(&self) -> Option<&BigInt> {
        (self.lo == self.hi).then_some(&self.lo)
    }

    pub fn contains_value(&self, v: &BigInt) -> bool {
        &self.lo <= v && v <= &self.hi
    }

    /// Returns `true` if `other ⊆ self`.
    pub fn contains(&self, other: &Interval) -> bool {
        self.lo <= other.lo && other.hi <= self.hi
    }

    pub fn is_subset_of(&self, other: &Interval) -> bool {
        other.contains(self)
    }

    pub fn is_non_negative(&self) -> bool {
        self.lo >= BigInt::ZERO
    }

    /// Smallest interval containing both operands.
    pub fn hull(&self, other: &Interval) -> Interval {
        Interval {
            lo: (&self.lo).min(&other.lo).clone(),
            hi: (&self.hi).max(&other.hi).clone(),
        }
    }

    /// Common part of both operands, `None` if they are disjoint.
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        Interval::new(
            (&self.lo).max(&other.lo).clone(),
            (&self.hi).min(&other.hi).clone(),
        )
    }

    pub fn is_disjoint(&self, other: &Interval) -> bool {
        self.hi < other.lo || other.hi < self.lo
    }

    /// Shrinks the interval so that it no longer contains `v`. Only possible
    /// when `v` is one of the bounds; otherwise the interval is unchanged.
    /// Returns `None` if the interval was exactly `[v, v]`.
    pub fn exclude(&self, v: &BigInt) -> Option<Interval> {
        if !self.contains_value(v) {
            Some(self.clone())
        } else if &self.lo == v {
            Interval::new(v + 1, self.hi.clone())
        } else if &self.hi == v {
            Interval::new(self.lo.clone(), v - 1)
        } else {
            Some(self.clone())
        }
    }

    pub fn add(&self, rhs: &Interval) -> Interval {
        Interval {
            lo: &self.lo + &rhs.lo,
            hi: &self.hi + &rhs.hi,
        }
    }

    pub fn sub(&self, rhs: &Interval) -> Interval {
        Interval {
            lo: &self.lo - &rhs.hi,
            hi: &self.hi - &rhs.lo,
        }
    }

    pub fn neg(&self) -> Interval {
        Interval {
            lo: -&self.hi,
            hi: -&self.lo,
        }
    }

    pub fn mul(&self, rhs: &Interval) -> Interval {
        Self::from_corners([
            &self.lo * &rhs.lo,
            &self.lo * &rhs.hi,
            &self.hi * &rhs.lo,
            &self.hi * &rhs.hi,
        ])
    }

    /// Truncating division. Zero is removed from the divisor first; `None`
    /// is returned only when the divisor is exactly `[0, 0]`.
    pub fn quo(&self, rhs: &Interval) -> Option<Interval> {
        let parts = rhs.split_nonzero();
        let mut acc: Option<Interval> = None;
        for d in parts.into_iter().flatten() {
            let q = Self::from_corners([
                &self.lo / &d.lo,
                &self.lo / &d.hi,
                &self.hi / &d.lo,
                &self.hi / &d.hi,
            ]);
            acc = Some(match acc {
                Some(prev) => prev.hull(&q),
                None => q,
            });
        }
        acc
    }

    /// Truncating remainder (the result has the sign of the dividend).
    pub fn rem(&self, rhs: &Interval) -> Option<Interval> {
        if rhs.lo == BigInt::ZERO && rhs.hi == BigInt::ZERO {
            return None;
        }
        let magnitude = (-&rhs.lo).max(rhs.hi.clone()) - 1;
        let zero = BigInt::ZERO;
        let lo = if self.lo >= zero {
            zero.clone()
        } else {
            self.lo.clone().max(-&magnitude)
        };
        let hi = if self.hi <= zero {
            zero
        } else {
            self.hi.clone().min(magnitude)
        };
        Interval::new(lo, hi)
    }

    /// Left shift by a non-negative amount.
    pub fn shl(&self, rhs: &Interval) -> Option<Interval> {
        let (s_lo, s_hi) = rhs.shift_amounts()?;
        Some(Self::from_corners([
            &self.lo << s_lo,
            &self.lo << s_hi,
            &self.hi << s_lo,
            &self.hi << s_hi,
        ]))
    }

    /// Arithmetic right shift (rounds towards negative infinity).
    pub fn shr(&self, rhs: &Interval) -> Option<Interval> {
        let (s_lo, s_hi) = rhs.shift_amounts()?;
        Some(Self::from_corners([
            &self.lo >> s_lo,
            &self.lo >> s_hi,
            &self.hi >> s_lo,
            &self.hi >> s_hi,
        ]))
    }

    /// Bitwise and of non-negative operands.
    pub fn bitand(&self, rhs: &Interval) -> Option<Interval> {
        if !self.is_non_negative() || !rhs.is_non_negative() {
            return None;
        }
        Interval::new(BigInt::ZERO, (&self.hi).min(&rhs.hi).clone())
    }

    /// Bitwise or of non-negative operands.
    pub fn bitor(&self, rhs: &Interval) -> Option<Interval> {
        if !self.is_non_negative() || !rhs.is_non_negative() {
            return None;
        }
        let lo = (&self.lo).max(&rhs.lo).clone();
        Interval::new(lo, Self::mask_for(self.hi.clone().max(rhs.hi.clone())))
    }

    /// Bitwise xor of non-negative operands.
    pub fn bitxor(&self, rhs: &Interval) -> Option<Interval> {
        if !self.is_non_negative() || !rhs.is_non_negative() {
            return None;
        }
        Interval::new(
            BigInt::ZERO,
            Self::mask_for(self.hi.clone().max(rhs.hi.clone())),
        )
    }

    /// `self & !rhs` for non-negative operands.
    pub fn bitandnot(&self, rhs: &Interval) -> Option<Interval> {
        if !self.is_non_negative() || !rhs.is_non_negative() {
            return None;
        }
        Interval::new(BigInt::ZERO, self.hi.clone())
    }

    /// All-ones value covering the bit length of `v`.
    fn mask_for(v: BigInt) -> BigInt {
        (BigInt::from(1) << v.bits()) - 1
    }

    fn from_corners(corners: [BigInt; 4]) -> Interval {
        let [a, b, c, d] = corners;
        let lo = a.clone().min(b.clone()).min(c.clone()).min(d.clone());
        let hi = a.max(b).max(c).max(d);
        Interval { lo, hi }
    }

    fn shift_amounts(&self) -> Option<(usize, usize)> {
        if !self.is_non_negative() || self.hi > BigInt::from(MAX_SHIFT) {
            return None;
        }
        let lo = usize::try_from(&self.lo).ok()?;
        let hi = usize::try_from(&self.hi).ok()?;
        Some((lo, hi))
    }

    /// Splits the interval into its strictly negative and strictly positive
    /// parts.
    fn split_nonzero(&self) -> [Option<Interval>; 2] {
        let zero = BigInt::ZERO;
        let neg = Interval::new(self.lo.clone(), (&self.hi).min(&BigInt::from(-1)).clone());
        let pos = Interval::new((&self.lo).max(&BigInt::from(1)).clone(), self.hi.clone());
        if self.hi < zero {
            [Some(self.clone()), None]
        } else if self.lo > zero {
            [None, Some(self.clone())]
        } else {
            [neg, pos]
        }
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(lo: i64, hi: i64) -> Interval {
        Interval::new(lo, hi).unwrap()
    }

    #[test]
    fn empty_interval_is_rejected() {
        assert!(Interval::new(3, 2).is_none());
        assert!(Interval::new(2, 2).is_some());
    }

    #[test]
    fn division_skips_zero_divisor() {
        assert_eq!(iv(10, 10).quo(&iv(0, 5)), Some(iv(2, 10)));
        assert_eq!(iv(10, 10).quo(&iv(-2, 2)), Some(iv(-10, 10)));
        assert_eq!(iv(10, 10).quo(&iv(0, 0)), None);
    }

    #[test]
    fn remainder_follows_dividend_sign() {
        assert_eq!(iv(0, 100).rem(&iv(1, 8)), Some(iv(0, 7)));
        assert_eq!(iv(-100, -3).rem(&iv(1, 8)), Some(iv(-7, 0)));
        assert_eq!(iv(0, 3).rem(&iv(10, 10)), Some(iv(0, 3)));
    }

    #[test]
    fn bitwise_masks() {
        assert_eq!(iv(0, 5).bitor(&iv(0, 8)), Some(iv(0, 15)));
        assert_eq!(iv(0, 300).bitand(&iv(0, 255)), Some(iv(0, 255)));
        assert_eq!(iv(-1, 3).bitxor(&iv(0, 1)), None);
    }

    #[test]
    fn exclude_only_at_edges() {
        assert_eq!(iv(0, 9).exclude(&BigInt::ZERO), Some(iv(1, 9)));
        assert_eq!(iv(0, 9).exclude(&BigInt::from(4)), Some(iv(0, 9)));
        assert_eq!(iv(4, 4).exclude(&BigInt::from(4)), None);
    }
}
