//! Types module
//!
//! The type model is deliberately small: booleans, bounded integers,
//! fixed-length arrays, slices whose length is only known through facts, and
//! the two streaming cursor types used by suspendible code.
//!
//! - [`Interval`]: closed intervals with arbitrary-precision bounds.
//! - [`IntType`]: the machine representation (signedness and width).
//! - [`BoundedInt`]: an [`IntType`] refined to a sub-interval of its range.
use std::fmt::Display;

use num_bigint::BigInt;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumIter, IntoEnumIterator};

use crate::utils::Error;

pub mod interval;

pub use interval::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Signedness {
    Unsigned,
    Signed,
}

/// Machine integer: signedness and bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntType {
    pub signedness: Signedness,
    pub bits: u32,
}

impl IntType {
    pub const U8: Self = Self::unsigned(8);
    pub const U16: Self = Self::unsigned(16);
    pub const U32: Self = Self::unsigned(32);
    pub const U64: Self = Self::unsigned(64);
    pub const I8: Self = Self::signed(8);
    pub const I16: Self = Self::signed(16);
    pub const I32: Self = Self::signed(32);
    pub const I64: Self = Self::signed(64);

    /// Widths accepted by the language.
    pub const WIDTHS: [u32; 4] = [8, 16, 32, 64];

    pub const fn unsigned(bits: u32) -> Self {
        Self {
            signedness: Signedness::Unsigned,
            bits,
        }
    }

    pub const fn signed(bits: u32) -> Self {
        Self {
            signedness: Signedness::Signed,
            bits,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signedness == Signedness::Signed
    }

    pub fn min_value(&self) -> BigInt {
        match self.signedness {
            Signedness::Unsigned => BigInt::ZERO,
            Signedness::Signed => -(BigInt::from(1) << (self.bits - 1)),
        }
    }

    pub fn max_value(&self) -> BigInt {
        match self.signedness {
            Signedness::Unsigned => (BigInt::from(1) << self.bits) - 1,
            Signedness::Signed => (BigInt::from(1) << (self.bits - 1)) - 1,
        }
    }

    /// The interval of every value representable by this type.
    pub fn full_range(&self) -> Interval {
        Interval::new(self.min_value(), self.max_value())
            .unwrap_or_else(|| Interval::point(BigInt::ZERO))
    }

    /// Reduces `v` modulo `2^bits` into this type's range (two's complement).
    pub fn wrap(&self, v: &BigInt) -> BigInt {
        let modulus = BigInt::from(1) << self.bits;
        let mut r = v % &modulus;
        if r < BigInt::ZERO {
            r += &modulus;
        }
        if self.is_signed() && r > self.max_value() {
            r -= modulus;
        }
        r
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::iter().find(|ty| ty.to_string() == s)
    }

    /// Iterates over every supported machine integer.
    pub fn iter() -> impl Iterator<Item = IntType> {
        Signedness::iter().flat_map(|signedness| {
            Self::WIDTHS
                .into_iter()
                .map(move |bits| IntType { signedness, bits })
        })
    }
}

impl Display for IntType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.signedness {
            Signedness::Unsigned => write!(f, "u{}", self.bits),
            Signedness::Signed => write!(f, "i{}", self.bits),
        }
    }
}

/// An integer type restricted to a sub-interval of its machine range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoundedInt {
    ty: IntType,
    range: Interval,
}

impl BoundedInt {
    /// Creates a refined type. Fails if `range` escapes the machine range.
    pub fn new(ty: IntType, range: Interval) -> Result<Self, Error> {
        if !ty.full_range().contains(&range) {
            return Err(Error::RefinementOutOfRange {
                ty: ty.to_string(),
                range: range.to_string(),
            });
        }
        Ok(Self { ty, range })
    }

    /// The unrefined type.
    pub fn full(ty: IntType) -> Self {
        Self {
            ty,
            range: ty.full_range(),
        }
    }

    #[inline]
    pub fn ty(&self) -> IntType {
        self.ty
    }

    #[inline]
    pub fn range(&self) -> &Interval {
        &self.range
    }

    pub fn is_refined(&self) -> bool {
        self.range != self.ty.full_range()
    }
}

impl Display for BoundedInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_refined() {
            write!(f, "{}[{} ..= {}]", self.ty, self.range.lo(), self.range.hi())
        } else {
            write!(f, "{}", self.ty)
        }
    }
}

/// Any type a variable or expression may have.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    Bool,
    /// Untyped integer constant; takes the type of its context.
    Ideal,
    Int(BoundedInt),
    /// Fixed-length array.
    Array { elem: Box<Type>, len: u64 },
    /// Window into caller-owned memory. Its length is a runtime value.
    Slice { elem: Box<Type> },
    /// Input byte cursor.
    Reader,
    /// Output byte cursor.
    Writer,
}

impl Type {
    pub fn int(ty: IntType) -> Self {
        Type::Int(BoundedInt::full(ty))
    }

    pub fn u8() -> Self {
        Self::int(IntType::U8)
    }

    pub fn u16() -> Self {
        Self::int(IntType::U16)
    }

    pub fn u32() -> Self {
        Self::int(IntType::U32)
    }

    pub fn u64() -> Self {
        Self::int(IntType::U64)
    }

    pub fn i32() -> Self {
        Self::int(IntType::I32)
    }

    pub fn i64() -> Self {
        Self::int(IntType::I64)
    }

    /// `ty[lo ..= hi]`.
    pub fn refined(ty: IntType, lo: i64, hi: i64) -> Result<Self, Error> {
        let range = Interval::new(lo, hi).ok_or(Error::RefinementOutOfRange {
            ty: ty.to_string(),
            range: format!("[{lo}, {hi}]"),
        })?;
        Ok(Type::Int(BoundedInt::new(ty, range)?))
    }

    pub fn array(elem: Type, len: u64) -> Self {
        Type::Array {
            elem: Box::new(elem),
            len,
        }
    }

    pub fn slice(elem: Type) -> Self {
        Type::Slice {
            elem: Box::new(elem),
        }
    }

    /// Declared interval of an integer type.
    pub fn interval(&self) -> Option<&Interval> {
        match self {
            Type::Int(b) => Some(b.range()),
            _ => None,
        }
    }

    /// Machine type of an integer type.
    pub fn int_type(&self) -> Option<IntType> {
        match self {
            Type::Int(b) => Some(b.ty()),
            _ => None,
        }
    }

    /// Element type of an array or slice.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array { elem, .. } | Type::Slice { elem } => Some(elem),
            _ => None,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Type::Array { .. } | Type::Slice { .. })
    }

    /// Drops any refinement, keeping the machine type.
    pub fn base(&self) -> Type {
        match self {
            Type::Int(b) => Type::int(b.ty()),
            other => other.clone(),
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Ideal => write!(f, "ideal"),
            Type::Int(b) => write!(f, "{}", b),
            Type::Array { elem, len } => write!(f, "array[{}] {}", len, elem),
            Type::Slice { elem } => write!(f, "slice {}", elem),
            Type::Reader => write!(f, "reader"),
            Type::Writer => write!(f, "writer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_ranges() {
        assert_eq!(IntType::U8.full_range(), Interval::new(0, 255).unwrap());
        assert_eq!(IntType::I8.full_range(), Interval::new(-128, 127).unwrap());
        assert_eq!(IntType::U32.max_value(), BigInt::from(u32::MAX));
        assert_eq!(IntType::I64.min_value(), BigInt::from(i64::MIN));
    }

    #[test]
    fn wrapping_is_twos_complement() {
        assert_eq!(IntType::U8.wrap(&BigInt::from(256)), BigInt::from(0));
        assert_eq!(IntType::U8.wrap(&BigInt::from(-1)), BigInt::from(255));
        assert_eq!(IntType::I8.wrap(&BigInt::from(128)), BigInt::from(-128));
        assert_eq!(IntType::I8.wrap(&BigInt::from(-129)), BigInt::from(127));
    }

    #[test]
    fn refinement_must_fit_machine_range() {
        assert!(Type::refined(IntType::U8, 0, 255).is_ok());
        assert!(Type::refined(IntType::U8, 0, 256).is_err());
        assert!(Type::refined(IntType::U32, 5, 4).is_err());
    }

    #[test]
    fn parse_and_print_int_types() {
        assert_eq!(IntType::from_str("u32"), Some(IntType::U32));
        assert_eq!(IntType::from_str("i16"), Some(IntType::I16));
        assert_eq!(IntType::from_str("u7"), None);
        let refined = Type::refined(IntType::U32, 0, 4).unwrap();
        assert_eq!(refined.to_string(), "u32[0 ..= 4]");
    }
}
