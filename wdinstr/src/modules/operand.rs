//! Expressions
//!
//! An [`Expr`] is an immutable tree of operators over constants, variables,
//! array lengths and element reads. Each node carries its inferred [`Type`]
//! and the [`SourceLoc`] of the statement it belongs to. Both are filled in
//! by [`crate::modules::Function::annotate`]; expressions built with the free
//! constructors below start out as [`Type::Ideal`] at an unknown location.
use std::{collections::BTreeSet, fmt::Display};

use num_bigint::BigInt;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::EnumIs;

use crate::{
    modules::int::{BinaryOp, UnaryOp},
    types::{BoundedInt, Type},
};

/// Identifier of a parameter or local variable.
pub type Name = String;

/// Position of a statement in the source text.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceLoc {
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub const UNKNOWN: SourceLoc = SourceLoc { line: 0, column: 0 };

    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn is_unknown(&self) -> bool {
        self.line == 0
    }
}

impl Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExprKind {
    Const(BigInt),
    Bool(bool),
    Var(Name),
    /// Number of elements of an array or slice.
    Length(Name),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Element read `base[index]`.
    Index {
        base: Name,
        index: Box<Expr>,
    },
    /// Sub-slice `base[lo .. hi]`; missing bounds default to `0` and
    /// `length(base)`.
    Slice {
        base: Name,
        lo: Option<Box<Expr>>,
        hi: Option<Box<Expr>>,
    },
    /// Explicit conversion `operand as to`.
    Cast {
        operand: Box<Expr>,
        to: BoundedInt,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub loc: SourceLoc,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            ty: Type::Ideal,
            loc: SourceLoc::UNKNOWN,
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn binary(op: BinaryOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        Self::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs.into()),
            rhs: Box::new(rhs.into()),
        })
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Le, self, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Gt, self, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Ge, self, rhs)
    }

    pub fn equals(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn not_equals(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Ne, self, rhs)
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::And, self, rhs)
    }

    pub fn or(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::Or, self, rhs)
    }

    pub fn and_not(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::BitAndNot, self, rhs)
    }

    pub fn wrapping_add(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::WrapAdd, self, rhs)
    }

    pub fn wrapping_sub(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::WrapSub, self, rhs)
    }

    pub fn wrapping_mul(self, rhs: impl Into<Expr>) -> Self {
        Self::binary(BinaryOp::WrapMul, self, rhs)
    }

    pub fn cast(self, to: BoundedInt) -> Self {
        Self::new(ExprKind::Cast {
            operand: Box::new(self),
            to,
        })
    }

    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> SmallVec<&Expr, 2> {
        let mut out = SmallVec::new();
        match &self.kind {
            ExprKind::Const(_) | ExprKind::Bool(_) | ExprKind::Var(_) | ExprKind::Length(_) => {}
            ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => out.push(&**operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                out.push(&**lhs);
                out.push(&**rhs);
            }
            ExprKind::Index { index, .. } => out.push(&**index),
            ExprKind::Slice { lo, hi, .. } => {
                out.extend(lo.iter().map(|e| &**e));
                out.extend(hi.iter().map(|e| &**e));
            }
        }
        out
    }

    pub fn children_mut(&mut self) -> SmallVec<&mut Expr, 2> {
        let mut out = SmallVec::new();
        match &mut self.kind {
            ExprKind::Const(_) | ExprKind::Bool(_) | ExprKind::Var(_) | ExprKind::Length(_) => {}
            ExprKind::Unary { operand, .. } | ExprKind::Cast { operand, .. } => {
                out.push(&mut **operand)
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                out.push(&mut **lhs);
                out.push(&mut **rhs);
            }
            ExprKind::Index { index, .. } => out.push(&mut **index),
            ExprKind::Slice { lo, hi, .. } => {
                out.extend(lo.iter_mut().map(|e| &mut **e));
                out.extend(hi.iter_mut().map(|e| &mut **e));
            }
        }
        out
    }

    /// Nesting depth of the tree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(Expr::depth)
            .max()
            .unwrap_or(0)
    }

    /// Every variable, array or slice name referenced by this expression.
    pub fn names(&self) -> BTreeSet<Name> {
        let mut out = BTreeSet::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut BTreeSet<Name>) {
        match &self.kind {
            ExprKind::Var(name) | ExprKind::Length(name) => {
                out.insert(name.clone());
            }
            ExprKind::Index { base, .. } | ExprKind::Slice { base, .. } => {
                out.insert(base.clone());
            }
            _ => {}
        }
        for child in self.children() {
            child.collect_names(out);
        }
    }

    pub fn mentions(&self, name: &str) -> bool {
        match &self.kind {
            ExprKind::Var(n) | ExprKind::Length(n) => n == name,
            ExprKind::Index { base, .. } | ExprKind::Slice { base, .. } if base == name => true,
            _ => self.children().into_iter().any(|c| c.mentions(name)),
        }
    }

    /// Returns `true` if evaluating the expression reads array elements.
    pub fn reads_elements(&self) -> bool {
        matches!(self.kind, ExprKind::Index { .. })
            || self.children().into_iter().any(Expr::reads_elements)
    }

    pub fn as_const(&self) -> Option<&BigInt> {
        match &self.kind {
            ExprKind::Const(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Replaces every occurrence of the variable `name` by `value`.
    pub fn substitute(&self, name: &str, value: &Expr) -> Expr {
        if let ExprKind::Var(n) = &self.kind {
            if n == name {
                return value.clone();
            }
        }
        let mut out = self.clone();
        for child in out.children_mut() {
            *child = child.substitute(name, value);
        }
        out
    }

    /// Sets the location of every node still at [`SourceLoc::UNKNOWN`].
    pub fn stamp(&mut self, loc: SourceLoc) {
        if self.loc.is_unknown() {
            self.loc = loc;
        }
        for child in self.children_mut() {
            child.stamp(loc);
        }
    }
}

/// Integer constant.
pub fn lit(v: impl Into<BigInt>) -> Expr {
    Expr::new(ExprKind::Const(v.into()))
}

pub fn boolean(v: bool) -> Expr {
    Expr::new(ExprKind::Bool(v))
}

/// Variable reference.
pub fn var(name: impl Into<Name>) -> Expr {
    Expr::new(ExprKind::Var(name.into()))
}

/// `length(name)`.
pub fn len(name: impl Into<Name>) -> Expr {
    Expr::new(ExprKind::Length(name.into()))
}

/// `base[index]`.
pub fn index(base: impl Into<Name>, index: impl Into<Expr>) -> Expr {
    Expr::new(ExprKind::Index {
        base: base.into(),
        index: Box::new(index.into()),
    })
}

/// `base[lo .. hi]`.
pub fn slice(base: impl Into<Name>, lo: Option<Expr>, hi: Option<Expr>) -> Expr {
    Expr::new(ExprKind::Slice {
        base: base.into(),
        lo: lo.map(Box::new),
        hi: hi.map(Box::new),
    })
}

pub fn not(e: impl Into<Expr>) -> Expr {
    Expr::unary(UnaryOp::Not, e.into())
}

macro_rules! define_expr_from_int {
    ($($typ:ty),*) => {
        $(
            impl From<$typ> for Expr {
                fn from(v: $typ) -> Self {
                    lit(v)
                }
            }
        )*
    };
}

define_expr_from_int!(i32, i64, u8, u32, u64);

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        boolean(v)
    }
}

impl From<BigInt> for Expr {
    fn from(v: BigInt) -> Self {
        lit(v)
    }
}

macro_rules! define_expr_binary_op {
    ($trait:ident, $method:ident, $op:ident) => {
        impl<R: Into<Expr>> std::ops::$trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                Expr::binary(BinaryOp::$op, self, rhs)
            }
        }
    };
}

define_expr_binary_op!(Add, add, Add);
define_expr_binary_op!(Sub, sub, Sub);
define_expr_binary_op!(Mul, mul, Mul);
define_expr_binary_op!(Div, div, Div);
define_expr_binary_op!(Rem, rem, Rem);
define_expr_binary_op!(Shl, shl, Shl);
define_expr_binary_op!(Shr, shr, Shr);
define_expr_binary_op!(BitAnd, bitand, BitAnd);
define_expr_binary_op!(BitOr, bitor, BitOr);
define_expr_binary_op!(BitXor, bitxor, BitXor);

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::unary(UnaryOp::Not, self)
    }
}

impl Expr {
    fn fmt_prec(&self, f: &mut std::fmt::Formatter<'_>, parent: u8) -> std::fmt::Result {
        match &self.kind {
            ExprKind::Const(v) => write!(f, "{}", v),
            ExprKind::Bool(v) => write!(f, "{}", v),
            ExprKind::Var(name) => write!(f, "{}", name),
            ExprKind::Length(name) => write!(f, "length({})", name),
            ExprKind::Unary { op, operand } => {
                match op {
                    UnaryOp::Neg => write!(f, "-")?,
                    UnaryOp::Not => write!(f, "not ")?,
                }
                operand.fmt_prec(f, 6)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                if prec < parent {
                    write!(f, "(")?;
                }
                lhs.fmt_prec(f, prec)?;
                write!(f, " {} ", op.to_str())?;
                rhs.fmt_prec(f, prec + 1)?;
                if prec < parent {
                    write!(f, ")")?;
                }
                Ok(())
            }
            ExprKind::Index { base, index } => write!(f, "{}[{}]", base, index),
            ExprKind::Slice { base, lo, hi } => {
                write!(f, "{}[", base)?;
                if let Some(lo) = lo {
                    write!(f, "{}", lo)?;
                }
                write!(f, " .. ")?;
                if let Some(hi) = hi {
                    write!(f, "{}", hi)?;
                }
                write!(f, "]")
            }
            ExprKind::Cast { operand, to } => {
                if parent > 5 {
                    write!(f, "(")?;
                }
                operand.fmt_prec(f, 6)?;
                write!(f, " as {}", to)?;
                if parent > 5 {
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_prec(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printing_respects_precedence() {
        let e = (var("a") + 1) * var("b");
        assert_eq!(e.to_string(), "(a + 1) * b");
        let e = var("a") + var("b") * 2;
        assert_eq!(e.to_string(), "a + b * 2");
        let e = var("x").lt(10).and(var("y").ge(len("buf")));
        assert_eq!(e.to_string(), "x < 10 and y >= length(buf)");
        let e = var("a") - (var("b") - var("c"));
        assert_eq!(e.to_string(), "a - (b - c)");
    }

    #[test]
    fn substitution_and_mentions() {
        let e = var("x") + index("a", var("i"));
        assert!(e.mentions("a"));
        assert!(e.reads_elements());
        let s = e.substitute("x", &(var("y") * 2));
        assert_eq!(s.to_string(), "y * 2 + a[i]");
        assert!(!s.mentions("x"));
        assert_eq!(s.depth(), 3);
    }
}
