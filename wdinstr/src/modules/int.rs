//! Operators
//!
//! Unary and binary operators over integers and booleans. Each operator has
//! a stable textual form used by the pretty-printer and [`BinaryOp::from_str`].
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, EnumIter)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Boolean negation.
    Not,
}

impl UnaryOp {
    pub fn from_str(s: &str) -> Option<Self> {
        UnaryOp::iter().find(|op| op.to_str() == s)
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
        }
    }
}

/// Binary operators.
///
/// Checked arithmetic (`+`, `-`, `*`, `/`, `%`, `<<`) must be proven not to
/// leave the operand type. Wrapping arithmetic (`~+`, `~-`, `~*`) reduces its
/// result modulo the type width and never raises an overflow obligation.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, EnumIter)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    BitAndNot,
    WrapAdd,
    WrapSub,
    WrapMul,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn from_str(s: &str) -> Option<Self> {
        BinaryOp::iter().find(|op| op.to_str() == s)
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAndNot => "&^",
            BinaryOp::WrapAdd => "~+",
            BinaryOp::WrapSub => "~-",
            BinaryOp::WrapMul => "~*",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    /// Operators producing a boolean from two integers (or two booleans for
    /// `==` and `!=`).
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_wrapping(&self) -> bool {
        matches!(self, BinaryOp::WrapAdd | BinaryOp::WrapSub | BinaryOp::WrapMul)
    }

    pub fn is_shift(&self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr)
    }

    pub fn is_bitwise(&self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::BitAndNot
        )
    }

    /// Operators whose result must be proven to fit the operand type.
    pub fn is_checked_arith(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Rem
                | BinaryOp::Shl
        )
    }

    /// Operators producing an integer.
    pub fn is_arith(&self) -> bool {
        !self.is_comparison() && !self.is_logical()
    }

    /// The checked counterpart of a wrapping operator.
    pub fn unwrapped(&self) -> BinaryOp {
        match self {
            BinaryOp::WrapAdd => BinaryOp::Add,
            BinaryOp::WrapSub => BinaryOp::Sub,
            BinaryOp::WrapMul => BinaryOp::Mul,
            other => *other,
        }
    }

    /// Comparison that holds exactly when `self` does not.
    pub fn negated(&self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Eq => BinaryOp::Ne,
            BinaryOp::Ne => BinaryOp::Eq,
            BinaryOp::Lt => BinaryOp::Ge,
            BinaryOp::Le => BinaryOp::Gt,
            BinaryOp::Gt => BinaryOp::Le,
            BinaryOp::Ge => BinaryOp::Lt,
            _ => return None,
        })
    }

    /// Comparison with its operands swapped (`a < b` is `b > a`).
    pub fn swapped(&self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Eq => BinaryOp::Eq,
            BinaryOp::Ne => BinaryOp::Ne,
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            _ => return None,
        })
    }

    /// Binding strength used when printing.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::WrapAdd
            | BinaryOp::WrapSub
            | BinaryOp::BitOr
            | BinaryOp::BitXor => 4,
            _ => 5,
        }
    }
}

/// Operator of an assignment statement (`=`, `+=`, `~+=`, ...).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AssignOp {
    Set,
    Update(BinaryOp),
}

impl AssignOp {
    pub fn to_str(&self) -> String {
        match self {
            AssignOp::Set => "=".to_string(),
            AssignOp::Update(op) => format!("{}=", op.to_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_spelling_round_trips() {
        for op in BinaryOp::iter() {
            assert_eq!(BinaryOp::from_str(op.to_str()), Some(op));
        }
        assert_eq!(UnaryOp::from_str("not"), Some(UnaryOp::Not));
    }

    #[test]
    fn negation_of_comparisons() {
        assert_eq!(BinaryOp::Lt.negated(), Some(BinaryOp::Ge));
        assert_eq!(BinaryOp::Add.negated(), None);
        assert_eq!(BinaryOp::Le.swapped(), Some(BinaryOp::Ge));
    }
}
