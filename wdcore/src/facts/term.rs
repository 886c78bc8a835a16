//! Side-effect free terms used inside facts and propositions.
//!
//! A [`Term`] is an [`Expr`] stripped of types and locations. Casts vanish
//! (a cast is only ever evaluated after its range obligation is proven, so
//! it does not change the value) and wrapping operators keep their width.
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
};

use num_bigint::BigInt;
use wdinstr::{
    modules::{
        int::{BinaryOp, UnaryOp},
        operand::{Expr, ExprKind, Name},
    },
    types::IntType,
};

/// Subject of a fact: a variable or the length of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Atom {
    Var(Name),
    Length(Name),
}

impl Atom {
    pub fn var(name: impl Into<Name>) -> Self {
        Atom::Var(name.into())
    }

    pub fn name(&self) -> &Name {
        match self {
            Atom::Var(n) | Atom::Length(n) => n,
        }
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Atom::Var(n) => write!(f, "{}", n),
            Atom::Length(n) => write!(f, "length({})", n),
        }
    }
}

/// Compile-time value of a constant term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstValue {
    Int(BigInt),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    Const(BigInt),
    Bool(bool),
    Atom(Atom),
    Unary(UnaryOp, Box<Term>),
    Binary(BinaryOp, Box<Term>, Box<Term>),
    /// Wrapping arithmetic, reduced modulo the width of the type.
    Wrapping(IntType, BinaryOp, Box<Term>, Box<Term>),
    /// Element read.
    Index(Name, Box<Term>),
}

impl From<Atom> for Term {
    fn from(atom: Atom) -> Self {
        Term::Atom(atom)
    }
}

impl Term {
    pub fn var(name: impl Into<Name>) -> Self {
        Term::Atom(Atom::var(name))
    }

    pub fn int(v: impl Into<BigInt>) -> Self {
        Term::Const(v.into())
    }

    pub fn binary(op: BinaryOp, lhs: Term, rhs: Term) -> Self {
        Term::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn not(t: Term) -> Self {
        Term::Unary(UnaryOp::Not, Box::new(t))
    }

    /// Converts an expression. Slices have no term form.
    pub fn from_expr(e: &Expr) -> Option<Term> {
        Some(match &e.kind {
            ExprKind::Const(v) => Term::Const(v.clone()),
            ExprKind::Bool(v) => Term::Bool(*v),
            ExprKind::Var(n) => Term::var(n.clone()),
            ExprKind::Length(n) => Term::Atom(Atom::Length(n.clone())),
            ExprKind::Unary { op, operand } => {
                Term::Unary(*op, Box::new(Term::from_expr(operand)?))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (l, r) = (Term::from_expr(lhs)?, Term::from_expr(rhs)?);
                match (op.is_wrapping(), e.ty.int_type()) {
                    (true, Some(ty)) => Term::Wrapping(ty, *op, Box::new(l), Box::new(r)),
                    (true, None) => Term::binary(op.unwrapped(), l, r),
                    (false, _) => Term::binary(*op, l, r),
                }
            }
            ExprKind::Index { base, index } => {
                Term::Index(base.clone(), Box::new(Term::from_expr(index)?))
            }
            ExprKind::Slice { .. } => return None,
            ExprKind::Cast { operand, .. } => Term::from_expr(operand)?,
        })
    }

    pub fn children(&self) -> Vec<&Term> {
        match self {
            Term::Const(_) | Term::Bool(_) | Term::Atom(_) => vec![],
            Term::Unary(_, t) | Term::Index(_, t) => vec![t],
            Term::Binary(_, l, r) | Term::Wrapping(_, _, l, r) => vec![l, r],
        }
    }

    pub fn atoms(&self) -> BTreeSet<Atom> {
        let mut out = BTreeSet::new();
        self.collect_atoms(&mut out);
        out
    }

    fn collect_atoms(&self, out: &mut BTreeSet<Atom>) {
        if let Term::Atom(a) = self {
            out.insert(a.clone());
        }
        for c in self.children() {
            c.collect_atoms(out);
        }
    }

    /// Returns `true` if the term refers to `name` in any way.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Term::Atom(a) => a.name() == name,
            Term::Index(base, _) if base == name => true,
            _ => self.children().into_iter().any(|c| c.mentions(name)),
        }
    }

    /// Stable terms can be recorded in equality facts: they never read
    /// array elements.
    pub fn is_stable(&self) -> bool {
        !matches!(self, Term::Index(..)) && self.children().into_iter().all(Term::is_stable)
    }

    pub fn reads_elements_of(&self, name: &str) -> bool {
        match self {
            Term::Index(base, _) if base == name => true,
            _ => self
                .children()
                .into_iter()
                .any(|c| c.reads_elements_of(name)),
        }
    }

    /// Replaces every occurrence of `atom` by `value`.
    pub fn substitute(&self, atom: &Atom, value: &Term) -> Term {
        match self {
            Term::Atom(a) if a == atom => value.clone(),
            Term::Const(_) | Term::Bool(_) | Term::Atom(_) => self.clone(),
            Term::Unary(op, t) => Term::Unary(*op, Box::new(t.substitute(atom, value))),
            Term::Binary(op, l, r) => Term::Binary(
                *op,
                Box::new(l.substitute(atom, value)),
                Box::new(r.substitute(atom, value)),
            ),
            Term::Wrapping(ty, op, l, r) => Term::Wrapping(
                *ty,
                *op,
                Box::new(l.substitute(atom, value)),
                Box::new(r.substitute(atom, value)),
            ),
            Term::Index(base, i) => Term::Index(base.clone(), Box::new(i.substitute(atom, value))),
        }
    }

    /// Renames the variable `from`, including its length and element reads.
    pub fn rename(&self, from: &str, to: &str) -> Term {
        let rename = |n: &Name| if n == from { to.to_string() } else { n.clone() };
        match self {
            Term::Atom(Atom::Var(n)) => Term::Atom(Atom::Var(rename(n))),
            Term::Atom(Atom::Length(n)) => Term::Atom(Atom::Length(rename(n))),
            Term::Const(_) | Term::Bool(_) => self.clone(),
            Term::Unary(op, t) => Term::Unary(*op, Box::new(t.rename(from, to))),
            Term::Binary(op, l, r) => Term::Binary(
                *op,
                Box::new(l.rename(from, to)),
                Box::new(r.rename(from, to)),
            ),
            Term::Wrapping(ty, op, l, r) => Term::Wrapping(
                *ty,
                *op,
                Box::new(l.rename(from, to)),
                Box::new(r.rename(from, to)),
            ),
            Term::Index(base, i) => Term::Index(rename(base), Box::new(i.rename(from, to))),
        }
    }

    /// Folds the term if it only involves constants.
    pub fn const_eval(&self) -> Option<ConstValue> {
        use ConstValue::{Bool, Int};
        Some(match self {
            Term::Const(v) => Int(v.clone()),
            Term::Bool(b) => Bool(*b),
            Term::Atom(_) | Term::Index(..) => return None,
            Term::Unary(UnaryOp::Neg, t) => match t.const_eval()? {
                Int(v) => Int(-v),
                Bool(_) => return None,
            },
            Term::Unary(UnaryOp::Not, t) => match t.const_eval()? {
                Bool(b) => Bool(!b),
                Int(_) => return None,
            },
            Term::Binary(BinaryOp::And, l, r) => match (l.const_eval(), r.const_eval()) {
                (Some(Bool(false)), _) | (_, Some(Bool(false))) => Bool(false),
                (Some(Bool(true)), Some(Bool(true))) => Bool(true),
                _ => return None,
            },
            Term::Binary(BinaryOp::Or, l, r) => match (l.const_eval(), r.const_eval()) {
                (Some(Bool(true)), _) | (_, Some(Bool(true))) => Bool(true),
                (Some(Bool(false)), Some(Bool(false))) => Bool(false),
                _ => return None,
            },
            Term::Binary(op, l, r) => match (l.const_eval()?, r.const_eval()?) {
                (Int(a), Int(b)) => return eval_int_op(*op, &a, &b),
                (Bool(a), Bool(b)) => match op {
                    BinaryOp::Eq => Bool(a == b),
                    BinaryOp::Ne => Bool(a != b),
                    _ => return None,
                },
                _ => return None,
            },
            Term::Wrapping(ty, op, l, r) => match (l.const_eval()?, r.const_eval()?) {
                (Int(a), Int(b)) => match eval_int_op(op.unwrapped(), &a, &b)? {
                    Int(v) => Int(ty.wrap(&v)),
                    other => other,
                },
                _ => return None,
            },
        })
    }

    /// Boolean negation, pushed through `not`, `and`, `or` and comparisons.
    pub fn negate(&self) -> Term {
        match self {
            Term::Bool(b) => Term::Bool(!b),
            Term::Unary(UnaryOp::Not, t) => (**t).clone(),
            Term::Binary(BinaryOp::And, l, r) => Term::binary(BinaryOp::Or, l.negate(), r.negate()),
            Term::Binary(BinaryOp::Or, l, r) => Term::binary(BinaryOp::And, l.negate(), r.negate()),
            Term::Binary(op, l, r) => match op.negated() {
                Some(neg) => Term::Binary(neg, l.clone(), r.clone()),
                None => Term::not(self.clone()),
            },
            _ => Term::not(self.clone()),
        }
    }

    /// Linear form `Σ cᵢ·atomᵢ + k`, if the term is affine in its atoms.
    pub fn linear(&self) -> Option<Linear> {
        match self {
            Term::Const(v) => Some(Linear::constant(v.clone())),
            Term::Atom(a) => Some(Linear::atom(a.clone())),
            Term::Unary(UnaryOp::Neg, t) => Some(t.linear()?.scale(&BigInt::from(-1))),
            Term::Binary(BinaryOp::Add, l, r) => Some(l.linear()?.add(&r.linear()?)),
            Term::Binary(BinaryOp::Sub, l, r) => {
                Some(l.linear()?.add(&r.linear()?.scale(&BigInt::from(-1))))
            }
            Term::Binary(BinaryOp::Mul, l, r) => {
                let (l, r) = (l.linear()?, r.linear()?);
                if l.is_constant() {
                    Some(r.scale(&l.constant))
                } else if r.is_constant() {
                    Some(l.scale(&r.constant))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn fmt_prec(&self, f: &mut std::fmt::Formatter<'_>, parent: u8) -> std::fmt::Result {
        match self {
            Term::Const(v) => write!(f, "{}", v),
            Term::Bool(b) => write!(f, "{}", b),
            Term::Atom(a) => write!(f, "{}", a),
            Term::Unary(UnaryOp::Neg, t) => {
                write!(f, "-")?;
                t.fmt_prec(f, 6)
            }
            Term::Unary(UnaryOp::Not, t) => {
                write!(f, "not ")?;
                t.fmt_prec(f, 6)
            }
            Term::Binary(op, l, r) | Term::Wrapping(_, op, l, r) => {
                let prec = op.precedence();
                if prec < parent {
                    write!(f, "(")?;
                }
                l.fmt_prec(f, prec)?;
                write!(f, " {} ", op.to_str())?;
                r.fmt_prec(f, prec + 1)?;
                if prec < parent {
                    write!(f, ")")?;
                }
                Ok(())
            }
            Term::Index(base, i) => write!(f, "{}[{}]", base, i),
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_prec(f, 0)
    }
}

/// Folds an integer operator. Comparisons produce booleans; division by
/// zero and out-of-range shifts do not fold.
pub fn eval_int_op(op: BinaryOp, a: &BigInt, b: &BigInt) -> Option<ConstValue> {
    use ConstValue::{Bool, Int};
    let zero = BigInt::ZERO;
    Some(match op {
        BinaryOp::Add | BinaryOp::WrapAdd => Int(a + b),
        BinaryOp::Sub | BinaryOp::WrapSub => Int(a - b),
        BinaryOp::Mul | BinaryOp::WrapMul => Int(a * b),
        BinaryOp::Div if *b != zero => Int(a / b),
        BinaryOp::Rem if *b != zero => Int(a % b),
        BinaryOp::Div | BinaryOp::Rem => return None,
        BinaryOp::Shl | BinaryOp::Shr => {
            let s = usize::try_from(b).ok().filter(|s| *s <= 1024)?;
            if op == BinaryOp::Shl {
                Int(a << s)
            } else {
                Int(a >> s)
            }
        }
        BinaryOp::BitAnd => Int(a & b),
        BinaryOp::BitOr => Int(a | b),
        BinaryOp::BitXor => Int(a ^ b),
        BinaryOp::BitAndNot => Int(a & !b),
        BinaryOp::Eq => Bool(a == b),
        BinaryOp::Ne => Bool(a != b),
        BinaryOp::Lt => Bool(a < b),
        BinaryOp::Le => Bool(a <= b),
        BinaryOp::Gt => Bool(a > b),
        BinaryOp::Ge => Bool(a >= b),
        BinaryOp::And | BinaryOp::Or => return None,
    })
}

/// Affine combination of atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linear {
    pub coeffs: BTreeMap<Atom, BigInt>,
    pub constant: BigInt,
}

impl Linear {
    pub fn constant(v: BigInt) -> Self {
        Self {
            coeffs: BTreeMap::new(),
            constant: v,
        }
    }

    pub fn atom(a: Atom) -> Self {
        Self {
            coeffs: BTreeMap::from([(a, BigInt::from(1))]),
            constant: BigInt::ZERO,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn add(&self, other: &Linear) -> Linear {
        let mut out = self.clone();
        for (a, c) in &other.coeffs {
            let entry = out.coeffs.entry(a.clone()).or_insert(BigInt::ZERO);
            *entry += c;
        }
        out.coeffs.retain(|_, c| *c != BigInt::ZERO);
        out.constant += &other.constant;
        out
    }

    pub fn sub(&self, other: &Linear) -> Linear {
        self.add(&other.scale(&BigInt::from(-1)))
    }

    pub fn scale(&self, k: &BigInt) -> Linear {
        if *k == BigInt::ZERO {
            return Linear::constant(BigInt::ZERO);
        }
        Linear {
            coeffs: self.coeffs.iter().map(|(a, c)| (a.clone(), c * k)).collect(),
            constant: &self.constant * k,
        }
    }

    /// `Some(atom)` if the form is `atom + k`.
    pub fn as_offset_atom(&self) -> Option<&Atom> {
        let mut it = self.coeffs.iter();
        match (it.next(), it.next()) {
            (Some((a, c)), None) if *c == BigInt::from(1) => Some(a),
            _ => None,
        }
    }

    /// `Some((x, y))` if the form is `x - y + k`.
    pub fn as_difference(&self) -> Option<(&Atom, &Atom)> {
        if self.coeffs.len() != 2 {
            return None;
        }
        let one = BigInt::from(1);
        let minus_one = BigInt::from(-1);
        let pos = self.coeffs.iter().find(|(_, c)| **c == one)?;
        let neg = self.coeffs.iter().find(|(_, c)| **c == minus_one)?;
        Some((pos.0, neg.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wdinstr::modules::operand::{len, lit, var};

    #[test]
    fn linear_forms() {
        let t = Term::from_expr(&(var("x") + lit(1) - var("y") * 2)).unwrap();
        let lin = t.linear().unwrap();
        assert_eq!(lin.constant, BigInt::from(1));
        assert_eq!(lin.coeffs[&Atom::var("x")], BigInt::from(1));
        assert_eq!(lin.coeffs[&Atom::var("y")], BigInt::from(-2));
        assert!(lin.as_difference().is_none());

        let t = Term::from_expr(&(var("i") - len("buf") + 3)).unwrap();
        let lin = t.linear().unwrap();
        assert_eq!(
            lin.as_difference(),
            Some((&Atom::var("i"), &Atom::Length("buf".into())))
        );
    }

    #[test]
    fn folding_and_negation() {
        let t = Term::from_expr(&(lit(7) / lit(2)).lt(lit(4))).unwrap();
        assert_eq!(t.const_eval(), Some(ConstValue::Bool(true)));
        assert_eq!(Term::from_expr(&(lit(1) / lit(0))).unwrap().const_eval(), None);

        let t = Term::from_expr(&var("a").lt(var("b")).and(var("c"))).unwrap();
        assert_eq!(t.negate().to_string(), "a >= b or not c");
    }
}
