//! Facts, propositions and the deduction engine.
//!
//! A [`Fact`] is something known to hold at a program point; a [`Prop`] is
//! something that must be shown to hold. Both range over [`Term`]s, the
//! side-effect free image of expressions.
//!
//! * [`set::FactSet`] stores the facts of a program point and implements
//!   `assume`, `merge`, loop widening and projection.
//! * [`bounds`] computes the interval of a term under a fact set.
//! * [`rules`] decides propositions with a fixed, budgeted rule list.
use std::fmt::Display;

use num_bigint::BigInt;
use wdinstr::{
    modules::{int::BinaryOp, operand::Name, scope::Scope},
    types::{Type, interval::Interval},
};

use crate::utils::conf::AnalysisConfig;

pub mod bounds;
pub mod rules;
pub mod set;
pub mod term;

pub use term::{Atom, ConstValue, Linear, Term};

/// Relation between two atoms, up to a constant offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelOp {
    /// `lhs <= rhs + offset`. Strict comparisons are stored with the
    /// offset lowered by one.
    Le,
    /// `lhs != rhs + offset`.
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fact {
    /// The atom lies in `range`.
    Range { atom: Atom, range: Interval },
    /// The atom equals a stable term that does not mention it.
    Equal { atom: Atom, value: Term },
    Relation {
        lhs: Atom,
        op: RelOp,
        rhs: Atom,
        offset: BigInt,
    },
    /// A boolean variable is known to be `value`.
    Flag { var: Name, value: bool },
}

impl Fact {
    /// Returns `true` if the fact depends on the value of `name`.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Fact::Range { atom, .. } => atom.name() == name,
            Fact::Equal { atom, value } => atom.name() == name || value.mentions(name),
            Fact::Relation { lhs, rhs, .. } => lhs.name() == name || rhs.name() == name,
            Fact::Flag { var, .. } => var == name,
        }
    }

    /// Every name the fact refers to.
    pub fn names(&self) -> Vec<&Name> {
        match self {
            Fact::Range { atom, .. } => vec![atom.name()],
            Fact::Equal { atom, value } => {
                let mut out = vec![atom.name()];
                collect_names(value, &mut out);
                out
            }
            Fact::Relation { lhs, rhs, .. } => vec![lhs.name(), rhs.name()],
            Fact::Flag { var, .. } => vec![var],
        }
    }

    /// The fact restated as a proposition.
    pub fn to_prop(&self) -> Prop {
        match self {
            Fact::Range { atom, range } => Prop::InRange {
                term: Term::Atom(atom.clone()),
                range: range.clone(),
            },
            Fact::Equal { atom, value } => Prop::Holds(Term::binary(
                BinaryOp::Eq,
                Term::Atom(atom.clone()),
                value.clone(),
            )),
            Fact::Relation {
                lhs,
                op,
                rhs,
                offset,
            } => {
                let cmp = match op {
                    RelOp::Le => BinaryOp::Le,
                    RelOp::Ne => BinaryOp::Ne,
                };
                Prop::Holds(Term::binary(
                    cmp,
                    Term::Atom(lhs.clone()),
                    offset_term(rhs, offset),
                ))
            }
            Fact::Flag { var, value: true } => Prop::Holds(Term::var(var.clone())),
            Fact::Flag { var, value: false } => Prop::Holds(Term::not(Term::var(var.clone()))),
        }
    }
}

fn collect_names<'a>(t: &'a Term, out: &mut Vec<&'a Name>) {
    match t {
        Term::Atom(a) => out.push(a.name()),
        Term::Index(base, _) => out.push(base),
        _ => {}
    }
    for c in t.children() {
        collect_names(c, out);
    }
}

/// `atom + offset`, without the addition when the offset is zero.
pub fn offset_term(atom: &Atom, offset: &BigInt) -> Term {
    let base = Term::Atom(atom.clone());
    if *offset == BigInt::ZERO {
        base
    } else if *offset < BigInt::ZERO {
        Term::binary(BinaryOp::Sub, base, Term::Const(-offset))
    } else {
        Term::binary(BinaryOp::Add, base, Term::Const(offset.clone()))
    }
}

impl Display for Fact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fact::Range { atom, range } => write!(f, "{} in {}", atom, range),
            Fact::Equal { atom, value } => write!(f, "{} == {}", atom, value),
            Fact::Relation {
                lhs,
                op,
                rhs,
                offset,
            } => {
                let op = match op {
                    RelOp::Le => "<=",
                    RelOp::Ne => "!=",
                };
                write!(f, "{} {} {}", lhs, op, offset_term(rhs, offset))
            }
            Fact::Flag { var, value: true } => write!(f, "{}", var),
            Fact::Flag { var, value: false } => write!(f, "not {}", var),
        }
    }
}

/// A proof obligation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Prop {
    /// The value of `term` lies in `range`.
    InRange { term: Term, range: Interval },
    /// The boolean `term` is true.
    Holds(Term),
}

impl Display for Prop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Prop::InRange { term, range } => write!(f, "{} in {}", term, range),
            Prop::Holds(term) => write!(f, "{}", term),
        }
    }
}

/// What the deduction engine needs to know beyond the facts themselves.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub scope: &'a Scope,
    pub config: &'a AnalysisConfig,
}

impl<'a> Context<'a> {
    pub fn new(scope: &'a Scope, config: &'a AnalysisConfig) -> Self {
        Self { scope, config }
    }

    /// Range every value of `atom` lies in, as given by declared types.
    pub fn type_range(&self, atom: &Atom) -> Option<Interval> {
        match atom {
            Atom::Var(name) => self.scope.type_of(name)?.interval().cloned(),
            Atom::Length(name) => match self.scope.type_of(name)? {
                Type::Array { len, .. } => Some(Interval::point(*len)),
                Type::Slice { .. } => Interval::new(0, u64::MAX),
                _ => None,
            },
        }
    }

    pub fn is_bool_var(&self, name: &str) -> bool {
        matches!(self.scope.type_of(name), Some(Type::Bool))
    }

    /// Returns `true` if `t` denotes a boolean.
    pub fn is_bool(&self, t: &Term) -> bool {
        match t {
            Term::Bool(_) => true,
            Term::Atom(Atom::Var(name)) => self.is_bool_var(name),
            Term::Unary(wdinstr::modules::int::UnaryOp::Not, _) => true,
            Term::Binary(op, ..) => op.is_comparison() || op.is_logical(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facts_render_and_restate() {
        let rel = Fact::Relation {
            lhs: Atom::var("i"),
            op: RelOp::Le,
            rhs: Atom::Length("buf".into()),
            offset: BigInt::from(-1),
        };
        assert_eq!(rel.to_string(), "i <= length(buf) - 1");
        assert_eq!(rel.to_prop().to_string(), "i <= length(buf) - 1");
        assert!(rel.mentions("buf"));
        assert!(!rel.mentions("n"));

        let flag = Fact::Flag {
            var: "c".into(),
            value: false,
        };
        assert_eq!(flag.to_prop().to_string(), "not c");
    }
}
