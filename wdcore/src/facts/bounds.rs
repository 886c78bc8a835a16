//! Interval bounds of terms under a fact set.
//!
//! The bound of an atom starts from its declared type, is intersected with
//! any `Range` fact, then tightened through relations and equalities up to
//! a fixed depth. Differences `x - y` additionally follow chains of
//! relational facts, which is how `i < n; n <= len` yields `i < len`.
use std::collections::BTreeMap;

use num_bigint::BigInt;
use wdinstr::{modules::int::BinaryOp, types::interval::Interval};

use crate::facts::{
    Context, Fact, RelOp,
    set::FactSet,
    term::{Atom, Linear, Term},
};

/// Bounds of `term`, or `None` if the term is not an integer or is
/// unbounded.
pub fn bounds_of(term: &Term, facts: &FactSet, ctx: &Context<'_>) -> Option<Interval> {
    bounds_at(term, facts, ctx, ctx.config.substitution_depth)
}

/// Bounds of a single atom.
pub fn atom_bounds(atom: &Atom, facts: &FactSet, ctx: &Context<'_>) -> Option<Interval> {
    atom_bounds_at(atom, facts, ctx, ctx.config.substitution_depth)
}

fn tighten(current: &mut Interval, lo: Option<BigInt>, hi: Option<BigInt>) {
    let lo = lo.map_or(current.lo().clone(), |lo| lo.max(current.lo().clone()));
    let hi = hi.map_or(current.hi().clone(), |hi| hi.min(current.hi().clone()));
    // An empty result means the facts contradict each other; keep the
    // looser bound, the caller detects the contradiction separately.
    if let Some(next) = Interval::new(lo, hi) {
        *current = next;
    }
}

pub(crate) fn atom_bounds_at(
    atom: &Atom,
    facts: &FactSet,
    ctx: &Context<'_>,
    depth: u32,
) -> Option<Interval> {
    let mut range = match (ctx.type_range(atom), facts.range_of(atom)) {
        (Some(t), Some(f)) => t.intersect(f).unwrap_or_else(|| f.clone()),
        (Some(t), None) => t,
        (None, Some(f)) => f.clone(),
        (None, None) => return None,
    };
    if depth == 0 {
        return Some(range);
    }

    for fact in facts.iter() {
        match fact {
            Fact::Relation {
                lhs,
                op: RelOp::Le,
                rhs,
                offset,
            } if lhs != rhs => {
                if lhs == atom {
                    if let Some(b) = atom_bounds_at(rhs, facts, ctx, depth - 1) {
                        tighten(&mut range, None, Some(b.hi() + offset));
                    }
                } else if rhs == atom {
                    if let Some(b) = atom_bounds_at(lhs, facts, ctx, depth - 1) {
                        tighten(&mut range, Some(b.lo() - offset), None);
                    }
                }
            }
            Fact::Relation {
                lhs,
                op: RelOp::Ne,
                rhs,
                offset,
            } if lhs != rhs => {
                let excluded = if lhs == atom {
                    atom_bounds_at(rhs, facts, ctx, depth - 1)
                        .and_then(|b| b.as_point().map(|p| p + offset))
                } else if rhs == atom {
                    atom_bounds_at(lhs, facts, ctx, depth - 1)
                        .and_then(|b| b.as_point().map(|p| p - offset))
                } else {
                    None
                };
                if let Some(v) = excluded {
                    if let Some(next) = range.exclude(&v) {
                        range = next;
                    }
                }
            }
            Fact::Equal { atom: a, value } if a == atom => {
                if let Some(b) = bounds_at(value, facts, ctx, depth - 1) {
                    tighten(&mut range, Some(b.lo().clone()), Some(b.hi().clone()));
                }
            }
            _ => {}
        }
    }
    Some(range)
}

pub(crate) fn bounds_at(
    term: &Term,
    facts: &FactSet,
    ctx: &Context<'_>,
    depth: u32,
) -> Option<Interval> {
    match term {
        Term::Const(v) => Some(Interval::point(v.clone())),
        Term::Bool(_) => None,
        Term::Atom(a) => atom_bounds_at(a, facts, ctx, depth),
        Term::Unary(wdinstr::modules::int::UnaryOp::Neg, t) => {
            Some(bounds_at(t, facts, ctx, depth)?.neg())
        }
        Term::Unary(..) => None,
        Term::Binary(op, l, r) => {
            if op.is_comparison() || op.is_logical() {
                return None;
            }
            let arith = interval_op(
                op.unwrapped(),
                bounds_at(l, facts, ctx, depth),
                bounds_at(r, facts, ctx, depth),
            );
            let linear = match op.unwrapped() {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => term
                    .linear()
                    .filter(|lin| !lin.is_constant())
                    .and_then(|lin| linear_bounds_at(&lin, facts, ctx, depth)),
                _ => None,
            };
            match (arith, linear) {
                (Some(a), Some(l)) => Some(a.intersect(&l).unwrap_or(a)),
                (a, l) => a.or(l),
            }
        }
        Term::Wrapping(ty, op, l, r) => {
            let exact = Term::binary(op.unwrapped(), (**l).clone(), (**r).clone());
            let full = ty.full_range();
            match bounds_at(&exact, facts, ctx, depth) {
                Some(b) if full.contains(&b) => Some(b),
                _ => Some(full),
            }
        }
        Term::Index(base, _) => ctx
            .scope
            .type_of(base)?
            .element()?
            .interval()
            .cloned(),
    }
}

/// Applies an operator to operand bounds.
pub fn interval_op(op: BinaryOp, l: Option<Interval>, r: Option<Interval>) -> Option<Interval> {
    let (l, r) = (l?, r?);
    match op {
        BinaryOp::Add => Some(l.add(&r)),
        BinaryOp::Sub => Some(l.sub(&r)),
        BinaryOp::Mul => Some(l.mul(&r)),
        BinaryOp::Div => l.quo(&r),
        BinaryOp::Rem => l.rem(&r),
        BinaryOp::Shl => l.shl(&r),
        BinaryOp::Shr => l.shr(&r),
        BinaryOp::BitAnd => l.bitand(&r),
        BinaryOp::BitOr => l.bitor(&r),
        BinaryOp::BitXor => l.bitxor(&r),
        BinaryOp::BitAndNot => l.bitandnot(&r),
        _ => None,
    }
}

/// Bounds of an affine combination of atoms.
pub fn linear_bounds(lin: &Linear, facts: &FactSet, ctx: &Context<'_>) -> Option<Interval> {
    linear_bounds_at(lin, facts, ctx, ctx.config.substitution_depth)
}

fn linear_bounds_at(
    lin: &Linear,
    facts: &FactSet,
    ctx: &Context<'_>,
    depth: u32,
) -> Option<Interval> {
    let constant = Interval::point(lin.constant.clone());
    if let Some((x, y)) = lin.as_difference() {
        let upper = difference_upper(x, y, facts, ctx, depth)?;
        let lower = -difference_upper(y, x, facts, ctx, depth)?;
        return Some(Interval::new(lower, upper)?.add(&constant));
    }
    let mut acc = constant;
    for (atom, coeff) in &lin.coeffs {
        let b = atom_bounds_at(atom, facts, ctx, depth)?;
        acc = acc.add(&b.mul(&Interval::point(coeff.clone())));
    }
    Some(acc)
}

/// Upper bound of `x - y`.
///
/// Follows up to `relation_depth` relational edges out of `x` (each edge
/// `a <= b + k` bounds `a - b` by `k`), then closes the chain at `y` either
/// exactly or through the interval bounds of the last atom reached.
pub fn difference_upper(
    x: &Atom,
    y: &Atom,
    facts: &FactSet,
    ctx: &Context<'_>,
    depth: u32,
) -> Option<BigInt> {
    let mut edges: Vec<(&Atom, &Atom, BigInt)> = Vec::new();
    let mut owned: Vec<(Atom, Atom, BigInt)> = Vec::new();
    for fact in facts.iter() {
        match fact {
            Fact::Relation {
                lhs,
                op: RelOp::Le,
                rhs,
                offset,
            } => edges.push((lhs, rhs, offset.clone())),
            Fact::Equal { atom, value } => {
                if let Some(lin) = value.linear() {
                    if let Some(b) = lin.as_offset_atom() {
                        owned.push((atom.clone(), b.clone(), lin.constant.clone()));
                        owned.push((b.clone(), atom.clone(), -lin.constant.clone()));
                    }
                }
            }
            _ => {}
        }
    }
    edges.extend(owned.iter().map(|(a, b, k)| (a, b, k.clone())));

    let mut dist: BTreeMap<&Atom, BigInt> = BTreeMap::from([(x, BigInt::ZERO)]);
    for _ in 0..ctx.config.relation_depth {
        let mut changed = false;
        for (a, b, w) in &edges {
            let Some(da) = dist.get(a) else { continue };
            let candidate = da + w;
            if dist.get(b).is_none_or(|db| candidate < *db) {
                dist.insert(*b, candidate);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let inner = depth.saturating_sub(1);
    let y_bounds = atom_bounds_at(y, facts, ctx, inner);
    dist.iter()
        .filter_map(|(z, d)| {
            if *z == y {
                Some(d.clone())
            } else {
                let zb = atom_bounds_at(z, facts, ctx, inner)?;
                Some(d + zb.hi() - y_bounds.as_ref()?.lo())
            }
        })
        .min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::conf::AnalysisConfig;
    use wdinstr::{modules::scope::Scope, types::Type};

    fn scope() -> Scope {
        let mut scope = Scope::default();
        scope.declare("i", Type::u32());
        scope.declare("n", Type::u32());
        scope.declare("buf", Type::slice(Type::u8()));
        scope
    }

    #[test]
    fn differences_follow_relations() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let mut facts = FactSet::new();
        let len = Atom::Length("buf".into());
        facts.insert(Fact::Relation {
            lhs: Atom::var("i"),
            op: RelOp::Le,
            rhs: Atom::var("n"),
            offset: BigInt::from(-1),
        });
        facts.insert(Fact::Relation {
            lhs: Atom::var("n"),
            op: RelOp::Le,
            rhs: len.clone(),
            offset: BigInt::ZERO,
        });
        let upper = difference_upper(&Atom::var("i"), &len, &facts, &ctx, 2).unwrap();
        assert_eq!(upper, BigInt::from(-1));
    }

    #[test]
    fn wrapping_falls_back_to_full_range() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let facts = FactSet::new();
        let t = Term::Wrapping(
            wdinstr::types::IntType::U32,
            BinaryOp::WrapAdd,
            Box::new(Term::var("i")),
            Box::new(Term::int(1)),
        );
        assert_eq!(
            bounds_of(&t, &facts, &ctx),
            Some(wdinstr::types::IntType::U32.full_range())
        );
    }
}
