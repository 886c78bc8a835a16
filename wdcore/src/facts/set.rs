//! The fact database of a single program point.
use std::{
    collections::{BTreeSet, btree_set},
    fmt::Display,
};

use log::trace;
use num_bigint::BigInt;
use wdinstr::{
    modules::{int::BinaryOp, operand::Name},
    types::interval::Interval,
};

use crate::facts::{
    Context, Fact, Prop, RelOp,
    bounds::{atom_bounds, bounds_of},
    rules::Prover,
    term::{Atom, ConstValue, Term, eval_int_op},
};

/// Set of facts holding at a program point.
///
/// An unreachable set stands for a point no execution reaches: it proves
/// everything and is the identity of [`FactSet::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FactSet {
    facts: BTreeSet<Fact>,
    unreachable: bool,
}

/// Outcome of rewriting a comparison into facts.
pub(crate) enum Normalized {
    /// The comparison folds to a constant.
    Trivial(bool),
    Facts(Vec<Fact>),
    /// No direct fact representation.
    Opaque,
}

/// Rewrites `l op r` over integers into range and relation facts, when the
/// difference `l - r` mentions at most two atoms with unit coefficients.
pub(crate) fn normalize_comparison(
    op: BinaryOp,
    l: &Term,
    r: &Term,
    ctx: &Context<'_>,
) -> Normalized {
    let (Some(ll), Some(lr)) = (l.linear(), r.linear()) else {
        return Normalized::Opaque;
    };
    let diff = ll.sub(&lr);
    let c = diff.constant.clone();
    let one = BigInt::from(1);

    if diff.is_constant() {
        return match eval_int_op(op, &c, &BigInt::ZERO) {
            Some(ConstValue::Bool(b)) => Normalized::Trivial(b),
            _ => Normalized::Opaque,
        };
    }

    // x + c op 0, or -x + c op 0.
    if diff.coeffs.len() == 1 {
        let Some((atom, coeff)) = diff.coeffs.iter().next() else {
            return Normalized::Opaque;
        };
        let (op, k) = if *coeff == one {
            (op, -c)
        } else if *coeff == -one.clone() {
            match op.swapped() {
                Some(op) => (op, c),
                None => return Normalized::Opaque,
            }
        } else {
            return Normalized::Opaque;
        };
        let Some(ty) = ctx.type_range(atom) else {
            return Normalized::Opaque;
        };
        let range = match op {
            BinaryOp::Lt => Interval::new(ty.lo().clone(), &k - 1),
            BinaryOp::Le => Interval::new(ty.lo().clone(), k),
            BinaryOp::Gt => Interval::new(&k + 1, ty.hi().clone()),
            BinaryOp::Ge => Interval::new(k, ty.hi().clone()),
            BinaryOp::Eq => {
                if !ty.contains_value(&k) {
                    return Normalized::Trivial(false);
                }
                Some(Interval::point(k))
            }
            // Exclusion depends on the current bounds, see `assume_compare`.
            _ => return Normalized::Opaque,
        };
        return match range {
            Some(range) => Normalized::Facts(vec![Fact::Range {
                atom: atom.clone(),
                range,
            }]),
            None => Normalized::Trivial(false),
        };
    }

    // x - y + c op 0.
    let Some((x, y)) = diff.as_difference() else {
        return Normalized::Opaque;
    };
    let rel = |lhs: &Atom, op: RelOp, rhs: &Atom, offset: BigInt| Fact::Relation {
        lhs: lhs.clone(),
        op,
        rhs: rhs.clone(),
        offset,
    };
    Normalized::Facts(match op {
        BinaryOp::Lt => vec![rel(x, RelOp::Le, y, -&c - 1)],
        BinaryOp::Le => vec![rel(x, RelOp::Le, y, -&c)],
        BinaryOp::Gt => vec![rel(y, RelOp::Le, x, &c - 1)],
        BinaryOp::Ge => vec![rel(y, RelOp::Le, x, c)],
        BinaryOp::Eq => vec![rel(x, RelOp::Le, y, -&c), rel(y, RelOp::Le, x, c)],
        BinaryOp::Ne => vec![rel(x, RelOp::Ne, y, -c)],
        _ => return Normalized::Opaque,
    })
}

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            facts: BTreeSet::new(),
            unreachable: true,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    pub fn mark_unreachable(&mut self) {
        trace!("fact set became unreachable");
        self.facts.clear();
        self.unreachable = true;
    }

    pub fn iter(&self) -> btree_set::Iter<'_, Fact> {
        self.facts.iter()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.facts.contains(fact)
    }

    /// Explicit range recorded for `atom`.
    pub fn range_of(&self, atom: &Atom) -> Option<&Interval> {
        self.facts.iter().find_map(|f| match f {
            Fact::Range { atom: a, range } if a == atom => Some(range),
            _ => None,
        })
    }

    pub fn flag_of(&self, var: &str) -> Option<bool> {
        self.facts.iter().find_map(|f| match f {
            Fact::Flag { var: v, value } if v == var => Some(*value),
            _ => None,
        })
    }

    /// Terms `atom` is known to be equal to.
    pub fn equalities_of<'a>(&'a self, atom: &'a Atom) -> impl Iterator<Item = &'a Term> + 'a {
        self.facts.iter().filter_map(move |f| match f {
            Fact::Equal { atom: a, value } if a == atom => Some(value),
            _ => None,
        })
    }

    /// Inserts a fact without any deduction. A `Range` replaces the
    /// previous range of its atom; a `Flag` replaces the previous flag.
    pub fn insert(&mut self, fact: Fact) {
        if self.unreachable {
            return;
        }
        match &fact {
            Fact::Range { atom, .. } => self
                .facts
                .retain(|f| !matches!(f, Fact::Range { atom: a, .. } if a == atom)),
            Fact::Flag { var, .. } => self
                .facts
                .retain(|f| !matches!(f, Fact::Flag { var: v, .. } if v == var)),
            _ => {}
        }
        self.facts.insert(fact);
    }

    /// Drops every fact that depends on `name`.
    pub fn forget(&mut self, name: &str) {
        self.facts.retain(|f| !f.mentions(name));
    }

    /// Drops equalities reading elements of `name`, after a store into it.
    pub fn forget_elements(&mut self, name: &str) {
        self.facts.retain(|f| match f {
            Fact::Equal { value, .. } => !value.reads_elements_of(name),
            _ => true,
        });
    }

    /// Adds `fact`, deriving what follows from it. Assuming a fact that
    /// contradicts the set makes it unreachable.
    pub fn assume(&mut self, fact: Fact, ctx: &Context<'_>) {
        if self.unreachable {
            return;
        }
        match fact {
            Fact::Range { atom, range } => self.assume_range(atom, range, ctx),
            Fact::Flag { var, value } => self.assume_flag(var, value, ctx, true),
            Fact::Equal { atom, value } => self.assume_equal(atom, value, ctx),
            Fact::Relation {
                lhs,
                op,
                rhs,
                offset,
            } => {
                if lhs == rhs {
                    let holds = match op {
                        RelOp::Le => offset >= BigInt::ZERO,
                        RelOp::Ne => offset != BigInt::ZERO,
                    };
                    if !holds {
                        self.mark_unreachable();
                    }
                    return;
                }
                let fact = Fact::Relation {
                    lhs,
                    op,
                    rhs,
                    offset,
                };
                let Prop::Holds(term) = fact.to_prop() else {
                    return;
                };
                if self.implies(&Prop::Holds(term.clone()), ctx) {
                    return;
                }
                if self.implies(&Prop::Holds(term.negate()), ctx) {
                    self.mark_unreachable();
                    return;
                }
                self.facts.insert(fact);
            }
        }
    }

    fn assume_range(&mut self, atom: Atom, range: Interval, ctx: &Context<'_>) {
        let current = atom_bounds(&atom, self, ctx);
        if let Some(cur) = &current {
            if range.contains(cur) {
                return;
            }
            if cur.is_disjoint(&range) {
                self.mark_unreachable();
                return;
            }
        }
        let next = match current {
            Some(cur) => cur.intersect(&range),
            None => Some(range),
        };
        match next {
            Some(range) => self.insert(Fact::Range { atom, range }),
            None => self.mark_unreachable(),
        }
    }

    fn assume_flag(&mut self, var: Name, value: bool, ctx: &Context<'_>, expand: bool) {
        match self.flag_of(&var) {
            Some(v) if v == value => return,
            Some(_) => {
                self.mark_unreachable();
                return;
            }
            None => {}
        }
        self.insert(Fact::Flag {
            var: var.clone(),
            value,
        });
        if expand {
            // One level only: facts learnt here do not expand further.
            let atom = Atom::Var(var);
            let defs: Vec<Term> = self.equalities_of(&atom).cloned().collect();
            for def in defs {
                self.assume_cond_inner(&def, value, ctx, false);
            }
        }
    }

    fn assume_equal(&mut self, atom: Atom, value: Term, ctx: &Context<'_>) {
        match value.const_eval() {
            Some(ConstValue::Int(c)) => {
                return self.assume_range(atom, Interval::point(c), ctx);
            }
            Some(ConstValue::Bool(b)) => {
                if let Atom::Var(var) = atom {
                    self.assume_flag(var, b, ctx, true);
                }
                return;
            }
            None => {}
        }
        if !value.is_stable() || value.mentions(atom.name()) {
            return;
        }
        let fact = Fact::Equal { atom, value };
        if self.facts.contains(&fact) {
            return;
        }
        let Fact::Equal { atom, value } = &fact else {
            return;
        };
        if ctx.is_bool(value) {
            let known = match atom {
                Atom::Var(v) => self.flag_of(v),
                Atom::Length(_) => None,
            };
            let value = value.clone();
            self.facts.insert(fact);
            if let Some(flag) = known {
                self.assume_cond_inner(&value, flag, ctx, false);
            }
            return;
        }
        if let Some(b) = bounds_of(value, self, ctx) {
            self.assume_range(atom.clone(), b, ctx);
        }
        if !self.unreachable {
            self.facts.insert(fact);
        }
    }

    /// Assumes that the boolean `cond` evaluates to `value`.
    pub fn assume_cond(&mut self, cond: &Term, value: bool, ctx: &Context<'_>) {
        self.assume_cond_inner(cond, value, ctx, true);
    }

    fn assume_cond_inner(&mut self, cond: &Term, value: bool, ctx: &Context<'_>, expand: bool) {
        if self.unreachable {
            return;
        }
        if let Some(ConstValue::Bool(b)) = cond.const_eval() {
            if b != value {
                self.mark_unreachable();
            }
            return;
        }
        match cond {
            Term::Unary(wdinstr::modules::int::UnaryOp::Not, inner) => {
                self.assume_cond_inner(inner, !value, ctx, expand)
            }
            Term::Binary(BinaryOp::And, l, r) if value => {
                self.assume_cond_inner(l, true, ctx, expand);
                self.assume_cond_inner(r, true, ctx, expand);
            }
            Term::Binary(BinaryOp::Or, l, r) if !value => {
                self.assume_cond_inner(l, false, ctx, expand);
                self.assume_cond_inner(r, false, ctx, expand);
            }
            Term::Binary(BinaryOp::And, l, r) | Term::Binary(BinaryOp::Or, l, r) => {
                self.assume_disjunction(l, r, value, ctx, expand)
            }
            Term::Atom(Atom::Var(var)) if ctx.is_bool_var(var) => {
                self.assume_flag(var.clone(), value, ctx, expand)
            }
            Term::Binary(op, l, r) if op.is_comparison() => {
                let op = if value {
                    Some(*op)
                } else {
                    op.negated()
                };
                if let Some(op) = op {
                    self.assume_compare(op, l, r, ctx, expand);
                }
            }
            _ => {}
        }
    }

    /// `l == value or r == value`: only usable once one side is refuted.
    fn assume_disjunction(
        &mut self,
        l: &Term,
        r: &Term,
        value: bool,
        ctx: &Context<'_>,
        expand: bool,
    ) {
        let refuted = |t: &Term| if value { t.negate() } else { t.clone() };
        if self.implies(&Prop::Holds(refuted(l)), ctx) {
            self.assume_cond_inner(r, value, ctx, expand);
        } else if self.implies(&Prop::Holds(refuted(r)), ctx) {
            self.assume_cond_inner(l, value, ctx, expand);
        }
    }

    fn assume_compare(&mut self, op: BinaryOp, l: &Term, r: &Term, ctx: &Context<'_>, expand: bool) {
        if ctx.is_bool(l) || ctx.is_bool(r) {
            let eq = match op {
                BinaryOp::Eq => true,
                BinaryOp::Ne => false,
                _ => return,
            };
            match (l, r) {
                (t, Term::Bool(b)) | (Term::Bool(b), t) => {
                    self.assume_cond_inner(t, *b == eq, ctx, expand)
                }
                (Term::Atom(a @ Atom::Var(_)), other) | (other, Term::Atom(a @ Atom::Var(_))) => {
                    let value = if eq { other.clone() } else { other.negate() };
                    self.assume_equal(a.clone(), value, ctx);
                }
                _ => {}
            }
            return;
        }

        match normalize_comparison(op, l, r, ctx) {
            Normalized::Trivial(true) => {}
            Normalized::Trivial(false) => self.mark_unreachable(),
            Normalized::Facts(facts) => {
                for fact in facts {
                    self.assume(fact, ctx);
                }
            }
            Normalized::Opaque => {
                if let Term::Atom(a) = l {
                    self.refine_atom(a, op, r, ctx);
                }
                if let (Term::Atom(a), Some(op)) = (r, op.swapped()) {
                    self.refine_atom(a, op, l, ctx);
                }
            }
        }

        if op == BinaryOp::Eq && !self.unreachable {
            match (l, r) {
                (Term::Atom(a), other) if !other.mentions(a.name()) => {
                    self.assume_equal(a.clone(), other.clone(), ctx)
                }
                (other, Term::Atom(a)) if !other.mentions(a.name()) => {
                    self.assume_equal(a.clone(), other.clone(), ctx)
                }
                _ => {}
            }
        }
    }

    /// Narrows `atom` so that `atom op other` can hold.
    fn refine_atom(&mut self, atom: &Atom, op: BinaryOp, other: &Term, ctx: &Context<'_>) {
        if self.unreachable {
            return;
        }
        let (Some(ob), Some(ty)) = (bounds_of(other, self, ctx), ctx.type_range(atom)) else {
            return;
        };
        let range = match op {
            BinaryOp::Lt => Interval::new(ty.lo().clone(), ob.hi() - 1),
            BinaryOp::Le => Interval::new(ty.lo().clone(), ob.hi().clone()),
            BinaryOp::Gt => Interval::new(ob.lo() + 1, ty.hi().clone()),
            BinaryOp::Ge => Interval::new(ob.lo().clone(), ty.hi().clone()),
            BinaryOp::Eq => Some(ob),
            BinaryOp::Ne => match (ob.as_point(), atom_bounds(atom, self, ctx)) {
                (Some(p), Some(cur)) => match cur.exclude(p) {
                    Some(next) => Some(next),
                    None => {
                        self.mark_unreachable();
                        return;
                    }
                },
                _ => return,
            },
            _ => return,
        };
        match range {
            Some(range) => self.assume_range(atom.clone(), range, ctx),
            None => self.mark_unreachable(),
        }
    }

    /// Rewrites the facts for `var := var + delta`.
    pub fn shift(&mut self, var: &str, delta: &BigInt, ctx: &Context<'_>) {
        if self.unreachable {
            return;
        }
        let target = Atom::var(var);
        let previous = Term::binary(BinaryOp::Sub, Term::var(var), Term::Const(delta.clone()));
        let facts = std::mem::take(&mut self.facts);
        for fact in facts {
            let shifted = match fact {
                Fact::Range { atom, range } if atom == target => {
                    let moved = range.add(&Interval::point(delta.clone()));
                    match ctx.type_range(&atom) {
                        Some(ty) => match moved.intersect(&ty) {
                            Some(range) => Fact::Range { atom, range },
                            None => continue,
                        },
                        None => Fact::Range { atom, range: moved },
                    }
                }
                Fact::Relation {
                    lhs,
                    op,
                    rhs,
                    offset,
                } if lhs == target => Fact::Relation {
                    lhs,
                    op,
                    rhs,
                    offset: offset + delta,
                },
                Fact::Relation {
                    lhs,
                    op,
                    rhs,
                    offset,
                } if rhs == target => Fact::Relation {
                    lhs,
                    op,
                    rhs,
                    offset: offset - delta,
                },
                Fact::Equal { atom, value } if atom == target => Fact::Equal {
                    atom,
                    value: Term::binary(BinaryOp::Add, value, Term::Const(delta.clone())),
                },
                Fact::Equal { atom, value } if value.mentions(var) => Fact::Equal {
                    atom,
                    value: value.substitute(&target, &previous),
                },
                other => other,
            };
            self.facts.insert(shifted);
        }
    }

    /// Facts holding on both incoming paths.
    ///
    /// Ranges present on both sides are joined into their hull; every other
    /// fact survives only if both sides carry it verbatim.
    pub fn merge(&self, other: &FactSet) -> FactSet {
        if self.unreachable {
            return other.clone();
        }
        if other.unreachable {
            return self.clone();
        }
        let mut out = FactSet::new();
        for fact in &self.facts {
            match fact {
                Fact::Range { atom, range } => {
                    if let Some(theirs) = other.range_of(atom) {
                        out.facts.insert(Fact::Range {
                            atom: atom.clone(),
                            range: range.hull(theirs),
                        });
                    }
                }
                _ if other.facts.contains(fact) => {
                    out.facts.insert(fact.clone());
                }
                _ => {}
            }
        }
        out
    }

    /// Drops every fact about a variable the loop body writes.
    pub fn widen_for_loop(&self, written: &BTreeSet<Name>) -> FactSet {
        if self.unreachable {
            return self.clone();
        }
        FactSet {
            facts: self
                .facts
                .iter()
                .filter(|f| !written.iter().any(|w| f.mentions(w)))
                .cloned()
                .collect(),
            unreachable: false,
        }
    }

    /// Keeps only what can be said about `names`.
    ///
    /// Every integer atom over `names` gets the tightest range derivable
    /// from the full set; other facts are kept when they only refer to
    /// `names`.
    pub fn project(&self, names: &BTreeSet<Name>, ctx: &Context<'_>) -> FactSet {
        if self.unreachable {
            return self.clone();
        }
        let mut out = FactSet::new();
        for name in names {
            for atom in [Atom::Var(name.clone()), Atom::Length(name.clone())] {
                let Some(b) = atom_bounds(&atom, self, ctx) else {
                    continue;
                };
                if ctx.type_range(&atom).as_ref() != Some(&b) {
                    out.facts.insert(Fact::Range { atom, range: b });
                }
            }
        }
        for fact in &self.facts {
            if matches!(fact, Fact::Range { .. }) {
                continue;
            }
            if fact.names().iter().all(|n| names.contains(*n)) {
                out.facts.insert(fact.clone());
            }
        }
        out
    }

    /// Tries to prove `prop` with the full rule list.
    pub fn prove(&self, prop: &Prop, ctx: &Context<'_>) -> bool {
        Prover::new(self, *ctx).prove(prop)
    }

    /// Like [`FactSet::prove`], without case splits. Used while assuming.
    pub fn implies(&self, prop: &Prop, ctx: &Context<'_>) -> bool {
        Prover::new(self, *ctx).prove_without_split(prop)
    }
}

impl Display for FactSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.unreachable {
            return write!(f, "unreachable");
        }
        write!(f, "{{")?;
        for (i, fact) in self.facts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", fact)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::conf::AnalysisConfig;
    use wdinstr::{modules::scope::Scope, types::Type};

    fn scope() -> Scope {
        let mut scope = Scope::default();
        scope.declare("x", Type::u32());
        scope.declare("y", Type::u32());
        scope.declare("c", Type::Bool);
        scope
    }

    fn cmp(op: BinaryOp, l: Term, r: Term) -> Term {
        Term::binary(op, l, r)
    }

    #[test]
    fn comparisons_become_ranges_and_relations() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let mut facts = FactSet::new();
        facts.assume_cond(&cmp(BinaryOp::Lt, Term::var("x"), Term::int(10)), true, &ctx);
        assert_eq!(
            facts.range_of(&Atom::var("x")),
            Interval::new(0, 9).as_ref()
        );
        facts.assume_cond(&cmp(BinaryOp::Lt, Term::var("x"), Term::var("y")), true, &ctx);
        assert!(facts.contains(&Fact::Relation {
            lhs: Atom::var("x"),
            op: RelOp::Le,
            rhs: Atom::var("y"),
            offset: BigInt::from(-1),
        }));
        assert!(!facts.is_unreachable());
    }

    #[test]
    fn contradictions_make_the_set_unreachable() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let mut facts = FactSet::new();
        facts.assume_cond(&cmp(BinaryOp::Lt, Term::var("x"), Term::var("y")), true, &ctx);
        facts.assume_cond(&cmp(BinaryOp::Lt, Term::var("y"), Term::var("x")), true, &ctx);
        assert!(facts.is_unreachable());

        let mut facts = FactSet::new();
        facts.assume_cond(&Term::var("c"), true, &ctx);
        facts.assume_cond(&Term::var("c"), false, &ctx);
        assert!(facts.is_unreachable());
    }

    #[test]
    fn flags_expand_their_definition() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let mut facts = FactSet::new();
        let def = cmp(BinaryOp::Ne, Term::var("x"), Term::int(0));
        facts.assume(
            Fact::Equal {
                atom: Atom::var("c"),
                value: def,
            },
            &ctx,
        );
        facts.assume_cond(&Term::var("c"), true, &ctx);
        assert_eq!(
            facts.range_of(&Atom::var("x")),
            Interval::new(1, u32::MAX).as_ref()
        );
    }

    #[test]
    fn merge_keeps_common_knowledge() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let mut a = FactSet::new();
        a.assume(
            Fact::Range {
                atom: Atom::var("x"),
                range: Interval::new(0, 3).unwrap(),
            },
            &ctx,
        );
        a.assume_cond(&Term::var("c"), true, &ctx);
        let mut b = FactSet::new();
        b.assume(
            Fact::Range {
                atom: Atom::var("x"),
                range: Interval::new(5, 8).unwrap(),
            },
            &ctx,
        );
        let m = a.merge(&b);
        assert_eq!(m.range_of(&Atom::var("x")), Interval::new(0, 8).as_ref());
        assert_eq!(m.flag_of("c"), None);
        assert_eq!(a.merge(&FactSet::unreachable()), a);
    }

    #[test]
    fn shifting_moves_ranges_and_relations() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let mut facts = FactSet::new();
        facts.assume_cond(&cmp(BinaryOp::Lt, Term::var("x"), Term::var("y")), true, &ctx);
        facts.assume_cond(&cmp(BinaryOp::Le, Term::var("x"), Term::int(4)), true, &ctx);
        facts.shift("x", &BigInt::from(1), &ctx);
        assert_eq!(facts.range_of(&Atom::var("x")), Interval::new(1, 5).as_ref());
        assert!(facts.contains(&Fact::Relation {
            lhs: Atom::var("x"),
            op: RelOp::Le,
            rhs: Atom::var("y"),
            offset: BigInt::ZERO,
        }));
    }
}
