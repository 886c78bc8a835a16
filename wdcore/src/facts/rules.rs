//! Budgeted proof search.
//!
//! Rules are tried in a fixed order, and every application spends one unit
//! of the rule budget, so a proof attempt always terminates:
//!
//! 1. constant folding;
//! 2. syntactic lookup of the proposition among the facts;
//! 3. interval arithmetic over the bounds of both sides;
//! 4. relational closure over the linear difference of both sides;
//! 5. substitution of equality facts, then rules 1 to 4 again;
//! 6. a single case split on a boolean variable of the proposition.
use log::trace;
use wdinstr::{modules::int::BinaryOp, types::interval::Interval};

use crate::facts::{
    Context, Fact, Prop,
    bounds::{bounds_of, linear_bounds},
    set::{FactSet, Normalized, normalize_comparison},
    term::{Atom, ConstValue, Term},
};

/// Returns `true` if `l op r` holds for all values in the given bounds.
pub fn decide(op: BinaryOp, l: &Interval, r: &Interval) -> bool {
    match op {
        BinaryOp::Lt => l.hi() < r.lo(),
        BinaryOp::Le => l.hi() <= r.lo(),
        BinaryOp::Gt => l.lo() > r.hi(),
        BinaryOp::Ge => l.lo() >= r.hi(),
        BinaryOp::Eq => l.as_point().is_some() && l.as_point() == r.as_point(),
        BinaryOp::Ne => l.is_disjoint(r),
        _ => false,
    }
}

pub struct Prover<'a> {
    facts: &'a FactSet,
    ctx: Context<'a>,
    budget: u32,
}

impl<'a> Prover<'a> {
    pub fn new(facts: &'a FactSet, ctx: Context<'a>) -> Self {
        Self {
            facts,
            ctx,
            budget: ctx.config.rule_budget,
        }
    }

    /// Budget left.
    pub fn remaining(&self) -> u32 {
        self.budget
    }

    pub fn prove(&mut self, prop: &Prop) -> bool {
        if self.facts.is_unreachable() {
            return true;
        }
        let proven = self.prove_without_split(prop) || self.case_split(prop);
        trace!(
            "{} {} under {} ({} rule applications left)",
            if proven { "proved" } else { "failed to prove" },
            prop,
            self.facts,
            self.budget
        );
        proven
    }

    pub fn prove_without_split(&mut self, prop: &Prop) -> bool {
        if self.facts.is_unreachable() {
            return true;
        }
        match prop {
            Prop::Holds(t) => self.holds(t, true),
            Prop::InRange { term, range } => self.in_range(term, range, true),
        }
    }

    fn spend(&mut self) -> bool {
        if self.budget == 0 {
            return false;
        }
        self.budget -= 1;
        true
    }

    fn case_split(&mut self, prop: &Prop) -> bool {
        let term = match prop {
            Prop::Holds(t) | Prop::InRange { term: t, .. } => t,
        };
        let candidates: Vec<_> = term
            .atoms()
            .into_iter()
            .filter_map(|a| match a {
                Atom::Var(v) if self.ctx.is_bool_var(&v) && self.facts.flag_of(&v).is_none() => {
                    Some(v)
                }
                _ => None,
            })
            .collect();

        for var in candidates {
            if !self.spend() {
                return false;
            }
            let proven = [true, false].into_iter().all(|value| {
                let mut branch = self.facts.clone();
                branch.assume(
                    Fact::Flag {
                        var: var.clone(),
                        value,
                    },
                    &self.ctx,
                );
                let mut sub = Prover {
                    facts: &branch,
                    ctx: self.ctx,
                    budget: self.budget,
                };
                let ok = sub.prove_without_split(prop);
                self.budget = sub.budget;
                ok
            });
            if proven {
                return true;
            }
        }
        false
    }

    fn holds(&mut self, t: &Term, subst: bool) -> bool {
        if !self.spend() {
            return false;
        }
        match t.const_eval() {
            Some(ConstValue::Bool(b)) => return b,
            Some(ConstValue::Int(_)) => return false,
            None => {}
        }
        match t {
            Term::Unary(wdinstr::modules::int::UnaryOp::Not, inner) => match &**inner {
                Term::Atom(Atom::Var(v)) => self.flag_holds(v, false, subst),
                Term::Binary(..) | Term::Unary(..) => self.holds(&inner.negate(), subst),
                _ => false,
            },
            Term::Binary(BinaryOp::And, l, r) => self.holds(l, subst) && self.holds(r, subst),
            Term::Binary(BinaryOp::Or, l, r) => self.holds(l, subst) || self.holds(r, subst),
            Term::Atom(Atom::Var(v)) => self.flag_holds(v, true, subst),
            Term::Binary(op, l, r) if op.is_comparison() => {
                if self.ctx.is_bool(l) || self.ctx.is_bool(r) {
                    self.bool_compare(*op, l, r, subst)
                } else {
                    self.compare(*op, l, r, subst)
                }
            }
            _ => false,
        }
    }

    /// `var == value`, from a flag or from the definition of `var`.
    fn flag_holds(&mut self, var: &str, value: bool, subst: bool) -> bool {
        if let Some(flag) = self.facts.flag_of(var) {
            return flag == value;
        }
        if !subst {
            return false;
        }
        let atom = Atom::var(var);
        let defs: Vec<Term> = self.facts.equalities_of(&atom).cloned().collect();
        defs.iter().any(|def| {
            let goal = if value { def.clone() } else { def.negate() };
            self.holds(&goal, false)
        })
    }

    fn bool_compare(&mut self, op: BinaryOp, l: &Term, r: &Term, subst: bool) -> bool {
        let eq = match op {
            BinaryOp::Eq => true,
            BinaryOp::Ne => false,
            _ => return false,
        };
        if l == r {
            return eq;
        }
        match (l, r) {
            (t, Term::Bool(b)) | (Term::Bool(b), t) => {
                let goal = if *b == eq { t.clone() } else { t.negate() };
                self.holds(&goal, subst)
            }
            (Term::Atom(a @ Atom::Var(_)), other) | (other, Term::Atom(a @ Atom::Var(_))) => {
                let wanted = if eq { other.clone() } else { other.negate() };
                self.facts.contains(&Fact::Equal {
                    atom: a.clone(),
                    value: wanted,
                })
            }
            _ => false,
        }
    }

    fn compare(&mut self, op: BinaryOp, l: &Term, r: &Term, subst: bool) -> bool {
        if !self.spend() {
            return false;
        }
        if l == r {
            return matches!(op, BinaryOp::Eq | BinaryOp::Le | BinaryOp::Ge);
        }

        // Rule 2: the comparison is a stored relation.
        if let Normalized::Facts(facts) = normalize_comparison(op, l, r, &self.ctx) {
            let relational = facts.iter().all(|f| matches!(f, Fact::Relation { .. }));
            if relational && facts.iter().all(|f| self.facts.contains(f)) {
                return true;
            }
        }

        // Rule 3: interval bounds of each side.
        if let (Some(lb), Some(rb)) = (
            bounds_of(l, self.facts, &self.ctx),
            bounds_of(r, self.facts, &self.ctx),
        ) {
            if decide(op, &lb, &rb) {
                return true;
            }
        }

        // Rule 4: bounds of the difference, through relation chains.
        if let (Some(ll), Some(lr)) = (l.linear(), r.linear()) {
            let diff = ll.sub(&lr);
            if self.spend() {
                if let Some(db) = linear_bounds(&diff, self.facts, &self.ctx) {
                    if decide(op, &db, &Interval::point(0)) {
                        return true;
                    }
                }
            }
        }

        // Rule 5: replace atoms by the terms they equal.
        if subst {
            let (mut l, mut r) = (l.clone(), r.clone());
            for _ in 0..self.ctx.config.substitution_depth {
                let (nl, nr) = (self.substitute(&l), self.substitute(&r));
                if nl == l && nr == r {
                    break;
                }
                if self.compare(op, &nl, &nr, false) {
                    return true;
                }
                (l, r) = (nl, nr);
            }
        }
        false
    }

    /// One round of equality substitution.
    fn substitute(&self, t: &Term) -> Term {
        let mut out = t.clone();
        for atom in t.atoms() {
            if let Some(value) = self.facts.equalities_of(&atom).next() {
                out = out.substitute(&atom, value);
            }
        }
        out
    }

    fn in_range(&mut self, term: &Term, range: &Interval, subst: bool) -> bool {
        if !self.spend() {
            return false;
        }
        if let Some(ConstValue::Int(c)) = term.const_eval() {
            return range.contains_value(&c);
        }
        let bounds = bounds_of(term, self.facts, &self.ctx);
        if bounds.as_ref().is_some_and(|b| range.contains(b)) {
            return true;
        }
        let low_ok = bounds.as_ref().is_some_and(|b| b.lo() >= range.lo())
            || self.compare(BinaryOp::Ge, term, &Term::Const(range.lo().clone()), subst);
        low_ok
            && (bounds.as_ref().is_some_and(|b| b.hi() <= range.hi())
                || self.compare(BinaryOp::Le, term, &Term::Const(range.hi().clone()), subst))
    }
}

/// Returns `true` if the lower end of `prop` (its `>= lo` half) is what
/// fails, for range propositions.
pub fn fails_low(prop: &Prop, facts: &FactSet, ctx: &Context<'_>) -> bool {
    match prop {
        Prop::InRange { term, range } => !facts.prove(
            &Prop::Holds(Term::binary(
                BinaryOp::Ge,
                term.clone(),
                Term::Const(range.lo().clone()),
            )),
            ctx,
        ),
        Prop::Holds(_) => false,
    }
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
        scope.declare("x", Type::u32());
        scope.declare("c", Type::Bool);
        scope.declare("buf", Type::slice(Type::u8()));
        scope
    }

    #[test]
    fn relational_chains_are_followed() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let mut facts = FactSet::new();
        let lt = |l: Term, r: Term| Term::binary(BinaryOp::Lt, l, r);
        let le = |l: Term, r: Term| Term::binary(BinaryOp::Le, l, r);
        let len = Term::Atom(Atom::Length("buf".into()));
        facts.assume_cond(&lt(Term::var("i"), Term::var("n")), true, &ctx);
        facts.assume_cond(&le(Term::var("n"), len.clone()), true, &ctx);
        assert!(facts.prove(&Prop::Holds(lt(Term::var("i"), len.clone())), &ctx));
        assert!(!facts.prove(&Prop::Holds(lt(Term::var("n"), len)), &ctx));
    }

    #[test]
    fn equalities_are_substituted() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let mut facts = FactSet::new();
        facts.assume(
            Fact::Equal {
                atom: Atom::var("x"),
                value: Term::var("n"),
            },
            &ctx,
        );
        facts.assume_cond(
            &Term::binary(BinaryOp::Ge, Term::var("n"), Term::int(1)),
            true,
            &ctx,
        );
        let prop = Prop::InRange {
            term: Term::binary(BinaryOp::Sub, Term::var("x"), Term::int(1)),
            range: wdinstr::types::IntType::U32.full_range(),
        };
        assert!(facts.prove(&prop, &ctx));
    }

    #[test]
    fn case_split_on_flags() {
        let (scope, config) = (scope(), AnalysisConfig::default());
        let ctx = Context::new(&scope, &config);
        let facts = FactSet::new();
        let c = Term::var("c");
        let prop = Prop::Holds(Term::binary(BinaryOp::Or, c.clone(), c.negate()));
        assert!(facts.prove(&prop, &ctx));
        assert!(!facts.implies(&prop, &ctx));
    }

    #[test]
    fn budget_exhaustion_fails_closed() {
        let scope = scope();
        let config = AnalysisConfig {
            rule_budget: 0,
            ..Default::default()
        };
        let ctx = Context::new(&scope, &config);
        let facts = FactSet::new();
        let trivial = Prop::Holds(Term::binary(BinaryOp::Le, Term::var("i"), Term::var("i")));
        assert!(!facts.prove(&trivial, &ctx));
    }
}
