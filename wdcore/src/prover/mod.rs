//! Obligation generation.
//!
//! The [`Checker`] walks the ops of a function in evaluation order. For
//! every construct that can fail at run time it emits an obligation and
//! discharges it against the current facts, then updates the facts with
//! the effect of the op. The first obligation that cannot be proven stops
//! the analysis of the function.
use std::collections::BTreeMap;

use log::{debug, trace};
use num_bigint::BigInt;
use wdinstr::{
    modules::{
        Function, RESULT_NAME,
        block::{AssertKind, Op, OpKind},
        instructions::{Place, Reason},
        int::{AssignOp, BinaryOp, UnaryOp},
        operand::{Expr, ExprKind, Name, SourceLoc},
        scope::{Scope, binary_result_type},
        symbol::{Signature, SymbolTable},
    },
    types::{IntType, Type, interval::Interval},
};

use crate::{
    facts::{
        Atom, ConstValue, Context, Fact, Prop, Term, bounds::bounds_of, rules::fails_low,
        set::FactSet,
    },
    magic::{BYTE_MAX, BYTE_MIN},
    prover::obligation::{Obligation, ObligationKind, Resolution},
    utils::{
        conf::AnalysisConfig,
        error::{CoreError, CoreResult},
    },
};

pub mod obligation;
pub mod reasons;

fn byte_range() -> Interval {
    Interval::point(BYTE_MIN).hull(&Interval::point(BYTE_MAX))
}

/// Placeholder a callee parameter is renamed to before binding arguments.
fn placeholder(i: usize) -> String {
    format!("${}", i)
}

pub struct Checker<'a> {
    function: &'a Function,
    scope: &'a Scope,
    /// Body scope extended with `result`, for postconditions.
    post_scope: &'a Scope,
    symbols: &'a SymbolTable,
    config: &'a AnalysisConfig,
    discharged: usize,
}

impl<'a> Checker<'a> {
    pub fn new(
        function: &'a Function,
        scope: &'a Scope,
        post_scope: &'a Scope,
        symbols: &'a SymbolTable,
        config: &'a AnalysisConfig,
    ) -> Self {
        Self {
            function,
            scope,
            post_scope,
            symbols,
            config,
            discharged: 0,
        }
    }

    pub fn ctx(&self) -> Context<'a> {
        Context::new(self.scope, self.config)
    }

    pub fn function(&self) -> &'a Function {
        self.function
    }

    pub fn config(&self) -> &'a AnalysisConfig {
        self.config
    }

    /// Number of obligations proven so far.
    pub fn discharged(&self) -> usize {
        self.discharged
    }

    fn mismatch(&self, loc: SourceLoc, message: impl Into<String>) -> CoreError {
        CoreError::TypeMismatch {
            function: self.function.name.clone(),
            loc,
            message: message.into(),
        }
    }

    fn unsupported(&self, loc: SourceLoc, message: impl Into<String>) -> CoreError {
        CoreError::UnsupportedConstruct {
            function: self.function.name.clone(),
            loc,
            message: message.into(),
        }
    }

    fn type_of(&self, name: &str, loc: SourceLoc) -> CoreResult<&'a Type> {
        self.scope
            .type_of(name)
            .ok_or_else(|| self.unsupported(loc, format!("`{}` is not declared", name)))
    }

    fn term(&self, e: &Expr) -> CoreResult<Term> {
        Term::from_expr(e).ok_or_else(|| {
            self.unsupported(e.loc, format!("`{}` cannot be used as a value here", e))
        })
    }

    /// Proves `prop` or fails with the facts it was attempted under.
    fn discharge(
        &mut self,
        kind: ObligationKind,
        prop: Prop,
        loc: SourceLoc,
        facts: &FactSet,
        ctx: &Context<'_>,
    ) -> CoreResult<()> {
        let obligation = Obligation::new(kind, prop, loc);
        match obligation.resolve(facts, ctx) {
            Resolution::Proven => {
                trace!("{}: discharged {} `{}`", loc, kind, obligation.prop);
                self.discharged += 1;
                Ok(())
            }
            Resolution::Failed => {
                debug!(
                    "{}: cannot prove {} `{}` in `{}` under {}",
                    loc, kind, obligation.prop, self.function.name, facts
                );
                Err(CoreError::UnprovableObligation {
                    function: self.function.name.clone(),
                    loc,
                    kind,
                    prop: obligation.prop,
                    facts: Box::new(facts.clone()),
                })
            }
        }
    }

    /// The value of `term` must fit `ty`; failures are classified as
    /// overflow or underflow.
    fn discharge_fits(
        &mut self,
        term: Term,
        ty: IntType,
        loc: SourceLoc,
        facts: &FactSet,
    ) -> CoreResult<()> {
        let ctx = self.ctx();
        let prop = Prop::InRange {
            term,
            range: ty.full_range(),
        };
        let kind = if facts.prove(&prop, &ctx) {
            ObligationKind::Overflow
        } else if fails_low(&prop, facts, &ctx) {
            ObligationKind::Underflow
        } else {
            ObligationKind::Overflow
        };
        self.discharge(kind, prop, loc, facts, &ctx)
    }

    /// Facts holding on entry: the assumed preconditions.
    pub fn entry_facts(&self) -> CoreResult<FactSet> {
        let ctx = self.ctx();
        let mut facts = FactSet::new();
        for pre in &self.function.preconditions {
            if !pre.ty.is_bool() {
                return Err(self.mismatch(pre.loc, format!("precondition `{}` is not a boolean", pre)));
            }
            facts.assume_cond(&self.term(pre)?, true, &ctx);
        }
        if facts.is_unreachable() {
            return Err(CoreError::InconsistentFactSet {
                function: self.function.name.clone(),
                loc: self.function.loc,
                message: "the preconditions contradict each other".to_string(),
            });
        }
        Ok(facts)
    }

    /// Assumes that `cond` evaluated to `value`.
    pub fn assume(&self, cond: &Expr, value: bool, facts: &mut FactSet) {
        if let Some(t) = Term::from_expr(cond) {
            facts.assume_cond(&t, value, &self.ctx());
        }
    }

    fn check_operand_types(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr, loc: SourceLoc) -> CoreResult<()> {
        if op.is_logical() || ((lhs.ty.is_bool() || rhs.ty.is_bool()) && op.is_comparison()) {
            let same = lhs.ty.is_bool() && rhs.ty.is_bool();
            let allowed = op.is_logical() || matches!(op, BinaryOp::Eq | BinaryOp::Ne);
            if !(same && allowed) {
                return Err(self.mismatch(
                    loc,
                    format!("`{}` cannot combine `{}` and `{}`", op.to_str(), lhs.ty, rhs.ty),
                ));
            }
            return Ok(());
        }
        match (&lhs.ty, &rhs.ty) {
            (Type::Int(a), Type::Int(b)) => {
                if !op.is_shift() && a.ty() != b.ty() {
                    return Err(self.mismatch(
                        loc,
                        format!(
                            "operands of `{}` have different types `{}` and `{}`",
                            op.to_str(),
                            a.ty(),
                            b.ty()
                        ),
                    ));
                }
                Ok(())
            }
            (Type::Int(a), Type::Ideal) if op.is_arith() && !op.is_shift() => {
                self.constant_fits(rhs, a.ty(), loc)
            }
            (Type::Ideal, Type::Int(b)) if op.is_arith() && !op.is_shift() => {
                self.constant_fits(lhs, b.ty(), loc)
            }
            (Type::Int(_), Type::Ideal) | (Type::Ideal, Type::Int(_)) if op.is_comparison() => {
                let constant = if lhs.ty.is_ideal() { lhs } else { rhs };
                self.constant_value(constant).map(|_| ())
            }
            (Type::Int(_) | Type::Ideal, Type::Int(_) | Type::Ideal) => Ok(()),
            (l, r) => Err(self.mismatch(
                loc,
                format!("`{}` expects integers, found `{}` and `{}`", op.to_str(), l, r),
            )),
        }
    }

    fn constant_value(&self, e: &Expr) -> CoreResult<BigInt> {
        match self.term(e)?.const_eval() {
            Some(ConstValue::Int(v)) => Ok(v),
            _ => Err(self.mismatch(e.loc, format!("untyped expression `{}` is not a constant", e))),
        }
    }

    fn constant_fits(&self, e: &Expr, ty: IntType, loc: SourceLoc) -> CoreResult<()> {
        let v = self.constant_value(e)?;
        if !ty.full_range().contains_value(&v) {
            return Err(self.mismatch(loc, format!("constant {} does not fit in `{}`", v, ty)));
        }
        Ok(())
    }

    fn require_int(&self, e: &Expr) -> CoreResult<()> {
        match &e.ty {
            Type::Int(_) => Ok(()),
            Type::Ideal => self.constant_value(e).map(|_| ()),
            other => Err(self.mismatch(e.loc, format!("`{}` has type `{}`, expected an integer", e, other))),
        }
    }

    fn require_bool(&self, e: &Expr) -> CoreResult<()> {
        if e.ty.is_bool() {
            Ok(())
        } else {
            Err(self.mismatch(e.loc, format!("`{}` has type `{}`, expected `bool`", e, e.ty)))
        }
    }

    /// Emits the obligations of evaluating `e`.
    pub fn check_expr(&mut self, e: &Expr, facts: &FactSet) -> CoreResult<()> {
        if facts.is_unreachable() {
            return Ok(());
        }
        let ctx = self.ctx();
        match &e.kind {
            ExprKind::Const(_) | ExprKind::Bool(_) | ExprKind::Var(_) | ExprKind::Length(_) => Ok(()),
            ExprKind::Unary { op, operand } => {
                self.check_expr(operand, facts)?;
                match op {
                    UnaryOp::Not => self.require_bool(operand),
                    UnaryOp::Neg => {
                        self.require_int(operand)?;
                        match e.ty.int_type() {
                            Some(ty) => self.discharge_fits(self.term(e)?, ty, e.loc, facts),
                            None => Ok(()),
                        }
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } if op.is_logical() => {
                self.check_operand_types(*op, lhs, rhs, e.loc)?;
                self.check_expr(lhs, facts)?;
                // `rhs` only runs when `lhs` did not decide the result.
                let mut guarded = facts.clone();
                guarded.assume_cond(&self.term(lhs)?, *op == BinaryOp::And, &ctx);
                self.check_expr(rhs, &guarded)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.check_expr(lhs, facts)?;
                self.check_expr(rhs, facts)?;
                self.check_operand_types(*op, lhs, rhs, e.loc)?;
                if op.is_comparison() {
                    return Ok(());
                }
                if e.ty.is_ideal() {
                    return self.constant_value(e).map(|_| ());
                }
                if matches!(op, BinaryOp::Div | BinaryOp::Rem) {
                    let nonzero = Term::binary(BinaryOp::Ne, self.term(rhs)?, Term::int(0));
                    self.discharge(
                        ObligationKind::DivisionByZero,
                        Prop::Holds(nonzero),
                        e.loc,
                        facts,
                        &ctx,
                    )?;
                    // `MIN / -1` and `MIN % -1` trap on two's complement targets.
                    if let Some(ty) = e.ty.int_type().filter(IntType::is_signed) {
                        let no_trap = Term::binary(
                            BinaryOp::Or,
                            Term::binary(BinaryOp::Ne, self.term(lhs)?, Term::int(ty.min_value())),
                            Term::binary(BinaryOp::Ne, self.term(rhs)?, Term::int(-1)),
                        );
                        self.discharge(ObligationKind::Overflow, Prop::Holds(no_trap), e.loc, facts, &ctx)?;
                    }
                }
                if op.is_shift() {
                    if let Some(ty) = e.ty.int_type() {
                        let range = Interval::point(0).hull(&Interval::point(ty.bits - 1));
                        self.discharge(
                            ObligationKind::ShiftAmount,
                            Prop::InRange {
                                term: self.term(rhs)?,
                                range,
                            },
                            e.loc,
                            facts,
                            &ctx,
                        )?;
                    }
                }
                match e.ty.int_type() {
                    Some(ty) if op.is_checked_arith() => {
                        self.discharge_fits(self.term(e)?, ty, e.loc, facts)
                    }
                    _ => Ok(()),
                }
            }
            ExprKind::Index { base, index } => {
                self.check_expr(index, facts)?;
                self.require_int(index)?;
                self.check_index(base, index, e.loc, facts)
            }
            ExprKind::Slice { base, lo, hi } => {
                for bound in lo.iter().chain(hi.iter()) {
                    self.check_expr(bound, facts)?;
                    self.require_int(bound)?;
                }
                let lo = match lo {
                    Some(lo) => self.term(lo)?,
                    None => Term::int(0),
                };
                let hi = match hi {
                    Some(hi) => self.term(hi)?,
                    None => Term::Atom(Atom::Length(base.clone())),
                };
                let len = Term::Atom(Atom::Length(base.clone()));
                for cond in [
                    Term::binary(BinaryOp::Le, Term::int(0), lo.clone()),
                    Term::binary(BinaryOp::Le, lo, hi.clone()),
                    Term::binary(BinaryOp::Le, hi, len),
                ] {
                    self.discharge(ObligationKind::SliceBounds, Prop::Holds(cond), e.loc, facts, &ctx)?;
                }
                Ok(())
            }
            ExprKind::Cast { operand, to } => {
                self.check_expr(operand, facts)?;
                self.require_int(operand)?;
                self.discharge(
                    ObligationKind::CastRange,
                    Prop::InRange {
                        term: self.term(operand)?,
                        range: to.range().clone(),
                    },
                    e.loc,
                    facts,
                    &ctx,
                )
            }
        }
    }

    fn check_index(&mut self, base: &str, index: &Expr, loc: SourceLoc, facts: &FactSet) -> CoreResult<()> {
        let ctx = self.ctx();
        let i = self.term(index)?;
        match self.type_of(base, loc)? {
            Type::Array { len, .. } => {
                let prop = match Interval::new(0, BigInt::from(*len) - 1) {
                    Some(range) => Prop::InRange { term: i, range },
                    None => Prop::Holds(Term::Bool(false)),
                };
                self.discharge(ObligationKind::IndexBounds, prop, loc, facts, &ctx)
            }
            Type::Slice { .. } => {
                let len = Term::Atom(Atom::Length(base.to_string()));
                self.discharge(
                    ObligationKind::IndexBounds,
                    Prop::Holds(Term::binary(BinaryOp::Ge, i.clone(), Term::int(0))),
                    loc,
                    facts,
                    &ctx,
                )?;
                self.discharge(
                    ObligationKind::IndexBounds,
                    Prop::Holds(Term::binary(BinaryOp::Lt, i, len)),
                    loc,
                    facts,
                    &ctx,
                )
            }
            other => Err(self.mismatch(loc, format!("`{}` of type `{}` cannot be indexed", base, other))),
        }
    }

    /// `value` must be storable in a location of type `target`.
    fn check_assignable(
        &mut self,
        target: &Type,
        value: &Expr,
        kind: ObligationKind,
        loc: SourceLoc,
        facts: &FactSet,
    ) -> CoreResult<()> {
        match (target, &value.ty) {
            (Type::Int(b), Type::Ideal) => {
                let v = self.constant_value(value)?;
                if !b.range().contains_value(&v) {
                    return Err(self.mismatch(loc, format!("constant {} does not fit in `{}`", v, b)));
                }
                Ok(())
            }
            (Type::Int(b), Type::Int(vb)) => {
                if b.ty() != vb.ty() {
                    return Err(self.mismatch(
                        loc,
                        format!("expected a value of type `{}`, found `{}`", b.ty(), vb.ty()),
                    ));
                }
                if b.range().contains(vb.range()) {
                    return Ok(());
                }
                let ctx = self.ctx();
                let prop = Prop::InRange {
                    term: self.term(value)?,
                    range: b.range().clone(),
                };
                self.discharge(kind, prop, loc, facts, &ctx)
            }
            (Type::Slice { elem }, Type::Slice { elem: e2 } | Type::Array { elem: e2, .. })
                if elem == e2 =>
            {
                Ok(())
            }
            (t, v) if t == v && !t.is_ideal() => Ok(()),
            (t, v) => Err(self.mismatch(loc, format!("expected a value of type `{}`, found `{}`", t, v))),
        }
    }

    /// Checks `op` and applies its effect to `facts`.
    pub fn check_op(&mut self, op: &Op, facts: &mut FactSet) -> CoreResult<()> {
        if facts.is_unreachable() {
            return Ok(());
        }
        for e in op.exprs() {
            if e.depth() > self.config.max_expr_depth {
                return Err(self.unsupported(
                    op.loc,
                    format!("expression nested deeper than {} levels", self.config.max_expr_depth),
                ));
            }
        }
        let ctx = self.ctx();
        match &op.kind {
            OpKind::Declare { name, ty } => {
                facts.forget(name);
                match ty {
                    Type::Int(b) => {
                        if !b.range().contains_value(&BigInt::ZERO) {
                            return Err(self.mismatch(
                                op.loc,
                                format!("`{}` of type `{}` needs an initializer", name, ty),
                            ));
                        }
                        facts.assume(
                            Fact::Range {
                                atom: Atom::var(name.clone()),
                                range: Interval::point(0),
                            },
                            &ctx,
                        );
                    }
                    Type::Bool => facts.assume(
                        Fact::Flag {
                            var: name.clone(),
                            value: false,
                        },
                        &ctx,
                    ),
                    Type::Slice { .. } => facts.assume(
                        Fact::Range {
                            atom: Atom::Length(name.clone()),
                            range: Interval::point(0),
                        },
                        &ctx,
                    ),
                    Type::Array { .. } => {}
                    Type::Ideal | Type::Reader | Type::Writer => {
                        return Err(self.unsupported(
                            op.loc,
                            format!("variables cannot have type `{}`", ty),
                        ));
                    }
                }
                Ok(())
            }
            OpKind::Assign {
                place: Place::Var(name),
                op: assign,
                value,
            } => {
                let target = self.type_of(name, op.loc)?;
                let value = self.assigned_value(Expr { kind: ExprKind::Var(name.clone()), ty: target.clone(), loc: op.loc }, *assign, value);
                self.check_expr(&value, facts)?;
                self.check_assignable(target, &value, ObligationKind::AssignmentRange, op.loc, facts)?;
                self.record_assignment(name, &value, facts);
                Ok(())
            }
            OpKind::Assign {
                place: Place::Index { base, index },
                op: assign,
                value,
            } => {
                let elem = self
                    .type_of(base, op.loc)?
                    .element()
                    .ok_or_else(|| self.mismatch(op.loc, format!("`{}` cannot be indexed", base)))?;
                self.check_expr(index, facts)?;
                self.require_int(index)?;
                self.check_index(base, index, op.loc, facts)?;
                let current = Expr {
                    kind: ExprKind::Index {
                        base: base.clone(),
                        index: Box::new(index.clone()),
                    },
                    ty: elem.clone(),
                    loc: op.loc,
                };
                let value = self.assigned_value(current, *assign, value);
                self.check_expr(&value, facts)?;
                self.check_assignable(elem, &value, ObligationKind::AssignmentRange, op.loc, facts)?;
                facts.forget_elements(base);
                Ok(())
            }
            OpKind::Assert { cond, kind, reason } => {
                self.require_bool(cond)?;
                self.check_expr(cond, facts)?;
                let kind = match kind {
                    AssertKind::User => ObligationKind::Assertion,
                    AssertKind::LoopPre => ObligationKind::LoopPrecondition,
                    AssertKind::LoopPost => ObligationKind::LoopPostcondition,
                };
                let t = self.term(cond)?;
                match reason {
                    None => self.discharge(kind, Prop::Holds(t.clone()), op.loc, facts, &ctx)?,
                    Some(reason) => self.check_reason(&t, reason, kind, op.loc, facts)?,
                }
                facts.assume_cond(&t, true, &ctx);
                if facts.is_unreachable() {
                    return Err(CoreError::InconsistentFactSet {
                        function: self.function.name.clone(),
                        loc: op.loc,
                        message: format!("`{}` was proven but contradicts the facts it was proven from", cond),
                    });
                }
                Ok(())
            }
            OpKind::Call { dest, callee, args } => self.check_call(dest.as_ref(), callee, args, op.loc, facts),
            OpKind::Read { dest, src } => {
                self.require_suspendible("read", op.loc)?;
                if !matches!(self.type_of(src, op.loc)?, Type::Reader) {
                    return Err(self.mismatch(op.loc, format!("`{}` is not a reader", src)));
                }
                match self.type_of(dest, op.loc)?.interval() {
                    Some(range) if range.contains(&byte_range()) => {}
                    _ => {
                        return Err(self.mismatch(
                            op.loc,
                            format!("`{}` cannot hold every byte value", dest),
                        ));
                    }
                }
                facts.forget(dest);
                facts.assume(
                    Fact::Range {
                        atom: Atom::var(dest.clone()),
                        range: byte_range(),
                    },
                    &ctx,
                );
                Ok(())
            }
            OpKind::Write { dst, value } => {
                self.require_suspendible("write", op.loc)?;
                if !matches!(self.type_of(dst, op.loc)?, Type::Writer) {
                    return Err(self.mismatch(op.loc, format!("`{}` is not a writer", dst)));
                }
                self.check_expr(value, facts)?;
                self.require_int(value)?;
                self.discharge(
                    ObligationKind::WriteRange,
                    Prop::InRange {
                        term: self.term(value)?,
                        range: byte_range(),
                    },
                    op.loc,
                    facts,
                    &ctx,
                )
            }
        }
    }

    fn require_suspendible(&self, what: &str, loc: SourceLoc) -> CoreResult<()> {
        if self.function.is_suspendible() {
            Ok(())
        } else {
            Err(self.unsupported(
                loc,
                format!("`{}` is only allowed in suspendible functions", what),
            ))
        }
    }

    /// Rewrites `place op= value` into the value stored.
    fn assigned_value(&self, current: Expr, op: AssignOp, value: &Expr) -> Expr {
        match op {
            AssignOp::Set => value.clone(),
            AssignOp::Update(bop) => {
                let ty = binary_result_type(bop, &current.ty, &value.ty);
                let loc = current.loc;
                Expr {
                    kind: ExprKind::Binary {
                        op: bop,
                        lhs: Box::new(current),
                        rhs: Box::new(value.clone()),
                    },
                    ty,
                    loc,
                }
            }
        }
    }

    /// Updates `facts` for `name = value`, `value` being evaluated before
    /// the store.
    fn record_assignment(&self, name: &str, value: &Expr, facts: &mut FactSet) {
        let ctx = self.ctx();
        let target = Atom::var(name);

        if let ExprKind::Slice { base, lo, hi } = &value.kind {
            let lo = lo.as_deref().and_then(Term::from_expr).unwrap_or(Term::int(0));
            let hi = hi
                .as_deref()
                .and_then(Term::from_expr)
                .unwrap_or(Term::Atom(Atom::Length(base.clone())));
            let len = Term::binary(BinaryOp::Sub, hi, lo);
            let bounds = bounds_of(&len, facts, &ctx);
            facts.forget(name);
            let atom = Atom::Length(name.to_string());
            if let Some(range) = bounds {
                facts.assume(Fact::Range { atom: atom.clone(), range }, &ctx);
            }
            if !len.mentions(name) {
                facts.assume(Fact::Equal { atom, value: len }, &ctx);
            }
            return;
        }

        let Some(t) = Term::from_expr(value) else {
            facts.forget(name);
            return;
        };

        if value.ty.is_slice() || value.ty.is_array() {
            let bounds = bounds_of(&Term::Atom(Atom::Length(value_root(value))), facts, &ctx);
            facts.forget(name);
            if let Some(range) = bounds {
                facts.assume(
                    Fact::Range {
                        atom: Atom::Length(name.to_string()),
                        range,
                    },
                    &ctx,
                );
            }
            return;
        }

        if value.ty.is_bool() {
            facts.forget(name);
            match t.const_eval() {
                Some(ConstValue::Bool(b)) => facts.assume(
                    Fact::Flag {
                        var: name.to_string(),
                        value: b,
                    },
                    &ctx,
                ),
                _ if !t.mentions(name) => facts.assume(Fact::Equal { atom: target, value: t }, &ctx),
                _ => {}
            }
            return;
        }

        // `x = x + k` keeps what is known about `x`, shifted by `k`.
        if let Some(lin) = t.linear() {
            if lin.as_offset_atom() == Some(&target) {
                if lin.constant != BigInt::ZERO {
                    facts.shift(name, &lin.constant, &ctx);
                }
                return;
            }
        }

        let bounds = bounds_of(&t, facts, &ctx);
        facts.forget(name);
        if let Some(b) = bounds {
            let range = match ctx.type_range(&target) {
                Some(ty) => b.intersect(&ty).unwrap_or(ty),
                None => b,
            };
            facts.assume(Fact::Range { atom: target.clone(), range }, &ctx);
        }
        if t.is_stable() && !t.mentions(name) {
            facts.assume(Fact::Equal { atom: target, value: t }, &ctx);
        }
    }

    fn check_reason(
        &mut self,
        cond: &Term,
        reason: &Reason,
        kind: ObligationKind,
        loc: SourceLoc,
        facts: &FactSet,
    ) -> CoreResult<()> {
        let ctx = self.ctx();
        let mut args = BTreeMap::new();
        for (name, e) in &reason.args {
            args.insert(name.clone(), self.term(e)?);
        }
        let premises = reasons::premises(&reason.rule, cond, &args)
            .map_err(|message| self.unsupported(loc, message))?;
        for premise in premises {
            self.discharge(kind, Prop::Holds(premise), loc, facts, &ctx)?;
        }
        Ok(())
    }

    /// Rewrites a callee clause in terms of the caller's arguments.
    /// Returns `None` when an argument has no term form.
    fn bind_clause(
        &self,
        sig: &Signature,
        clause: &Expr,
        args: &[Expr],
        result: Option<&str>,
    ) -> Option<Term> {
        let mut t = Term::from_expr(clause)?;
        for (i, p) in sig.params.iter().enumerate() {
            t = t.rename(&p.name, &placeholder(i));
        }
        if let Some(result) = result {
            t = t.rename(RESULT_NAME, result);
        }
        for (i, arg) in args.iter().enumerate() {
            let ph = placeholder(i);
            if let Some(v) = Term::from_expr(arg) {
                t = t.substitute(&Atom::Var(ph.clone()), &v);
            }
            let len = match &arg.kind {
                ExprKind::Var(n) => Some(Term::Atom(Atom::Length(n.clone()))),
                ExprKind::Slice { base, lo, hi } => {
                    let lo = lo.as_deref().and_then(Term::from_expr).unwrap_or(Term::int(0));
                    let hi = hi
                        .as_deref()
                        .and_then(Term::from_expr)
                        .unwrap_or(Term::Atom(Atom::Length(base.clone())));
                    Some(Term::binary(BinaryOp::Sub, hi, lo))
                }
                _ => None,
            };
            if let Some(len) = len {
                t = t.substitute(&Atom::Length(ph.clone()), &len);
            }
            if t.mentions(&ph) {
                return None;
            }
        }
        Some(t)
    }

    fn check_call(
        &mut self,
        dest: Option<&Name>,
        callee: &str,
        args: &[Expr],
        loc: SourceLoc,
        facts: &mut FactSet,
    ) -> CoreResult<()> {
        let ctx = self.ctx();
        let sig = self
            .symbols
            .get(callee)
            .ok_or_else(|| self.unsupported(loc, format!("call to undefined function `{}`", callee)))?;
        if sig.is_suspendible() && !self.function.is_suspendible() {
            return Err(self.unsupported(
                loc,
                format!(
                    "suspendible function `{}` called from non-suspendible `{}`",
                    callee, self.function.name
                ),
            ));
        }
        if args.len() != sig.params.len() {
            return Err(self.mismatch(
                loc,
                format!(
                    "`{}` takes {} arguments but {} were given",
                    callee,
                    sig.params.len(),
                    args.len()
                ),
            ));
        }
        for (arg, param) in args.iter().zip(&sig.params) {
            self.check_expr(arg, facts)?;
            self.check_assignable(&param.ty, arg, ObligationKind::ArgumentRange, loc, facts)?;
        }
        for pre in &sig.preconditions {
            let Some(t) = self.bind_clause(sig, pre, args, None) else {
                return Err(self.unsupported(
                    loc,
                    format!("precondition `{}` of `{}` cannot be stated at the call site", pre, callee),
                ));
            };
            self.discharge(ObligationKind::CalleePrecondition, Prop::Holds(t), loc, facts, &ctx)?;
        }

        // The callee may store into sequences it was handed.
        for arg in args {
            if arg.ty.is_sequence() {
                facts.forget_elements(&value_root(arg));
            }
        }

        let Some(dest) = dest else {
            return Ok(());
        };
        let Some(ret) = &sig.ret else {
            return Err(self.mismatch(loc, format!("`{}` does not return a value", callee)));
        };
        let target = self.type_of(dest, loc)?;
        let compatible = match (target, ret) {
            (Type::Int(t), Type::Int(r)) => t.ty() == r.ty() && t.range().contains(r.range()),
            (t, r) => t == r,
        };
        if !compatible {
            return Err(self.mismatch(
                loc,
                format!("`{}` returns `{}`, which does not fit `{}` of type `{}`", callee, ret, dest, target),
            ));
        }
        facts.forget(dest);
        if let Some(range) = ret.interval() {
            facts.assume(
                Fact::Range {
                    atom: Atom::var(dest.clone()),
                    range: range.clone(),
                },
                &ctx,
            );
        }
        if args.iter().any(|a| a.mentions(dest)) {
            return Ok(());
        }
        for post in &sig.postconditions {
            if let Some(t) = self.bind_clause(sig, post, args, Some(dest)) {
                facts.assume_cond(&t, true, &ctx);
            }
        }
        Ok(())
    }

    /// Emits the obligations of a branch condition.
    pub fn check_branch(&mut self, cond: &Expr, facts: &FactSet) -> CoreResult<()> {
        self.require_bool(cond)?;
        self.check_expr(cond, facts)
    }

    /// Emits the obligations of leaving the function through `return`.
    pub fn check_return(&mut self, value: Option<&Expr>, loc: SourceLoc, facts: &FactSet) -> CoreResult<()> {
        if facts.is_unreachable() {
            return Ok(());
        }
        let ret = self.function.ret.as_ref();
        match (value, ret) {
            (Some(_), None) => {
                return Err(self.mismatch(loc, format!("`{}` does not return a value", self.function.name)));
            }
            (None, Some(ty)) => {
                return Err(self.mismatch(
                    loc,
                    format!("`{}` must return a value of type `{}`", self.function.name, ty),
                ));
            }
            (Some(v), Some(ty)) => {
                self.check_expr(v, facts)?;
                self.check_assignable(ty, v, ObligationKind::ReturnRange, loc, facts)?;
            }
            (None, None) => {}
        }
        if self.function.postconditions.is_empty() {
            return Ok(());
        }

        let post_ctx = Context::new(self.post_scope, self.config);
        let mut state = facts.clone();
        if let Some(t) = value.and_then(Term::from_expr) {
            let result = Atom::var(RESULT_NAME);
            if let Some(range) = bounds_of(&t, &state, &post_ctx) {
                state.assume(Fact::Range { atom: result.clone(), range }, &post_ctx);
            }
            if post_ctx.is_bool(&t) {
                state.assume_cond(
                    &Term::binary(BinaryOp::Eq, Term::Atom(result), t),
                    true,
                    &post_ctx,
                );
            } else {
                state.assume(Fact::Equal { atom: result, value: t }, &post_ctx);
            }
        }
        for post in &self.function.postconditions {
            let t = self.term(post)?;
            self.discharge(ObligationKind::Postcondition, Prop::Holds(t), loc, &state, &post_ctx)?;
        }
        Ok(())
    }

    /// Proves a loop invariant on one incoming edge.
    pub fn check_invariant(
        &mut self,
        inv: &Expr,
        kind: ObligationKind,
        loc: SourceLoc,
        facts: &FactSet,
    ) -> CoreResult<()> {
        if facts.is_unreachable() {
            return Ok(());
        }
        self.require_bool(inv)?;
        self.check_expr(inv, facts)?;
        let ctx = self.ctx();
        let t = self.term(inv)?;
        self.discharge(kind, Prop::Holds(t), loc, facts, &ctx)
    }
}

/// Name of the sequence a sequence-typed expression refers to.
fn value_root(e: &Expr) -> Name {
    match &e.kind {
        ExprKind::Var(n) | ExprKind::Slice { base: n, .. } => n.clone(),
        _ => String::new(),
    }
}
