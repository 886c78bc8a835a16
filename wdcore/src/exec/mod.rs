//! Reference executor.
//!
//! Interprets compiled functions, lowered state machines included, over
//! caller-owned [`Continuation`] records and caller-provided fixed-size
//! buffers. Every operation the checker proves safe is checked again at run
//! time and reported as an [`ExecFault`] if violated, which makes the
//! executor an oracle for the soundness of the analysis.
use std::collections::BTreeMap;

use num_bigint::BigInt;
use strum::EnumIs;
use thiserror::Error;
use wdinstr::{
    modules::{
        Function,
        block::{AssertKind, Cfg, Op, OpKind},
        instructions::Place,
        int::{AssignOp, BinaryOp, UnaryOp},
        operand::{Expr, ExprKind, Name, SourceLoc},
        scope::Scope,
        terminator::Terminator,
        RESULT_NAME,
    },
    types::{IntType, Type},
};

use crate::{
    compiler::CompileOutput,
    facts::{ConstValue, term::eval_int_op},
    magic::{BYTE_MAX, BYTE_MIN, STATUS_INTERLEAVED_CALLS, STATUS_UNEXPECTED_EOF},
    prover::obligation::ObligationKind,
    suspend::Checkpoint,
};

/// Default bound on the number of executed operations per top-level call.
pub const DEFAULT_STEP_LIMIT: u64 = 1 << 24;

#[derive(Debug, Clone, PartialEq, Eq, EnumIs)]
pub enum Value {
    Int(BigInt),
    Bool(bool),
    /// Array or slice contents. Slices are copied, not shared.
    Seq(Vec<Value>),
    Reader,
    Writer,
}

impl Value {
    pub fn int(v: impl Into<BigInt>) -> Self {
        Value::Int(v.into())
    }

    pub fn bytes(data: &[u8]) -> Self {
        Value::Seq(data.iter().map(|b| Value::int(*b)).collect())
    }

    /// Value of a variable declared without initializer.
    pub fn zero(ty: &Type) -> Self {
        match ty {
            Type::Bool => Value::Bool(false),
            Type::Ideal | Type::Int(_) => Value::Int(BigInt::ZERO),
            Type::Array { elem, len } => {
                Value::Seq((0..*len).map(|_| Value::zero(elem)).collect())
            }
            Type::Slice { .. } => Value::Seq(Vec::new()),
            Type::Reader => Value::Reader,
            Type::Writer => Value::Writer,
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Seq(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Reader => write!(f, "reader"),
            Value::Writer => write!(f, "writer"),
        }
    }
}

/// Outcome of one call or resumption.
#[derive(Debug, Clone, PartialEq, Eq, EnumIs)]
pub enum Status {
    Completed(Option<Value>),
    NeedsMoreInput,
    NeedsMoreOutput,
    Failed(String),
}

impl Status {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Status::NeedsMoreInput | Status::NeedsMoreOutput)
    }
}

/// Bytes available to `read`. Closing it turns an empty buffer into an
/// end of input instead of a suspension.
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    data: Vec<u8>,
    pos: usize,
    closed: bool,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A closed buffer holding exactly `data`.
    pub fn complete(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
            closed: true,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.drain(..self.pos);
        self.pos = 0;
        self.data.extend_from_slice(bytes);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn pop(&mut self) -> Option<u8> {
        let b = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(b)
    }
}

/// Fixed-capacity sink for `write`.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    capacity: usize,
    data: Vec<u8>,
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn is_full(&self) -> bool {
        self.data.len() >= self.capacity
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Drains the written bytes, making room for more.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }
}

/// Buffers shared by every reader and writer parameter of a call.
#[derive(Debug, Clone, Default)]
pub struct Io {
    pub input: InputBuffer,
    pub output: OutputBuffer,
}

impl Io {
    pub fn new(input: InputBuffer, output: OutputBuffer) -> Self {
        Self { input, output }
    }
}

/// Caller-owned state of a suspended call.
///
/// A fresh record starts the function from the top. After a suspension it
/// holds the checkpoint label, the saved locals, the arguments of the
/// initial call and, for a nested suspendible call, the callee's record.
/// Dropping the record cancels the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Continuation {
    function: Option<String>,
    label: u32,
    args: Vec<Value>,
    locals: BTreeMap<Name, Value>,
    child: Option<Box<Continuation>>,
    failure: Option<String>,
}

impl Continuation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&self) -> u32 {
        self.label
    }

    pub fn is_suspended(&self) -> bool {
        self.label != 0
    }

    /// Status every further resumption reports, once the call failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn saved(&self) -> &BTreeMap<Name, Value> {
        &self.locals
    }

    /// Number of records in the chain, this one included.
    pub fn depth(&self) -> usize {
        1 + self.child.as_ref().map_or(0, |c| c.depth())
    }

    fn fail(&mut self, status: &str) -> Status {
        self.failure = Some(status.to_string());
        self.label = 0;
        self.locals.clear();
        self.child = None;
        Status::Failed(status.to_string())
    }

    fn finish(&mut self) {
        self.function = None;
        self.label = 0;
        self.args.clear();
        self.locals.clear();
        self.child = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, EnumIs)]
pub enum ExecFault {
    /// A check the analysis should have proven failed at run time.
    #[error("{loc}: {kind} violated in `{function}`: {message}")]
    Violation {
        function: String,
        loc: SourceLoc,
        kind: ObligationKind,
        message: String,
    },

    #[error("call to unknown or rejected function `{0}`")]
    UndefinedFunction(String),

    #[error("`{function}` takes {expected} arguments but {found} were given")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },

    /// The program or the record is not in a shape the executor can run.
    #[error("{loc}: malformed execution of `{function}`: {message}")]
    Malformed {
        function: String,
        loc: SourceLoc,
        message: String,
    },

    #[error("execution exceeded {0} steps")]
    StepLimit(u64),
}

#[derive(Clone, Copy)]
struct Program<'a> {
    function: &'a Function,
    scope: &'a Scope,
    cfg: &'a Cfg,
    checkpoints: &'a [Checkpoint],
}

impl<'a> Program<'a> {
    fn type_of(&self, name: &str) -> Option<&'a Type> {
        self.scope.type_of(name)
    }
}

enum Flow {
    Next,
    Suspend(Status),
    Fail(String),
}

type Env = BTreeMap<Name, Value>;

/// Interpreter over the functions of a compiled unit.
pub struct Machine<'a> {
    programs: BTreeMap<&'a str, Program<'a>>,
    step_limit: u64,
    steps: u64,
}

impl<'a> Machine<'a> {
    /// Loads every function that compiled without diagnostics. Suspendible
    /// functions run in their lowered form.
    pub fn new(output: &'a CompileOutput) -> Self {
        let programs = output
            .functions
            .iter()
            .map(|f| {
                let program = match &f.lowered {
                    Some(lowered) => Program {
                        function: &f.function,
                        scope: &f.analysis.scope,
                        cfg: &lowered.cfg,
                        checkpoints: &lowered.checkpoints,
                    },
                    None => Program {
                        function: &f.function,
                        scope: &f.analysis.scope,
                        cfg: &f.analysis.cfg,
                        checkpoints: &[],
                    },
                };
                (f.function.name.as_str(), program)
            })
            .collect();
        Self {
            programs,
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Runs a function to completion with no input and no room for output.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Status, ExecFault> {
        let mut io = Io::default();
        io.input.close();
        self.resume(name, args, &mut Continuation::new(), &mut io)
    }

    /// Starts or resumes `name` with the state held by `cont`.
    ///
    /// `args` are only read when the record is fresh; a resumed call keeps
    /// the arguments it was started with.
    pub fn resume(
        &mut self,
        name: &str,
        args: Vec<Value>,
        cont: &mut Continuation,
        io: &mut Io,
    ) -> Result<Status, ExecFault> {
        self.steps = 0;
        self.run(name, args, cont, io)
    }

    fn step(&mut self) -> Result<(), ExecFault> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(ExecFault::StepLimit(self.step_limit));
        }
        Ok(())
    }

    fn run(
        &mut self,
        name: &str,
        args: Vec<Value>,
        cont: &mut Continuation,
        io: &mut Io,
    ) -> Result<Status, ExecFault> {
        if let Some(status) = &cont.failure {
            return Ok(Status::Failed(status.clone()));
        }
        let program = *self
            .programs
            .get(name)
            .ok_or_else(|| ExecFault::UndefinedFunction(name.to_string()))?;
        let function = program.function;

        let mut env = Env::new();
        if cont.label == 0 {
            if args.len() != function.params.len() {
                return Err(ExecFault::Arity {
                    function: name.to_string(),
                    expected: function.params.len(),
                    found: args.len(),
                });
            }
            for (param, arg) in function.params.iter().zip(&args) {
                if let (Some(range), Value::Int(v)) = (param.ty.interval(), arg) {
                    if !range.contains_value(v) {
                        return Err(violation(
                            function,
                            function.loc,
                            ObligationKind::ArgumentRange,
                            format!("`{}` = {} is outside {}", param.name, v, range),
                        ));
                    }
                }
                env.insert(param.name.clone(), arg.clone());
            }
            for pre in &function.preconditions {
                if !self.eval_bool(function, pre, &env)? {
                    return Err(violation(
                        function,
                        pre.loc,
                        ObligationKind::CalleePrecondition,
                        format!("`{}` does not hold", pre),
                    ));
                }
            }
            cont.function = Some(name.to_string());
            cont.args = args;
        } else {
            if cont.function.as_deref() != Some(name) {
                return Ok(cont.fail(STATUS_INTERLEAVED_CALLS));
            }
            for (param, arg) in function.params.iter().zip(&cont.args) {
                env.insert(param.name.clone(), arg.clone());
            }
            env.extend(std::mem::take(&mut cont.locals));
        }

        let mut block = program.cfg.entry;
        loop {
            let b = program.cfg.block(block);
            if let Some(header) = &b.header {
                for inv in &header.invariants {
                    if !self.eval_bool(function, inv, &env)? {
                        return Err(violation(
                            function,
                            header.loc,
                            ObligationKind::LoopInvariantPreserved,
                            format!("`{}` does not hold", inv),
                        ));
                    }
                }
            }
            for op in &b.ops {
                self.step()?;
                match self.exec_op(program, op, &mut env, cont, io)? {
                    Flow::Next => {}
                    Flow::Suspend(status) => {
                        self.suspend(program, op, &env, cont)?;
                        return Ok(status);
                    }
                    Flow::Fail(status) => return Ok(cont.fail(&status)),
                }
            }
            self.step()?;
            block = match &b.terminator {
                Terminator::Jump { target } => *target,
                Terminator::Branch {
                    cond,
                    then_target,
                    else_target,
                } => {
                    if self.eval_bool(function, cond, &env)? {
                        *then_target
                    } else {
                        *else_target
                    }
                }
                Terminator::Return { value } => {
                    let value = match value {
                        Some(v) => Some(self.eval(function, v, &env)?),
                        None => None,
                    };
                    self.check_return(function, b.term_loc, value.as_ref(), &mut env)?;
                    cont.finish();
                    return Ok(Status::Completed(value));
                }
                Terminator::Fail { status } => return Ok(cont.fail(status)),
                Terminator::Dispatch { entry, resumes } => {
                    let label = std::mem::take(&mut cont.label);
                    if label == 0 {
                        *entry
                    } else {
                        resumes
                            .iter()
                            .find(|(l, _)| *l == label)
                            .map(|(_, b)| *b)
                            .ok_or_else(|| {
                                malformed(function, b.term_loc, format!("no resume point for label {}", label))
                            })?
                    }
                }
            };
        }
    }

    fn suspend(
        &self,
        program: Program<'_>,
        op: &Op,
        env: &Env,
        cont: &mut Continuation,
    ) -> Result<(), ExecFault> {
        let function = program.function;
        let checkpoint = op
            .checkpoint
            .and_then(|label| program.checkpoints.iter().find(|c| c.label == label))
            .ok_or_else(|| malformed(function, op.loc, "suspension outside of a checkpoint"))?;
        cont.label = checkpoint.label;
        cont.locals = checkpoint
            .saved
            .iter()
            .filter_map(|(name, _)| env.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        Ok(())
    }

    fn check_return(
        &self,
        function: &Function,
        loc: SourceLoc,
        value: Option<&Value>,
        env: &mut Env,
    ) -> Result<(), ExecFault> {
        if let (Some(Value::Int(v)), Some(range)) = (value, function.ret.as_ref().and_then(Type::interval)) {
            if !range.contains_value(v) {
                return Err(violation(
                    function,
                    loc,
                    ObligationKind::ReturnRange,
                    format!("returned {} outside {}", v, range),
                ));
            }
        }
        if let Some(v) = value {
            env.insert(RESULT_NAME.to_string(), v.clone());
        }
        for post in &function.postconditions {
            if !self.eval_bool(function, post, env)? {
                return Err(violation(
                    function,
                    loc,
                    ObligationKind::Postcondition,
                    format!("`{}` does not hold", post),
                ));
            }
        }
        Ok(())
    }

    fn exec_op(
        &mut self,
        program: Program<'_>,
        op: &Op,
        env: &mut Env,
        cont: &mut Continuation,
        io: &mut Io,
    ) -> Result<Flow, ExecFault> {
        let function = program.function;
        match &op.kind {
            OpKind::Declare { name, ty } => {
                env.insert(name.clone(), Value::zero(ty));
            }
            OpKind::Assign {
                place: Place::Var(name),
                op: assign,
                value,
            } => {
                let new = match assign {
                    AssignOp::Set => self.eval(function, value, env)?,
                    AssignOp::Update(bop) => {
                        let current = lookup(function, env, name, op.loc)?.clone();
                        let rhs = self.eval(function, value, env)?;
                        let ty = program.type_of(name);
                        self.binary(function, *bop, current, rhs, ty.and_then(|t| t.int_type()), op.loc)?
                    }
                };
                let ty = program.type_of(name);
                check_fits(function, ty, &new, op.loc)?;
                env.insert(name.clone(), new);
            }
            OpKind::Assign {
                place: Place::Index { base, index },
                op: assign,
                value,
            } => {
                let i = self.eval_int(function, index, env)?;
                let len = match lookup(function, env, base, op.loc)? {
                    Value::Seq(items) => items.len(),
                    _ => return Err(malformed(function, op.loc, format!("`{}` is not a sequence", base))),
                };
                let slot = checked_index(function, &i, len, op.loc)?;
                let rhs = self.eval(function, value, env)?;
                let elem_ty = program.type_of(base).and_then(Type::element);
                let new = match assign {
                    AssignOp::Set => rhs,
                    AssignOp::Update(bop) => {
                        let current = match lookup(function, env, base, op.loc)? {
                            Value::Seq(items) => items[slot].clone(),
                            _ => return Err(malformed(function, op.loc, "not a sequence")),
                        };
                        self.binary(function, *bop, current, rhs, elem_ty.and_then(|t| t.int_type()), op.loc)?
                    }
                };
                check_fits(function, elem_ty, &new, op.loc)?;
                if let Some(Value::Seq(items)) = env.get_mut(base) {
                    items[slot] = new;
                }
            }
            OpKind::Assert { cond, kind, .. } => {
                if !self.eval_bool(function, cond, env)? {
                    let kind = match kind {
                        AssertKind::User => ObligationKind::Assertion,
                        AssertKind::LoopPre => ObligationKind::LoopPrecondition,
                        AssertKind::LoopPost => ObligationKind::LoopPostcondition,
                    };
                    return Err(violation(function, op.loc, kind, format!("`{}` does not hold", cond)));
                }
            }
            OpKind::Call { dest, callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(function, a, env)?);
                }
                let status = if op.checkpoint.is_some() {
                    let child = cont.child.get_or_insert_with(Default::default);
                    self.run(callee, values, child, io)?
                } else {
                    let mut fresh = Continuation::new();
                    let status = self.run(callee, values, &mut fresh, io)?;
                    if status.is_suspended() {
                        return Err(malformed(
                            function,
                            op.loc,
                            format!("`{}` suspended outside of a checkpoint", callee),
                        ));
                    }
                    status
                };
                match status {
                    Status::Completed(value) => {
                        cont.child = None;
                        if let Some(dest) = dest {
                            let value = value.ok_or_else(|| {
                                malformed(function, op.loc, format!("`{}` returned nothing", callee))
                            })?;
                            check_fits(function, program.type_of(dest), &value, op.loc)?;
                            env.insert(dest.clone(), value);
                        }
                    }
                    Status::Failed(s) => return Ok(Flow::Fail(s)),
                    suspended => return Ok(Flow::Suspend(suspended)),
                }
            }
            OpKind::Read { dest, .. } => match io.input.pop() {
                Some(b) => {
                    env.insert(dest.clone(), Value::int(b));
                }
                None if io.input.is_closed() => return Ok(Flow::Fail(STATUS_UNEXPECTED_EOF.to_string())),
                None => return Ok(Flow::Suspend(Status::NeedsMoreInput)),
            },
            OpKind::Write { value, .. } => {
                let v = self.eval_int(function, value, env)?;
                if v < BigInt::from(BYTE_MIN) || v > BigInt::from(BYTE_MAX) {
                    return Err(violation(
                        function,
                        op.loc,
                        ObligationKind::WriteRange,
                        format!("{} is not a byte", v),
                    ));
                }
                if io.output.is_full() {
                    return Ok(Flow::Suspend(Status::NeedsMoreOutput));
                }
                let byte = u8::try_from(&v).map_err(|_| malformed(function, op.loc, "byte conversion"))?;
                io.output.data.push(byte);
            }
        }
        Ok(Flow::Next)
    }

    fn eval_bool(&self, function: &Function, e: &Expr, env: &Env) -> Result<bool, ExecFault> {
        self.eval(function, e, env)?
            .as_bool()
            .ok_or_else(|| malformed(function, e.loc, format!("`{}` is not a boolean", e)))
    }

    fn eval_int(&self, function: &Function, e: &Expr, env: &Env) -> Result<BigInt, ExecFault> {
        match self.eval(function, e, env)? {
            Value::Int(v) => Ok(v),
            _ => Err(malformed(function, e.loc, format!("`{}` is not an integer", e))),
        }
    }

    fn eval(&self, function: &Function, e: &Expr, env: &Env) -> Result<Value, ExecFault> {
        match &e.kind {
            ExprKind::Const(v) => Ok(Value::Int(v.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Var(n) => lookup(function, env, n, e.loc).cloned(),
            ExprKind::Length(n) => match lookup(function, env, n, e.loc)? {
                Value::Seq(items) => Ok(Value::int(items.len())),
                _ => Err(malformed(function, e.loc, format!("`{}` has no length", n))),
            },
            ExprKind::Unary { op, operand } => {
                let v = self.eval(function, operand, env)?;
                match (op, v) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Int(v)) => {
                        let r = -v;
                        if let Some(ty) = e.ty.int_type() {
                            check_arith(function, ty, &r, e.loc)?;
                        }
                        Ok(Value::Int(r))
                    }
                    _ => Err(malformed(function, e.loc, format!("bad operand for `{}`", op.to_str()))),
                }
            }
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => {
                Ok(Value::Bool(self.eval_bool(function, lhs, env)? && self.eval_bool(function, rhs, env)?))
            }
            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => {
                Ok(Value::Bool(self.eval_bool(function, lhs, env)? || self.eval_bool(function, rhs, env)?))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval(function, lhs, env)?;
                let r = self.eval(function, rhs, env)?;
                self.binary(function, *op, l, r, e.ty.int_type(), e.loc)
            }
            ExprKind::Index { base, index } => {
                let i = self.eval_int(function, index, env)?;
                match lookup(function, env, base, e.loc)? {
                    Value::Seq(items) => {
                        let slot = checked_index(function, &i, items.len(), e.loc)?;
                        Ok(items[slot].clone())
                    }
                    _ => Err(malformed(function, e.loc, format!("`{}` is not a sequence", base))),
                }
            }
            ExprKind::Slice { base, lo, hi } => {
                let Value::Seq(items) = lookup(function, env, base, e.loc)? else {
                    return Err(malformed(function, e.loc, format!("`{}` is not a sequence", base)));
                };
                let lo = match lo {
                    Some(lo) => self.eval_int(function, lo, env)?,
                    None => BigInt::ZERO,
                };
                let hi = match hi {
                    Some(hi) => self.eval_int(function, hi, env)?,
                    None => BigInt::from(items.len()),
                };
                let in_bounds = BigInt::ZERO <= lo && lo <= hi && hi <= BigInt::from(items.len());
                let (Some(lo), Some(hi)) = (
                    usize::try_from(&lo).ok().filter(|_| in_bounds),
                    usize::try_from(&hi).ok().filter(|_| in_bounds),
                ) else {
                    return Err(violation(
                        function,
                        e.loc,
                        ObligationKind::SliceBounds,
                        format!("[{}..{}] of a sequence of length {}", lo, hi, items.len()),
                    ));
                };
                Ok(Value::Seq(items[lo..hi].to_vec()))
            }
            ExprKind::Cast { operand, to } => {
                let v = self.eval_int(function, operand, env)?;
                if !to.range().contains_value(&v) {
                    return Err(violation(
                        function,
                        e.loc,
                        ObligationKind::CastRange,
                        format!("{} does not fit `{}`", v, to),
                    ));
                }
                Ok(Value::Int(v))
            }
        }
    }

    /// Applies a non-short-circuit binary operator; `ty` is the type of the
    /// result, `None` for untyped constants.
    fn binary(
        &self,
        function: &Function,
        op: BinaryOp,
        l: Value,
        r: Value,
        ty: Option<IntType>,
        loc: SourceLoc,
    ) -> Result<Value, ExecFault> {
        match (l, r) {
            (Value::Bool(a), Value::Bool(b)) => match op {
                BinaryOp::Eq => Ok(Value::Bool(a == b)),
                BinaryOp::Ne => Ok(Value::Bool(a != b)),
                BinaryOp::And => Ok(Value::Bool(a && b)),
                BinaryOp::Or => Ok(Value::Bool(a || b)),
                _ => Err(malformed(function, loc, format!("`{}` on booleans", op.to_str()))),
            },
            (Value::Int(a), Value::Int(b)) => {
                if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == BigInt::ZERO {
                    return Err(violation(
                        function,
                        loc,
                        ObligationKind::DivisionByZero,
                        format!("{} {} 0", a, op.to_str()),
                    ));
                }
                if let Some(ty) = ty {
                    if matches!(op, BinaryOp::Div | BinaryOp::Rem)
                        && ty.is_signed()
                        && a == ty.min_value()
                        && b == BigInt::from(-1)
                    {
                        return Err(violation(
                            function,
                            loc,
                            ObligationKind::Overflow,
                            format!("{} {} -1 on `{}`", a, op.to_str(), ty),
                        ));
                    }
                }
                if op.is_shift() {
                    if let Some(ty) = ty {
                        if b < BigInt::ZERO || b >= BigInt::from(ty.bits) {
                            return Err(violation(
                                function,
                                loc,
                                ObligationKind::ShiftAmount,
                                format!("shift by {} on `{}`", b, ty),
                            ));
                        }
                    }
                }
                match eval_int_op(op, &a, &b) {
                    Some(ConstValue::Bool(v)) => Ok(Value::Bool(v)),
                    Some(ConstValue::Int(v)) => {
                        let v = match ty {
                            Some(ty) if op.is_wrapping() => ty.wrap(&v),
                            Some(ty) if op.is_checked_arith() => {
                                check_arith(function, ty, &v, loc)?;
                                v
                            }
                            _ => v,
                        };
                        Ok(Value::Int(v))
                    }
                    None => Err(malformed(function, loc, format!("cannot evaluate {} {} {}", a, op.to_str(), b))),
                }
            }
            _ => Err(malformed(function, loc, format!("mismatched operands for `{}`", op.to_str()))),
        }
    }
}

fn violation(function: &Function, loc: SourceLoc, kind: ObligationKind, message: String) -> ExecFault {
    ExecFault::Violation {
        function: function.name.clone(),
        loc,
        kind,
        message,
    }
}

fn malformed(function: &Function, loc: SourceLoc, message: impl Into<String>) -> ExecFault {
    ExecFault::Malformed {
        function: function.name.clone(),
        loc,
        message: message.into(),
    }
}

fn lookup<'e>(function: &Function, env: &'e Env, name: &str, loc: SourceLoc) -> Result<&'e Value, ExecFault> {
    env.get(name)
        .ok_or_else(|| malformed(function, loc, format!("`{}` has no value", name)))
}

fn check_arith(function: &Function, ty: IntType, v: &BigInt, loc: SourceLoc) -> Result<(), ExecFault> {
    let range = ty.full_range();
    if range.contains_value(v) {
        return Ok(());
    }
    let kind = if v < range.lo() {
        ObligationKind::Underflow
    } else {
        ObligationKind::Overflow
    };
    Err(violation(function, loc, kind, format!("{} does not fit `{}`", v, ty)))
}

fn check_fits(function: &Function, ty: Option<&Type>, value: &Value, loc: SourceLoc) -> Result<(), ExecFault> {
    if let (Some(range), Value::Int(v)) = (ty.and_then(Type::interval), value) {
        if !range.contains_value(v) {
            return Err(violation(
                function,
                loc,
                ObligationKind::AssignmentRange,
                format!("{} does not fit {}", v, range),
            ));
        }
    }
    Ok(())
}

fn checked_index(function: &Function, i: &BigInt, len: usize, loc: SourceLoc) -> Result<usize, ExecFault> {
    usize::try_from(i)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| {
            violation(
                function,
                loc,
                ObligationKind::IndexBounds,
                format!("index {} of a sequence of length {}", i, len),
            )
        })
}
