//! Programmatic construction of functions.
//!
//! ```rust
//! # use wdinstr::modules::{builder::FunctionBuilder, operand::var};
//! # use wdinstr::types::Type;
//! let f = FunctionBuilder::new("dec")
//!     .param("n", Type::u32())
//!     .returns(Type::u32())
//!     .requires(var("n").ge(1))
//!     .body(|b| {
//!         b.var_init("x", Type::u32(), var("n"));
//!         b.assign("x", var("x") - 1);
//!         b.ret_value(var("x"));
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(f.body.len(), 3);
//! ```
//!
//! Every statement is attributed to its own line, starting right after the
//! function header, so diagnostics point at distinct locations.
use crate::{
    modules::{
        Function, FunctionFlags, Param,
        instructions::{JumpKind, Place, Reason, Stmt, StmtKind},
        int::{AssignOp, BinaryOp},
        operand::{Expr, Name, SourceLoc},
    },
    types::Type,
    utils::Error,
};

const STMT_COLUMN: u32 = 5;

pub struct FunctionBuilder {
    function: Function,
    line: u32,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::at_line(name, 1)
    }

    /// Builder whose header sits at `line`.
    pub fn at_line(name: impl Into<String>, line: u32) -> Self {
        Self {
            function: Function {
                name: name.into(),
                params: Vec::new(),
                ret: None,
                preconditions: Vec::new(),
                postconditions: Vec::new(),
                flags: FunctionFlags::empty(),
                body: Vec::new(),
                loc: SourceLoc::new(line, 1),
            },
            line,
        }
    }

    pub fn param(mut self, name: impl Into<Name>, ty: Type) -> Self {
        self.function.params.push(Param {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn returns(mut self, ty: Type) -> Self {
        self.function.ret = Some(ty);
        self
    }

    pub fn requires(mut self, cond: impl Into<Expr>) -> Self {
        self.function.preconditions.push(cond.into());
        self
    }

    pub fn ensures(mut self, cond: impl Into<Expr>) -> Self {
        self.function.postconditions.push(cond.into());
        self
    }

    pub fn suspendible(mut self) -> Self {
        self.function.flags |= FunctionFlags::SUSPENDIBLE;
        self
    }

    pub fn public(mut self) -> Self {
        self.function.flags |= FunctionFlags::PUBLIC;
        self
    }

    pub fn body(mut self, f: impl FnOnce(&mut BodyBuilder<'_>)) -> Self {
        let mut body = BodyBuilder {
            stmts: std::mem::take(&mut self.function.body),
            line: &mut self.line,
        };
        f(&mut body);
        self.function.body = body.stmts;
        self
    }

    /// Finishes the function and annotates it (see [`Function::annotate`]).
    pub fn build(self) -> Result<Function, Error> {
        let mut function = self.function;
        function.annotate()?;
        Ok(function)
    }

    /// Finishes the function without resolving names or types.
    pub fn build_raw(self) -> Function {
        self.function
    }
}

/// Clauses of a `while` loop.
#[derive(Debug, Default, Clone)]
pub struct LoopClauses {
    pub label: Option<Name>,
    pub pre: Vec<Expr>,
    pub inv: Vec<Expr>,
    pub post: Vec<Expr>,
}

impl LoopClauses {
    pub fn label(mut self, label: impl Into<Name>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn pre(mut self, cond: impl Into<Expr>) -> Self {
        self.pre.push(cond.into());
        self
    }

    pub fn inv(mut self, cond: impl Into<Expr>) -> Self {
        self.inv.push(cond.into());
        self
    }

    pub fn post(mut self, cond: impl Into<Expr>) -> Self {
        self.post.push(cond.into());
        self
    }
}

pub struct BodyBuilder<'a> {
    stmts: Vec<Stmt>,
    line: &'a mut u32,
}

impl BodyBuilder<'_> {
    fn next_loc(&mut self) -> SourceLoc {
        *self.line += 1;
        SourceLoc::new(*self.line, STMT_COLUMN)
    }

    fn push(&mut self, kind: StmtKind) -> &mut Self {
        let loc = self.next_loc();
        self.stmts.push(Stmt::new(kind, loc));
        self
    }

    fn nested(&mut self, f: impl FnOnce(&mut BodyBuilder<'_>)) -> Vec<Stmt> {
        let mut child = BodyBuilder {
            stmts: Vec::new(),
            line: &mut *self.line,
        };
        f(&mut child);
        child.stmts
    }

    /// Location of the next statement.
    pub fn peek_loc(&self) -> SourceLoc {
        SourceLoc::new(*self.line + 1, STMT_COLUMN)
    }

    pub fn var(&mut self, name: impl Into<Name>, ty: Type) -> &mut Self {
        self.push(StmtKind::Var {
            name: name.into(),
            ty,
            init: None,
        })
    }

    pub fn var_init(&mut self, name: impl Into<Name>, ty: Type, init: impl Into<Expr>) -> &mut Self {
        self.push(StmtKind::Var {
            name: name.into(),
            ty,
            init: Some(init.into()),
        })
    }

    pub fn assign(&mut self, name: impl Into<Name>, value: impl Into<Expr>) -> &mut Self {
        self.push(StmtKind::Assign {
            place: Place::Var(name.into()),
            op: AssignOp::Set,
            value: value.into(),
        })
    }

    /// Compound assignment `name op= value`.
    pub fn assign_op(
        &mut self,
        name: impl Into<Name>,
        op: BinaryOp,
        value: impl Into<Expr>,
    ) -> &mut Self {
        self.push(StmtKind::Assign {
            place: Place::Var(name.into()),
            op: AssignOp::Update(op),
            value: value.into(),
        })
    }

    pub fn assign_index(
        &mut self,
        base: impl Into<Name>,
        index: impl Into<Expr>,
        value: impl Into<Expr>,
    ) -> &mut Self {
        self.push(StmtKind::Assign {
            place: Place::Index {
                base: base.into(),
                index: index.into(),
            },
            op: AssignOp::Set,
            value: value.into(),
        })
    }

    pub fn assert(&mut self, cond: impl Into<Expr>) -> &mut Self {
        self.push(StmtKind::Assert {
            cond: cond.into(),
            reason: None,
        })
    }

    /// `assert cond via "rule"(args)`.
    pub fn assert_via(
        &mut self,
        cond: impl Into<Expr>,
        rule: impl Into<String>,
        args: Vec<(&str, Expr)>,
    ) -> &mut Self {
        self.push(StmtKind::Assert {
            cond: cond.into(),
            reason: Some(Reason {
                rule: rule.into(),
                args: args.into_iter().map(|(n, e)| (n.to_string(), e)).collect(),
            }),
        })
    }

    pub fn if_(
        &mut self,
        cond: impl Into<Expr>,
        then: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        self.if_else(cond, then, |_| {})
    }

    pub fn if_else(
        &mut self,
        cond: impl Into<Expr>,
        then: impl FnOnce(&mut BodyBuilder<'_>),
        otherwise: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let loc = self.next_loc();
        let then_body = self.nested(then);
        let else_body = self.nested(otherwise);
        self.stmts.push(Stmt::new(
            StmtKind::If {
                cond: cond.into(),
                then_body,
                else_body,
            },
            loc,
        ));
        self
    }

    pub fn while_(
        &mut self,
        cond: impl Into<Expr>,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        self.loop_(LoopClauses::default(), cond, body)
    }

    pub fn loop_(
        &mut self,
        clauses: LoopClauses,
        cond: impl Into<Expr>,
        body: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> &mut Self {
        let loc = self.next_loc();
        let body = self.nested(body);
        self.stmts.push(Stmt::new(
            StmtKind::While {
                label: clauses.label,
                cond: cond.into(),
                pre: clauses.pre,
                inv: clauses.inv,
                post: clauses.post,
                body,
            },
            loc,
        ));
        self
    }

    pub fn break_(&mut self) -> &mut Self {
        self.push(StmtKind::Jump {
            kind: JumpKind::Break,
            label: None,
        })
    }

    pub fn break_to(&mut self, label: impl Into<Name>) -> &mut Self {
        self.push(StmtKind::Jump {
            kind: JumpKind::Break,
            label: Some(label.into()),
        })
    }

    pub fn continue_(&mut self) -> &mut Self {
        self.push(StmtKind::Jump {
            kind: JumpKind::Continue,
            label: None,
        })
    }

    pub fn continue_to(&mut self, label: impl Into<Name>) -> &mut Self {
        self.push(StmtKind::Jump {
            kind: JumpKind::Continue,
            label: Some(label.into()),
        })
    }

    pub fn ret(&mut self) -> &mut Self {
        self.push(StmtKind::Return { value: None })
    }

    pub fn ret_value(&mut self, value: impl Into<Expr>) -> &mut Self {
        self.push(StmtKind::Return {
            value: Some(value.into()),
        })
    }

    pub fn fail(&mut self, status: impl Into<String>) -> &mut Self {
        self.push(StmtKind::Fail {
            status: status.into(),
        })
    }

    pub fn call(&mut self, callee: impl Into<Name>, args: Vec<Expr>) -> &mut Self {
        self.push(StmtKind::Call {
            dest: None,
            callee: callee.into(),
            args,
        })
    }

    pub fn call_into(
        &mut self,
        dest: impl Into<Name>,
        callee: impl Into<Name>,
        args: Vec<Expr>,
    ) -> &mut Self {
        self.push(StmtKind::Call {
            dest: Some(dest.into()),
            callee: callee.into(),
            args,
        })
    }

    pub fn read(&mut self, dest: impl Into<Name>, src: impl Into<Name>) -> &mut Self {
        self.push(StmtKind::Read {
            dest: dest.into(),
            src: src.into(),
        })
    }

    pub fn write(&mut self, dst: impl Into<Name>, value: impl Into<Expr>) -> &mut Self {
        self.push(StmtKind::Write {
            dst: dst.into(),
            value: value.into(),
        })
    }
}
