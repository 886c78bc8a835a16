//! Statements
//!
//! The structured statement forms handed over by the front end. Control flow
//! is still nested here (`if`, `while`); the analysis lowers it into basic
//! blocks (see [`crate::modules::block`]).
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::EnumIs;

use crate::{
    modules::{
        int::AssignOp,
        operand::{Expr, Name, SourceLoc},
    },
    types::Type,
};

/// Assignment destination.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Place {
    Var(Name),
    Index { base: Name, index: Expr },
}

impl Place {
    /// Variable or array written by the assignment.
    pub fn root(&self) -> &Name {
        match self {
            Place::Var(name) => name,
            Place::Index { base, .. } => base,
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum JumpKind {
    Break,
    Continue,
}

/// Named proof strategy attached to an `assert`, e.g.
/// `assert x < n via "a < b: a < c; c <= b"(c: m)`.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reason {
    pub rule: String,
    /// Bindings for the rule's free placeholders.
    pub args: Vec<(Name, Expr)>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, EnumIs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StmtKind {
    /// `var name ty [= init]`. Without an initializer the variable is zero.
    Var {
        name: Name,
        ty: Type,
        init: Option<Expr>,
    },
    Assign {
        place: Place,
        op: AssignOp,
        value: Expr,
    },
    Assert {
        cond: Expr,
        reason: Option<Reason>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    /// `while cond, pre .., inv .., post .. { body }`.
    While {
        label: Option<Name>,
        cond: Expr,
        pre: Vec<Expr>,
        inv: Vec<Expr>,
        post: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Jump {
        kind: JumpKind,
        label: Option<Name>,
    },
    Return {
        value: Option<Expr>,
    },
    /// Terminates the function with an error status.
    Fail {
        status: String,
    },
    Call {
        dest: Option<Name>,
        callee: Name,
        args: Vec<Expr>,
    },
    /// `dest = src.read_u8()`; suspends while the input is empty.
    Read {
        dest: Name,
        src: Name,
    },
    /// `dst.write_u8(value)`; suspends while the output is full.
    Write {
        dst: Name,
        value: Expr,
    },
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stmt {
    pub kind: StmtKind,
    pub loc: SourceLoc,
}

impl Stmt {
    pub fn new(kind: StmtKind, loc: SourceLoc) -> Self {
        Self { kind, loc }
    }

    /// Expressions evaluated directly by this statement (nested bodies
    /// excluded), in evaluation order.
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            StmtKind::Var { init, .. } => init.iter().collect(),
            StmtKind::Assign { place, value, .. } => match place {
                Place::Var(_) => vec![value],
                Place::Index { index, .. } => vec![index, value],
            },
            StmtKind::Assert { cond, reason } => std::iter::once(cond)
                .chain(reason.iter().flat_map(|r| r.args.iter().map(|(_, e)| e)))
                .collect(),
            StmtKind::If { cond, .. } => vec![cond],
            StmtKind::While {
                cond, pre, inv, post, ..
            } => pre
                .iter()
                .chain(inv.iter())
                .chain(std::iter::once(cond))
                .chain(post.iter())
                .collect(),
            StmtKind::Return { value } => value.iter().collect(),
            StmtKind::Call { args, .. } => args.iter().collect(),
            StmtKind::Write { value, .. } => vec![value],
            StmtKind::Jump { .. } | StmtKind::Fail { .. } | StmtKind::Read { .. } => vec![],
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            StmtKind::Var { init, .. } => init.iter_mut().collect(),
            StmtKind::Assign { place, value, .. } => match place {
                Place::Var(_) => vec![value],
                Place::Index { index, .. } => vec![index, value],
            },
            StmtKind::Assert { cond, reason } => std::iter::once(cond)
                .chain(
                    reason
                        .iter_mut()
                        .flat_map(|r| r.args.iter_mut().map(|(_, e)| e)),
                )
                .collect(),
            StmtKind::If { cond, .. } => vec![cond],
            StmtKind::While {
                cond, pre, inv, post, ..
            } => pre
                .iter_mut()
                .chain(inv.iter_mut())
                .chain(std::iter::once(cond))
                .chain(post.iter_mut())
                .collect(),
            StmtKind::Return { value } => value.iter_mut().collect(),
            StmtKind::Call { args, .. } => args.iter_mut().collect(),
            StmtKind::Write { value, .. } => vec![value],
            StmtKind::Jump { .. } | StmtKind::Fail { .. } | StmtKind::Read { .. } => vec![],
        }
    }

    /// Nested statement bodies.
    pub fn bodies(&self) -> Vec<&[Stmt]> {
        match &self.kind {
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => vec![then_body.as_slice(), else_body.as_slice()],
            StmtKind::While { body, .. } => vec![body.as_slice()],
            _ => vec![],
        }
    }

    pub fn bodies_mut(&mut self) -> Vec<&mut Vec<Stmt>> {
        match &mut self.kind {
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => vec![then_body, else_body],
            StmtKind::While { body, .. } => vec![body],
            _ => vec![],
        }
    }

    /// Name written by this statement, if any (nested bodies excluded).
    pub fn written(&self) -> Option<&Name> {
        match &self.kind {
            StmtKind::Var { name, .. } => Some(name),
            StmtKind::Assign { place, .. } => Some(place.root()),
            StmtKind::Call { dest, .. } => dest.as_ref(),
            StmtKind::Read { dest, .. } => Some(dest),
            _ => None,
        }
    }
}
