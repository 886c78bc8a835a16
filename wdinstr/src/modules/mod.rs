//! Program modules
//!
//! This module groups the IR handed to the analysis:
//!
//! - `int`: unary, binary and assignment operators
//! - `operand`: expressions, names and source locations
//! - `instructions`: structured statements
//! - `scope`: name resolution and type annotation
//! - `symbol`: the read-only table of function signatures
//! - `block` / `terminator`: the basic-block form produced by the analysis
//! - `builder`: helpers to assemble functions programmatically
//!
//! A [`Unit`] is an ordered list of [`Function`]s. Declaration order is
//! significant: diagnostics are reported in that order.
use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    modules::{
        instructions::{Stmt, StmtKind},
        operand::{Expr, Name, SourceLoc},
    },
    types::Type,
};

pub mod block;
pub mod builder;
pub mod fmt;
pub mod instructions;
pub mod int;
pub mod operand;
pub mod scope;
pub mod symbol;
pub mod terminator;

/// Name bound to the returned value inside postconditions.
pub const RESULT_NAME: &str = "result";

bitflags! {
    /// Properties of a function declaration.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct FunctionFlags: u8 {
        /// The function may pause awaiting input or output room and be
        /// resumed later. Only suspendible functions may read, write or call
        /// other suspendible functions.
        const SUSPENDIBLE = 1 << 0;

        /// The function is exported from the unit.
        const PUBLIC = 1 << 1;
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Param {
    pub name: Name,
    pub ty: Type,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    /// Return type, `None` for functions returning nothing.
    pub ret: Option<Type>,
    /// Assumed on entry; obligations for every caller.
    pub preconditions: Vec<Expr>,
    /// Proven at every `return`; assumed by callers. The returned value is
    /// named [`RESULT_NAME`].
    pub postconditions: Vec<Expr>,
    pub flags: FunctionFlags,
    pub body: Vec<Stmt>,
    pub loc: SourceLoc,
}

impl Function {
    pub fn is_suspendible(&self) -> bool {
        self.flags.contains(FunctionFlags::SUSPENDIBLE)
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Visits every statement, nested ones included, in source order.
    pub fn walk<'a>(&'a self, mut f: impl FnMut(&'a Stmt)) {
        fn visit<'a>(stmts: &'a [Stmt], f: &mut impl FnMut(&'a Stmt)) {
            for stmt in stmts {
                f(stmt);
                for body in stmt.bodies() {
                    visit(body, f);
                }
            }
        }
        visit(&self.body, &mut f);
    }

    /// Names of every function this one calls, in call order.
    pub fn callees(&self) -> Vec<(&Name, SourceLoc)> {
        let mut out = Vec::new();
        self.walk(|stmt| {
            if let StmtKind::Call { callee, .. } = &stmt.kind {
                out.push((callee, stmt.loc));
            }
        });
        out
    }

    /// Number of statements, nested ones included.
    pub fn statement_count(&self) -> usize {
        let mut count = 0;
        self.walk(|_| count += 1);
        count
    }
}

/// A compilation unit: functions in declaration order.
#[derive(Debug, Default, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Unit {
    pub functions: Vec<Function>,
}

impl Unit {
    pub fn new(functions: impl IntoIterator<Item = Function>) -> Self {
        Self {
            functions: functions.into_iter().collect(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
