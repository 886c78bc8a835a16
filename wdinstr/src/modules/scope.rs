//! Name resolution and type annotation.
//!
//! Variables are function-scoped: every parameter and `var` declaration
//! introduces a unique name, visible from its declaration onward.
//! [`Function::annotate`] resolves every name, infers expression types
//! bottom-up and stamps statement locations onto their expressions.
use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use crate::{
    modules::{
        Function, RESULT_NAME,
        instructions::{JumpKind, Place, Stmt, StmtKind},
        int::{BinaryOp, UnaryOp},
        operand::{Expr, ExprKind, Name, SourceLoc},
    },
    types::Type,
    utils::Error,
};

/// Declared type of every name of a function.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Scope {
    vars: BTreeMap<Name, Type>,
    params: BTreeSet<Name>,
}

impl Scope {
    /// Scope holding the parameters only.
    pub fn for_params(function: &Function) -> Self {
        let mut scope = Scope::default();
        for p in &function.params {
            scope.vars.insert(p.name.clone(), p.ty.clone());
            scope.params.insert(p.name.clone());
        }
        scope
    }

    /// Scope holding parameters and every local declaration of `function`.
    pub fn of(function: &Function) -> Self {
        let mut scope = Scope::for_params(function);
        function.walk(|stmt| {
            if let StmtKind::Var { name, ty, .. } = &stmt.kind {
                scope.vars.insert(name.clone(), ty.clone());
            }
        });
        scope
    }

    pub fn declare(&mut self, name: impl Into<Name>, ty: Type) {
        self.vars.insert(name.into(), ty);
    }

    pub fn type_of(&self, name: &str) -> Option<&Type> {
        self.vars.get(name)
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.params.contains(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Type)> {
        self.vars.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.vars.keys()
    }

    /// Scope extended with [`RESULT_NAME`] bound to the return type.
    pub fn with_result(&self, ret: Option<&Type>) -> Scope {
        let mut scope = self.clone();
        if let Some(ty) = ret {
            scope.declare(RESULT_NAME, ty.clone());
        }
        scope
    }
}

/// Type of a binary expression given its operand types.
pub fn binary_result_type(op: BinaryOp, lhs: &Type, rhs: &Type) -> Type {
    if op.is_comparison() || op.is_logical() {
        return Type::Bool;
    }
    match (lhs, rhs) {
        (Type::Int(_), _) => lhs.base(),
        (_, Type::Int(_)) if !op.is_shift() => rhs.base(),
        _ => Type::Ideal,
    }
}

struct Annotator<'a> {
    function: &'a str,
    scope: Scope,
    /// Labels of the enclosing loops, innermost last.
    loops: Vec<Option<Name>>,
}

impl Annotator<'_> {
    fn lookup(&self, name: &str, loc: SourceLoc) -> Result<Type, Error> {
        self.scope
            .type_of(name)
            .cloned()
            .ok_or_else(|| Error::UndefinedVariable {
                function: self.function.to_string(),
                name: name.to_string(),
                loc,
            })
    }

    fn sequence(&self, name: &str, loc: SourceLoc) -> Result<Type, Error> {
        let ty = self.lookup(name, loc)?;
        if ty.is_sequence() {
            Ok(ty)
        } else {
            Err(Error::NotASequence {
                function: self.function.to_string(),
                name: name.to_string(),
                ty: ty.to_string(),
                loc,
            })
        }
    }

    fn expr(&self, e: &mut Expr, loc: SourceLoc) -> Result<(), Error> {
        if e.loc.is_unknown() {
            e.loc = loc;
        }
        for child in e.children_mut() {
            self.expr(child, loc)?;
        }
        e.ty = match &e.kind {
            ExprKind::Const(_) => Type::Ideal,
            ExprKind::Bool(_) => Type::Bool,
            ExprKind::Var(name) => self.lookup(name, loc)?,
            ExprKind::Length(name) => {
                self.sequence(name, loc)?;
                Type::u64()
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Neg => operand.ty.base(),
                UnaryOp::Not => Type::Bool,
            },
            ExprKind::Binary { op, lhs, rhs } => binary_result_type(*op, &lhs.ty, &rhs.ty),
            ExprKind::Index { base, .. } => self
                .sequence(base, loc)?
                .element()
                .cloned()
                .unwrap_or(Type::Ideal),
            ExprKind::Slice { base, .. } => {
                let ty = self.sequence(base, loc)?;
                Type::slice(ty.element().cloned().unwrap_or(Type::Ideal))
            }
            ExprKind::Cast { to, .. } => Type::Int(to.clone()),
        };
        Ok(())
    }

    fn declare(&mut self, name: &str, ty: &Type, loc: SourceLoc) -> Result<(), Error> {
        if self.scope.contains(name) {
            return Err(Error::DuplicateVariable {
                function: self.function.to_string(),
                name: name.to_string(),
                loc,
            });
        }
        self.scope.declare(name, ty.clone());
        Ok(())
    }

    fn writable(&self, name: &str, loc: SourceLoc) -> Result<(), Error> {
        self.lookup(name, loc)?;
        if self.scope.is_param(name) {
            return Err(Error::ParameterAssignment {
                function: self.function.to_string(),
                name: name.to_string(),
                loc,
            });
        }
        Ok(())
    }

    fn body(&mut self, stmts: &mut [Stmt]) -> Result<(), Error> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &mut Stmt) -> Result<(), Error> {
        let loc = stmt.loc;
        for e in stmt.exprs_mut() {
            self.expr(e, loc)?;
        }
        match &mut stmt.kind {
            StmtKind::Var { name, ty, .. } => {
                let (name, ty) = (name.clone(), ty.clone());
                self.declare(&name, &ty, loc)?;
            }
            StmtKind::Assign { place, .. } => {
                match place {
                    Place::Var(name) => self.writable(name, loc)?,
                    Place::Index { base, .. } => {
                        self.sequence(base, loc)?;
                        self.writable(base, loc)?;
                    }
                }
            }
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                self.body(then_body)?;
                self.body(else_body)?;
            }
            StmtKind::While { label, body, .. } => {
                self.loops.push(label.clone());
                let res = self.body(body);
                self.loops.pop();
                res?;
            }
            StmtKind::Jump { kind, label } => {
                if self.loops.is_empty() {
                    return Err(Error::JumpOutsideLoop {
                        function: self.function.to_string(),
                        kind: match kind {
                            JumpKind::Break => "break".to_string(),
                            JumpKind::Continue => "continue".to_string(),
                        },
                        loc,
                    });
                }
                if let Some(label) = label {
                    if !self.loops.iter().any(|l| l.as_ref() == Some(label)) {
                        return Err(Error::UndefinedLoopLabel {
                            function: self.function.to_string(),
                            label: label.clone(),
                            loc,
                        });
                    }
                }
            }
            StmtKind::Call { dest, .. } => {
                if let Some(dest) = dest {
                    self.writable(dest, loc)?;
                }
            }
            StmtKind::Read { dest, src } => {
                self.lookup(src, loc)?;
                self.writable(dest, loc)?;
            }
            StmtKind::Write { dst, .. } => {
                self.lookup(dst, loc)?;
            }
            StmtKind::Assert { .. } | StmtKind::Return { .. } | StmtKind::Fail { .. } => {}
        }
        Ok(())
    }
}

impl Function {
    /// Resolves names, infers expression types and checks the structural
    /// rules of the body (unique declarations, immutable parameters, jumps
    /// inside loops).
    pub fn annotate(&mut self) -> Result<(), Error> {
        trace!("annotating function `{}`", self.name);
        let mut annotator = Annotator {
            function: &self.name,
            scope: Scope::for_params(self),
            loops: Vec::new(),
        };
        let loc = self.loc;
        for e in self.preconditions.iter_mut() {
            annotator.expr(e, loc)?;
        }
        annotator.body(&mut self.body)?;

        // Postconditions only see parameters and `result`.
        let post_scope = Scope::for_params(self).with_result(self.ret.as_ref());
        let post_annotator = Annotator {
            function: &self.name,
            scope: post_scope,
            loops: Vec::new(),
        };
        for e in self.postconditions.iter_mut() {
            post_annotator.expr(e, loc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{
        FunctionFlags, Param,
        int::AssignOp,
        operand::{lit, var},
    };

    fn function(body: Vec<Stmt>) -> Function {
        Function {
            name: "f".to_string(),
            params: vec![Param {
                name: "n".to_string(),
                ty: Type::u8(),
            }],
            ret: None,
            preconditions: vec![],
            postconditions: vec![],
            flags: FunctionFlags::empty(),
            body,
            loc: SourceLoc::new(1, 1),
        }
    }

    fn stmt(kind: StmtKind, line: u32) -> Stmt {
        Stmt::new(kind, SourceLoc::new(line, 5))
    }

    #[test]
    fn infers_types_and_stamps_locations() {
        let mut f = function(vec![
            stmt(
                StmtKind::Var {
                    name: "x".into(),
                    ty: Type::u32(),
                    init: None,
                },
                2,
            ),
            stmt(
                StmtKind::Assign {
                    place: Place::Var("x".into()),
                    op: AssignOp::Set,
                    value: var("x") + lit(1),
                },
                3,
            ),
        ]);
        f.annotate().unwrap();
        let StmtKind::Assign { value, .. } = &f.body[1].kind else {
            panic!("expected an assignment");
        };
        assert_eq!(value.ty, Type::u32());
        assert_eq!(value.loc, SourceLoc::new(3, 5));
        assert_eq!(value.children()[1].ty, Type::Ideal);
    }

    #[test]
    fn rejects_use_before_declaration() {
        let mut f = function(vec![stmt(
            StmtKind::Assert {
                cond: var("y").lt(3),
                reason: None,
            },
            2,
        )]);
        assert!(f.annotate().unwrap_err().is_undefined_variable());
    }

    #[test]
    fn rejects_parameter_assignment_and_stray_break() {
        let mut f = function(vec![stmt(
            StmtKind::Assign {
                place: Place::Var("n".into()),
                op: AssignOp::Set,
                value: lit(0),
            },
            2,
        )]);
        assert!(f.annotate().unwrap_err().is_parameter_assignment());

        let mut f = function(vec![stmt(
            StmtKind::Jump {
                kind: JumpKind::Break,
                label: None,
            },
            2,
        )]);
        assert!(f.annotate().unwrap_err().is_jump_outside_loop());
    }
}
