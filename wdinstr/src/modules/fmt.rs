//! Textual rendering of functions, statements and control-flow graphs.
//!
//! The output is stable: rendering the same value twice always yields the
//! same text, which makes it suitable for comparing compilation results.
use std::fmt::{Display, Formatter, Result};

use crate::modules::{
    Function, FunctionFlags,
    block::{AssertKind, BasicBlock, Cfg, Op, OpKind},
    instructions::{JumpKind, Place, Reason, Stmt, StmtKind},
};

const INDENT: &str = "    ";

impl Display for Place {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Place::Var(name) => write!(f, "{}", name),
            Place::Index { base, index } => write!(f, "{}[{}]", base, index),
        }
    }
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "via {:?}(", self.rule)?;
        for (i, (name, e)) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, e)?;
        }
        write!(f, ")")
    }
}

fn write_body(f: &mut Formatter<'_>, stmts: &[Stmt], depth: usize) -> Result {
    for stmt in stmts {
        write_stmt(f, stmt, depth)?;
    }
    Ok(())
}

fn write_stmt(f: &mut Formatter<'_>, stmt: &Stmt, depth: usize) -> Result {
    let pad = INDENT.repeat(depth);
    write!(f, "{}", pad)?;
    match &stmt.kind {
        StmtKind::Var { name, ty, init } => {
            write!(f, "var {} {}", name, ty)?;
            if let Some(init) = init {
                write!(f, " = {}", init)?;
            }
            writeln!(f)
        }
        StmtKind::Assign { place, op, value } => {
            writeln!(f, "{} {} {}", place, op.to_str(), value)
        }
        StmtKind::Assert { cond, reason } => {
            write!(f, "assert {}", cond)?;
            if let Some(reason) = reason {
                write!(f, " {}", reason)?;
            }
            writeln!(f)
        }
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            writeln!(f, "if {} {{", cond)?;
            write_body(f, then_body, depth + 1)?;
            if !else_body.is_empty() {
                writeln!(f, "{}}} else {{", pad)?;
                write_body(f, else_body, depth + 1)?;
            }
            writeln!(f, "{}}}", pad)
        }
        StmtKind::While {
            label,
            cond,
            pre,
            inv,
            post,
            body,
        } => {
            write!(f, "while")?;
            if let Some(label) = label {
                write!(f, ".{}", label)?;
            }
            write!(f, " {}", cond)?;
            for (kw, clauses) in [("pre", pre), ("inv", inv), ("post", post)] {
                for c in clauses {
                    write!(f, ",\n{}{}{} {}", pad, INDENT, kw, c)?;
                }
            }
            writeln!(f, " {{")?;
            write_body(f, body, depth + 1)?;
            writeln!(f, "{}}}", pad)
        }
        StmtKind::Jump { kind, label } => {
            match kind {
                JumpKind::Break => write!(f, "break")?,
                JumpKind::Continue => write!(f, "continue")?,
            }
            if let Some(label) = label {
                write!(f, ".{}", label)?;
            }
            writeln!(f)
        }
        StmtKind::Return { value: Some(v) } => writeln!(f, "return {}", v),
        StmtKind::Return { value: None } => writeln!(f, "return"),
        StmtKind::Fail { status } => writeln!(f, "fail {:?}", status),
        StmtKind::Call { dest, callee, args } => {
            if let Some(dest) = dest {
                write!(f, "{} = ", dest)?;
            }
            write!(f, "{}(", callee)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", a)?;
            }
            writeln!(f, ")")
        }
        StmtKind::Read { dest, src } => writeln!(f, "{} = {}.read_u8()", dest, src),
        StmtKind::Write { dst, value } => writeln!(f, "{}.write_u8({})", dst, value),
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write_stmt(f, self, 0)
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if self.flags.contains(FunctionFlags::PUBLIC) {
            write!(f, "pub ")?;
        }
        write!(f, "func {}", self.name)?;
        if self.is_suspendible() {
            write!(f, "?")?;
        }
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", p.name, p.ty)?;
        }
        write!(f, ")")?;
        if let Some(ret) = &self.ret {
            write!(f, " {}", ret)?;
        }
        for p in &self.preconditions {
            write!(f, ",\n{}pre {}", INDENT, p)?;
        }
        for p in &self.postconditions {
            write!(f, ",\n{}post {}", INDENT, p)?;
        }
        writeln!(f, " {{")?;
        write_body(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if let Some(label) = self.checkpoint {
            write!(f, "@{} ", label)?;
        }
        match &self.kind {
            OpKind::Declare { name, ty } => write!(f, "declare {} {}", name, ty),
            OpKind::Assign { place, op, value } => {
                write!(f, "{} {} {}", place, op.to_str(), value)
            }
            OpKind::Assert { cond, kind, reason } => {
                let kw = match kind {
                    AssertKind::User => "assert",
                    AssertKind::LoopPre => "assert.pre",
                    AssertKind::LoopPost => "assert.post",
                };
                write!(f, "{} {}", kw, cond)?;
                if let Some(reason) = reason {
                    write!(f, " {}", reason)?;
                }
                Ok(())
            }
            OpKind::Call { dest, callee, args } => {
                if let Some(dest) = dest {
                    write!(f, "{} = ", dest)?;
                }
                write!(f, "call {}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            OpKind::Read { dest, src } => write!(f, "{} = read {}", dest, src),
            OpKind::Write { dst, value } => write!(f, "write {}, {}", dst, value),
        }
    }
}

impl Display for BasicBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}:", self.id)?;
        if let Some(header) = &self.header {
            write!(f, " ; loop")?;
            if let Some(label) = &header.label {
                write!(f, " .{}", label)?;
            }
            for inv in &header.invariants {
                write!(f, ", inv {}", inv)?;
            }
        }
        writeln!(f)?;
        for op in &self.ops {
            writeln!(f, "{}{}", INDENT, op)?;
        }
        writeln!(f, "{}{}", INDENT, self.terminator)
    }
}

impl Display for Cfg {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        writeln!(f, "cfg {} (entry {})", self.function, self.entry)?;
        for block in &self.blocks {
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        modules::{
            builder::{FunctionBuilder, LoopClauses},
            operand::{lit, var},
        },
        types::Type,
    };

    #[test]
    fn renders_nested_statements() {
        let f = FunctionBuilder::new("count")
            .param("n", Type::u8())
            .body(|b| {
                b.var("i", Type::u32());
                b.loop_(
                    LoopClauses::default().inv(var("i").le(var("n"))),
                    var("i").lt(var("n")),
                    |b| {
                        b.assign("i", var("i") + lit(1));
                    },
                );
            })
            .build()
            .unwrap();
        let text = f.to_string();
        assert_eq!(
            text,
            "func count(n: u8) {\n    var i u32\n    while i < n,\n        inv i <= n {\n        i = i + 1\n    }\n}\n"
        );
    }
}
