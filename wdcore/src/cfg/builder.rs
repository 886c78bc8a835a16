//! Lowering of structured statements into basic blocks.
//!
//! Conditions become [`Terminator::Branch`]. Every `while` loop gets a
//! pre-header (where its `pre` clauses are asserted), a header block
//! carrying the invariants and the set of variables written by the body,
//! and a post-check block reached from the false edge of the header and
//! from every `break`, where the `post` clauses are asserted.
use std::collections::BTreeSet;

use log::trace;
use wdinstr::{
    modules::{
        Function,
        block::{AssertKind, BlockId, Cfg, LoopHeader, Op, OpKind},
        instructions::{JumpKind, Place, Stmt, StmtKind},
        int::AssignOp,
        operand::{Name, SourceLoc},
        terminator::Terminator,
    },
    utils::Error,
};

use crate::utils::error::CoreResult;

struct LoopFrame {
    label: Option<Name>,
    header: BlockId,
    post_check: BlockId,
}

struct Builder<'a> {
    function: &'a Function,
    cfg: Cfg,
    current: BlockId,
    /// Whether `current` already received its terminator. Statements after
    /// a `return`, `fail`, `break` or `continue` land in a fresh block
    /// without predecessors.
    sealed: bool,
    loops: Vec<LoopFrame>,
}

/// Builds the control-flow graph of `function`.
pub fn build_cfg(function: &Function) -> CoreResult<Cfg> {
    let mut cfg = Cfg::new(function.name.clone());
    let entry = cfg.add_block();
    cfg.entry = entry;
    let mut builder = Builder {
        function,
        cfg,
        current: entry,
        sealed: false,
        loops: Vec::new(),
    };
    builder.lower_body(&function.body)?;
    if !builder.sealed {
        builder.terminate(Terminator::Return { value: None }, function.loc);
    }
    builder.cfg.check_targets()?;
    trace!(
        "built {} blocks for `{}`",
        builder.cfg.len(),
        function.name
    );
    Ok(builder.cfg)
}

/// Every variable a statement list may write, nested bodies included.
pub fn written_names(stmts: &[Stmt]) -> BTreeSet<Name> {
    let mut out = BTreeSet::new();
    fn visit(stmts: &[Stmt], out: &mut BTreeSet<Name>) {
        for stmt in stmts {
            if let Some(name) = stmt.written() {
                out.insert(name.clone());
            }
            for body in stmt.bodies() {
                visit(body, out);
            }
        }
    }
    visit(stmts, &mut out);
    out
}

impl Builder<'_> {
    fn open(&mut self) -> BlockId {
        if self.sealed {
            self.current = self.cfg.add_block();
            self.sealed = false;
        }
        self.current
    }

    fn push(&mut self, kind: OpKind, loc: SourceLoc) {
        let block = self.open();
        self.cfg.block_mut(block).ops.push(Op::new(kind, loc));
    }

    fn terminate(&mut self, terminator: Terminator, loc: SourceLoc) {
        let block = self.open();
        let b = self.cfg.block_mut(block);
        b.terminator = terminator;
        b.term_loc = loc;
        self.sealed = true;
    }

    fn switch_to(&mut self, block: BlockId) {
        self.current = block;
        self.sealed = false;
    }

    fn lower_body(&mut self, stmts: &[Stmt]) -> CoreResult<()> {
        for stmt in stmts {
            self.lower(stmt)?;
        }
        Ok(())
    }

    fn lower(&mut self, stmt: &Stmt) -> CoreResult<()> {
        let loc = stmt.loc;
        match &stmt.kind {
            StmtKind::Var { name, ty, init } => match init {
                Some(value) => self.push(
                    OpKind::Assign {
                        place: Place::Var(name.clone()),
                        op: AssignOp::Set,
                        value: value.clone(),
                    },
                    loc,
                ),
                None => self.push(
                    OpKind::Declare {
                        name: name.clone(),
                        ty: ty.clone(),
                    },
                    loc,
                ),
            },
            StmtKind::Assign { place, op, value } => self.push(
                OpKind::Assign {
                    place: place.clone(),
                    op: *op,
                    value: value.clone(),
                },
                loc,
            ),
            StmtKind::Assert { cond, reason } => self.push(
                OpKind::Assert {
                    cond: cond.clone(),
                    kind: AssertKind::User,
                    reason: reason.clone(),
                },
                loc,
            ),
            StmtKind::Call { dest, callee, args } => self.push(
                OpKind::Call {
                    dest: dest.clone(),
                    callee: callee.clone(),
                    args: args.clone(),
                },
                loc,
            ),
            StmtKind::Read { dest, src } => self.push(
                OpKind::Read {
                    dest: dest.clone(),
                    src: src.clone(),
                },
                loc,
            ),
            StmtKind::Write { dst, value } => self.push(
                OpKind::Write {
                    dst: dst.clone(),
                    value: value.clone(),
                },
                loc,
            ),
            StmtKind::Return { value } => {
                self.terminate(Terminator::Return { value: value.clone() }, loc)
            }
            StmtKind::Fail { status } => self.terminate(
                Terminator::Fail {
                    status: status.clone(),
                },
                loc,
            ),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let then_block = self.cfg.add_block();
                let else_block = self.cfg.add_block();
                let join = self.cfg.add_block();
                self.terminate(
                    Terminator::Branch {
                        cond: cond.clone(),
                        then_target: then_block,
                        else_target: else_block,
                    },
                    loc,
                );
                for (block, body) in [(then_block, then_body), (else_block, else_body)] {
                    self.switch_to(block);
                    self.lower_body(body)?;
                    if !self.sealed {
                        self.terminate(Terminator::Jump { target: join }, loc);
                    }
                }
                self.switch_to(join);
            }
            StmtKind::While {
                label,
                cond,
                pre,
                inv,
                post,
                body,
            } => {
                for p in pre {
                    self.push(
                        OpKind::Assert {
                            cond: p.clone(),
                            kind: AssertKind::LoopPre,
                            reason: None,
                        },
                        loc,
                    );
                }
                let header = self.cfg.add_block();
                let body_block = self.cfg.add_block();
                let post_check = self.cfg.add_block();
                self.terminate(Terminator::Jump { target: header }, loc);

                self.switch_to(header);
                self.terminate(
                    Terminator::Branch {
                        cond: cond.clone(),
                        then_target: body_block,
                        else_target: post_check,
                    },
                    loc,
                );

                self.loops.push(LoopFrame {
                    label: label.clone(),
                    header,
                    post_check,
                });
                self.switch_to(body_block);
                self.lower_body(body)?;
                if !self.sealed {
                    self.terminate(Terminator::Jump { target: header }, loc);
                }
                self.loops.pop();

                // Blocks opened while lowering the body follow `post_check`.
                let inner = (post_check.0 + 1..self.cfg.len() as u32).map(BlockId);
                self.cfg.block_mut(header).header = Some(LoopHeader {
                    label: label.clone(),
                    invariants: inv.clone(),
                    written: written_names(body),
                    body: [header, body_block].into_iter().chain(inner).collect(),
                    loc,
                });

                self.switch_to(post_check);
                for p in post {
                    self.push(
                        OpKind::Assert {
                            cond: p.clone(),
                            kind: AssertKind::LoopPost,
                            reason: None,
                        },
                        loc,
                    );
                }
            }
            StmtKind::Jump { kind, label } => {
                let frame = match label {
                    None => self.loops.last(),
                    Some(l) => self
                        .loops
                        .iter()
                        .rev()
                        .find(|f| f.label.as_ref() == Some(l)),
                };
                let Some(frame) = frame else {
                    let function = self.function.name.clone();
                    return Err(match label {
                        None => Error::JumpOutsideLoop {
                            function,
                            kind: match kind {
                                JumpKind::Break => "break".to_string(),
                                JumpKind::Continue => "continue".to_string(),
                            },
                            loc,
                        },
                        Some(label) => Error::UndefinedLoopLabel {
                            function,
                            label: label.clone(),
                            loc,
                        },
                    }
                    .into());
                };
                let target = match kind {
                    JumpKind::Break => frame.post_check,
                    JumpKind::Continue => frame.header,
                };
                self.terminate(Terminator::Jump { target }, loc);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wdinstr::{
        modules::{
            builder::{FunctionBuilder, LoopClauses},
            operand::{lit, var},
        },
        types::Type,
    };

    use super::*;

    #[test]
    fn loops_get_header_and_post_check() {
        let f = FunctionBuilder::new("count")
            .param("n", Type::u32())
            .body(|b| {
                b.var("i", Type::u32());
                b.while_(var("i").lt(var("n")), |b| {
                    b.assign("i", var("i") + lit(1));
                });
            })
            .build()
            .unwrap();
        let cfg = build_cfg(&f).unwrap();
        let headers: Vec<_> = cfg.blocks.iter().filter(|b| b.header.is_some()).collect();
        assert_eq!(headers.len(), 1);
        let header = headers[0];
        assert!(header.header.as_ref().unwrap().written.contains("i"));
        assert!(matches!(header.terminator, Terminator::Branch { .. }));
        // The body jumps back to the header.
        let preds = cfg.predecessors();
        assert_eq!(preds[&header.id].len(), 2);
    }

    #[test]
    fn break_reaches_post_check() {
        let f = FunctionBuilder::new("brk")
            .body(|b| {
                b.var("i", Type::u32());
                b.while_(var("i").lt(lit(10)), |b| {
                    b.break_();
                });
            })
            .build()
            .unwrap();
        let cfg = build_cfg(&f).unwrap();
        let header = cfg.blocks.iter().find(|b| b.header.is_some()).unwrap();
        let Terminator::Branch { else_target, .. } = header.terminator else {
            panic!("header must branch");
        };
        let preds = cfg.predecessors();
        assert_eq!(preds[&else_target].len(), 2);
    }

    #[test]
    fn nested_loop_bodies_are_recorded() {
        let f = FunctionBuilder::new("nest")
            .body(|b| {
                b.var("i", Type::u32());
                b.var("j", Type::u32());
                b.loop_(
                    LoopClauses::default().label("outer"),
                    var("i").lt(lit(10)),
                    |b| {
                        b.assign("i", var("i") + lit(1));
                        b.assign("j", lit(0));
                        b.while_(var("j").lt(lit(10)), |b| {
                            b.assign("j", var("j") + lit(1));
                            b.continue_to("outer");
                        });
                    },
                );
            })
            .build()
            .unwrap();
        let cfg = build_cfg(&f).unwrap();
        let headers: Vec<_> = cfg
            .blocks
            .iter()
            .filter_map(|b| b.header.as_ref().map(|h| (b.id, h)))
            .collect();
        assert_eq!(headers.len(), 2);
        let (outer_id, outer) = headers[0];
        let (inner_id, inner) = headers[1];
        assert_eq!(outer.label.as_deref(), Some("outer"));
        assert!(outer.body.contains(&inner_id));
        assert!(inner.body.is_subset(&outer.body));
        assert!(!inner.body.contains(&outer_id));

        let preds = cfg.predecessors();
        // The inner body always leaves through `continue outer`.
        assert!(preds[&inner_id].iter().all(|p| !inner.body.contains(p)));
        let outer_back = preds[&outer_id].iter().filter(|p| outer.body.contains(p)).count();
        assert_eq!(outer_back, 2);
    }

    #[test]
    fn code_after_return_has_no_predecessor() {
        let f = FunctionBuilder::new("dead")
            .body(|b| {
                b.ret();
                b.var("x", Type::u8());
            })
            .build()
            .unwrap();
        let cfg = build_cfg(&f).unwrap();
        let reachable = cfg.reverse_post_order(&[cfg.entry]);
        assert_eq!(reachable, vec![cfg.entry]);
        assert_eq!(cfg.len(), 2);
    }
}
