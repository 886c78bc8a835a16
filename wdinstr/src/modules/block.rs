//! Basic blocks and control-flow graphs.
//!
//! A [`Cfg`] owns its blocks in a vector indexed by [`BlockId`]; block 0 is
//! not necessarily the entry (lowered functions prepend a dispatch block).
//! Graph algorithms are delegated to `petgraph` via [`Cfg::graph`].
use std::collections::{BTreeMap, BTreeSet};

use petgraph::{Direction, graphmap::DiGraphMap, visit::DfsPostOrder};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    modules::{
        instructions::{Place, Reason},
        int::AssignOp,
        operand::{Expr, Name, SourceLoc},
        terminator::Terminator,
    },
    types::Type,
    utils::Error,
};

/// Identifier of a basic block within its function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%block_{}", self.0)
    }
}

/// Origin of an assertion op.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AssertKind {
    /// Written by the user as a statement.
    User,
    /// Loop `pre` clause, checked before entering the loop.
    LoopPre,
    /// Loop `post` clause, checked on every loop exit.
    LoopPost,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OpKind {
    /// Declares a variable and sets it to zero.
    Declare { name: Name, ty: Type },
    Assign {
        place: Place,
        op: AssignOp,
        value: Expr,
    },
    Assert {
        cond: Expr,
        kind: AssertKind,
        reason: Option<Reason>,
    },
    Call {
        dest: Option<Name>,
        callee: Name,
        args: Vec<Expr>,
    },
    Read { dest: Name, src: Name },
    Write { dst: Name, value: Expr },
}

/// A straight-line operation of a basic block.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Op {
    pub kind: OpKind,
    pub loc: SourceLoc,
    /// Label of the checkpoint this op may suspend at, once lowered.
    pub checkpoint: Option<u32>,
}

impl Op {
    pub fn new(kind: OpKind, loc: SourceLoc) -> Self {
        Self {
            kind,
            loc,
            checkpoint: None,
        }
    }

    /// Expressions evaluated by the op, in evaluation order.
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            OpKind::Declare { .. } | OpKind::Read { .. } => vec![],
            OpKind::Assign { place, value, .. } => match place {
                Place::Var(_) => vec![value],
                Place::Index { index, .. } => vec![index, value],
            },
            OpKind::Assert { cond, reason, .. } => std::iter::once(cond)
                .chain(reason.iter().flat_map(|r| r.args.iter().map(|(_, e)| e)))
                .collect(),
            OpKind::Call { args, .. } => args.iter().collect(),
            OpKind::Write { value, .. } => vec![value],
        }
    }

    /// Names read by the op.
    pub fn uses(&self) -> BTreeSet<Name> {
        let mut out: BTreeSet<Name> = self.exprs().into_iter().flat_map(Expr::names).collect();
        match &self.kind {
            OpKind::Assign { place, op, .. } => {
                if let Place::Index { base, .. } = place {
                    out.insert(base.clone());
                }
                if *op != AssignOp::Set {
                    out.insert(place.root().clone());
                }
            }
            OpKind::Read { src, .. } => {
                out.insert(src.clone());
            }
            OpKind::Write { dst, .. } => {
                out.insert(dst.clone());
            }
            _ => {}
        }
        out
    }

    /// Name fully overwritten by the op.
    pub fn def(&self) -> Option<&Name> {
        match &self.kind {
            OpKind::Declare { name, .. } => Some(name),
            OpKind::Assign {
                place: Place::Var(name),
                ..
            } => Some(name),
            OpKind::Call { dest, .. } => dest.as_ref(),
            OpKind::Read { dest, .. } => Some(dest),
            _ => None,
        }
    }

    /// Name modified (fully or partially) by the op.
    pub fn written(&self) -> Option<&Name> {
        match &self.kind {
            OpKind::Assign { place, .. } => Some(place.root()),
            _ => self.def(),
        }
    }
}

/// Loop metadata attached to the header block of a loop.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoopHeader {
    pub label: Option<Name>,
    /// Proven on every edge into the header, then assumed.
    pub invariants: Vec<Expr>,
    /// Every variable written in the loop body.
    pub written: BTreeSet<Name>,
    /// Blocks lexically inside the loop, the header included. An edge into
    /// the header from one of them is a back edge.
    pub body: BTreeSet<BlockId>,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasicBlock {
    pub id: BlockId,
    pub ops: Vec<Op>,
    pub terminator: Terminator,
    /// Location attributed to the terminator.
    pub term_loc: SourceLoc,
    pub header: Option<LoopHeader>,
}

impl BasicBlock {
    pub fn new(id: BlockId, terminator: Terminator) -> Self {
        Self {
            id,
            ops: Vec::new(),
            terminator,
            term_loc: SourceLoc::UNKNOWN,
            header: None,
        }
    }
}

/// Control-flow graph of one function.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cfg {
    pub function: String,
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
}

impl Cfg {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            blocks: Vec::new(),
            entry: BlockId(0),
        }
    }

    /// Appends an empty block ending in `ret void`.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks
            .push(BasicBlock::new(id, Terminator::Return { value: None }));
        id
    }

    /// Appends an empty block belonging to the same loops as `sibling`.
    pub fn add_block_beside(&mut self, sibling: BlockId) -> BlockId {
        let id = self.add_block();
        for block in &mut self.blocks {
            if let Some(header) = &mut block.header {
                if header.body.contains(&sibling) {
                    header.body.insert(id);
                }
            }
        }
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.block(id).terminator.successors()
    }

    /// Checks that every terminator targets an existing block.
    pub fn check_targets(&self) -> Result<(), Error> {
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                if succ.index() >= self.blocks.len() {
                    return Err(Error::UndefinedBasicBlock {
                        function: self.function.clone(),
                        block: succ,
                    });
                }
            }
        }
        Ok(())
    }

    /// Directed graph of the blocks, one edge per distinct successor.
    pub fn graph(&self) -> DiGraphMap<BlockId, ()> {
        let mut graph = DiGraphMap::new();
        for block in &self.blocks {
            graph.add_node(block.id);
            for succ in block.terminator.successors() {
                graph.add_edge(block.id, succ, ());
            }
        }
        graph
    }

    /// Predecessors of every block, sorted.
    pub fn predecessors(&self) -> BTreeMap<BlockId, Vec<BlockId>> {
        let graph = self.graph();
        self.blocks
            .iter()
            .map(|b| {
                let mut preds: Vec<_> = graph
                    .neighbors_directed(b.id, Direction::Incoming)
                    .collect();
                preds.sort();
                (b.id, preds)
            })
            .collect()
    }

    /// Blocks reachable from `roots`, in reverse post-order.
    pub fn reverse_post_order(&self, roots: &[BlockId]) -> Vec<BlockId> {
        let graph = self.graph();
        let mut order = Vec::new();
        let mut dfs = DfsPostOrder::empty(&graph);
        for root in roots {
            dfs.move_to(*root);
            while let Some(node) = dfs.next(&graph) {
                order.push(node);
            }
        }
        order.reverse();
        order
    }
}
