//! Suspension lowering.
//!
//! A suspendible function may stop at any byte read, byte write or call to
//! another suspendible function and be resumed later at the same point.
//! Lowering turns it into an explicit state machine: every such operation
//! becomes a numbered [`Checkpoint`], the locals live across it are saved in
//! the caller-owned continuation record and a dispatch block at the entry
//! selects where execution restarts.
use std::collections::BTreeMap;

use strum::EnumIs;
use wdinstr::{
    modules::{
        block::{BlockId, Cfg},
        operand::{Name, SourceLoc},
    },
    types::Type,
};

use crate::facts::set::FactSet;

pub mod liveness;
pub mod lower;

pub use lower::lower_function;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs)]
pub enum CheckpointKind {
    /// Waiting for input.
    Read,
    /// Waiting for room in the output.
    Write,
    /// A nested suspendible call that itself suspended.
    Call,
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointKind::Read => write!(f, "read"),
            CheckpointKind::Write => write!(f, "write"),
            CheckpointKind::Call => write!(f, "call"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Ordinal label, starting at 1. Label 0 means "start from the top".
    pub label: u32,
    pub kind: CheckpointKind,
    /// Block starting with the suspending operation.
    pub block: BlockId,
    /// Block the dispatcher jumps to when resuming at this label.
    pub resume: BlockId,
    pub loc: SourceLoc,
    /// Locals stored in the continuation record while suspended here.
    pub saved: Vec<(Name, Type)>,
    /// Facts assumed on resume: the facts holding at the suspension point,
    /// projected onto the saved locals and the parameters.
    pub precondition: FactSet,
    /// Function whose continuation lives in the child slot.
    pub callee: Option<Name>,
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} at {} in {}", self.label, self.kind, self.loc, self.block)?;
        if let Some(callee) = &self.callee {
            write!(f, " -> {}", callee)?;
        }
        write!(f, " saves [")?;
        for (i, (name, ty)) in self.saved.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, ty)?;
        }
        write!(f, "] assumes {}", self.precondition)
    }
}

/// Storage needed by a continuation record of one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinuationLayout {
    /// Union of the locals saved at any checkpoint.
    pub locals: BTreeMap<Name, Type>,
    /// Nesting depth of continuation records, this function included.
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct LoweredFunction {
    pub name: String,
    /// Graph whose entry is the dispatch block.
    pub cfg: Cfg,
    pub checkpoints: Vec<Checkpoint>,
    pub layout: ContinuationLayout,
    /// In-state of every block of `cfg` after re-verification.
    pub states: Vec<Option<FactSet>>,
}

impl LoweredFunction {
    pub fn checkpoint(&self, label: u32) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.label == label)
    }

    /// Names of the suspendible functions called at a checkpoint.
    pub fn nested_callees(&self) -> impl Iterator<Item = &Name> {
        self.checkpoints.iter().filter_map(|c| c.callee.as_ref())
    }
}

impl std::fmt::Display for LoweredFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "; `{}`: {} checkpoints, depth {}",
            self.name,
            self.checkpoints.len(),
            self.layout.depth
        )?;
        for checkpoint in &self.checkpoints {
            writeln!(f, "; {}", checkpoint)?;
        }
        write!(f, "{}", self.cfg)
    }
}
