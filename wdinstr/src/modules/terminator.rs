//! Block terminators.
//!
//! Every basic block ends with exactly one terminator describing where
//! control goes next. `Dispatch` only appears in lowered suspendible
//! functions, where it selects the resume point from the saved checkpoint
//! label.
use auto_enums::auto_enum;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::modules::{block::BlockId, operand::Expr};

/// Control flow terminator of a basic block
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Terminator {
    /// Unconditional jump.
    Jump { target: BlockId },
    /// Conditional branch on a boolean expression.
    Branch {
        cond: Expr,
        then_target: BlockId,
        else_target: BlockId,
    },
    /// Normal completion, optionally with a value.
    Return { value: Option<Expr> },
    /// Terminates with an error status.
    Fail { status: String },
    /// Jumps to `entry` when the saved label is 0, or to the resume block
    /// registered for the saved label otherwise.
    Dispatch {
        entry: BlockId,
        resumes: Vec<(u32, BlockId)>,
    },
}

impl Terminator {
    #[auto_enum(Iterator)]
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        match self {
            Terminator::Jump { target } => std::iter::once(*target),
            Terminator::Branch {
                then_target,
                else_target,
                ..
            } => [*then_target, *else_target].into_iter(),
            Terminator::Return { .. } | Terminator::Fail { .. } => std::iter::empty(),
            Terminator::Dispatch { entry, resumes } => {
                std::iter::once(*entry).chain(resumes.iter().map(|(_, b)| *b))
            }
        }
    }

    #[auto_enum(Iterator)]
    pub fn operands(&self) -> impl Iterator<Item = &Expr> {
        match self {
            Terminator::Branch { cond, .. } => std::iter::once(cond),
            Terminator::Return { value } => value.iter(),
            Terminator::Jump { .. } | Terminator::Fail { .. } | Terminator::Dispatch { .. } => {
                std::iter::empty()
            }
        }
    }

    /// Rewrites every successor through `f`.
    pub fn remap_targets(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Terminator::Jump { target } => *target = f(*target),
            Terminator::Branch {
                then_target,
                else_target,
                ..
            } => {
                *then_target = f(*then_target);
                *else_target = f(*else_target);
            }
            Terminator::Return { .. } | Terminator::Fail { .. } => {}
            Terminator::Dispatch { entry, resumes } => {
                *entry = f(*entry);
                for (_, b) in resumes.iter_mut() {
                    *b = f(*b);
                }
            }
        }
    }
}

impl std::fmt::Display for Terminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Terminator::Jump { target } => write!(f, "jump {}", target),
            Terminator::Branch {
                cond,
                then_target,
                else_target,
            } => write!(f, "branch {}, {}, {}", cond, then_target, else_target),
            Terminator::Return { value: Some(value) } => write!(f, "ret {}", value),
            Terminator::Return { value: None } => write!(f, "ret void"),
            Terminator::Fail { status } => write!(f, "fail {:?}", status),
            Terminator::Dispatch { entry, resumes } => {
                write!(f, "dispatch [0: {}", entry)?;
                for (label, block) in resumes {
                    write!(f, ", {}: {}", label, block)?;
                }
                write!(f, "]")
            }
        }
    }
}
