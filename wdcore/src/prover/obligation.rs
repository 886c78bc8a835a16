use strum::{EnumIs, EnumIter};
use wdinstr::modules::operand::SourceLoc;

use crate::facts::{Context, Prop, rules::Prover, set::FactSet};

/// Why a proposition has to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs, EnumIter)]
pub enum ObligationKind {
    /// Result of checked arithmetic exceeds the maximum of its type.
    Overflow,
    /// Result of checked arithmetic goes below the minimum of its type.
    Underflow,
    DivisionByZero,
    ShiftAmount,
    IndexBounds,
    SliceBounds,
    CastRange,
    AssignmentRange,
    Assertion,
    LoopPrecondition,
    LoopPostcondition,
    /// Invariant on the edge entering a loop.
    LoopInvariantEntry,
    /// Invariant on a back edge.
    LoopInvariantPreserved,
    /// The loop analysis did not stabilise within the iteration cap.
    LoopConvergence,
    CalleePrecondition,
    ArgumentRange,
    Postcondition,
    ReturnRange,
    WriteRange,
}

impl std::fmt::Display for ObligationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ObligationKind::Overflow => "overflow",
            ObligationKind::Underflow => "underflow",
            ObligationKind::DivisionByZero => "division by zero",
            ObligationKind::ShiftAmount => "shift amount",
            ObligationKind::IndexBounds => "index bounds",
            ObligationKind::SliceBounds => "slice bounds",
            ObligationKind::CastRange => "cast range",
            ObligationKind::AssignmentRange => "assignment range",
            ObligationKind::Assertion => "assertion",
            ObligationKind::LoopPrecondition => "loop precondition",
            ObligationKind::LoopPostcondition => "loop postcondition",
            ObligationKind::LoopInvariantEntry => "loop invariant on entry",
            ObligationKind::LoopInvariantPreserved => "loop invariant preservation",
            ObligationKind::LoopConvergence => "loop convergence",
            ObligationKind::CalleePrecondition => "callee precondition",
            ObligationKind::ArgumentRange => "argument range",
            ObligationKind::Postcondition => "postcondition",
            ObligationKind::ReturnRange => "return range",
            ObligationKind::WriteRange => "written byte range",
        };
        write!(f, "{}", s)
    }
}

/// A proposition tied to the source location requiring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obligation {
    pub kind: ObligationKind,
    pub prop: Prop,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Proven,
    Failed,
}

impl Resolution {
    pub fn is_proven(&self) -> bool {
        matches!(self, Resolution::Proven)
    }
}

impl Obligation {
    pub fn new(kind: ObligationKind, prop: Prop, loc: SourceLoc) -> Self {
        Self { kind, prop, loc }
    }

    /// Runs the prover against `facts`.
    pub fn resolve(&self, facts: &FactSet, ctx: &Context<'_>) -> Resolution {
        if Prover::new(facts, *ctx).prove(&self.prop) {
            Resolution::Proven
        } else {
            Resolution::Failed
        }
    }
}
