use strum::{EnumIs, EnumTryAs};
use thiserror::Error;

use crate::modules::{
    block::BlockId,
    operand::{Name, SourceLoc},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumTryAs, Error)]
pub enum Error {
    /// A refined integer type does not fit its machine type.
    #[error(
        "The refinement `{range}` is not a non-empty sub-interval of the representable range of `{ty}`."
    )]
    RefinementOutOfRange { ty: String, range: String },

    /// A name is used before (or without) being declared.
    #[error(
        "Function `{function}` refers to `{name}` at {loc}, which is not a parameter nor a variable declared before this point."
    )]
    UndefinedVariable {
        function: String,
        name: Name,
        loc: SourceLoc,
    },

    /// A name is declared twice within the same function.
    #[error(
        "Function `{function}` declares `{name}` more than once (second declaration at {loc}). Variables are function-scoped and must be unique."
    )]
    DuplicateVariable {
        function: String,
        name: Name,
        loc: SourceLoc,
    },

    /// Parameters are immutable.
    #[error(
        "Function `{function}` assigns to its parameter `{name}` at {loc}. Parameters cannot be modified; copy them into a local variable first."
    )]
    ParameterAssignment {
        function: String,
        name: Name,
        loc: SourceLoc,
    },

    /// A `break` or `continue` with no enclosing loop.
    #[error("Function `{function}` has a `{kind}` outside of any loop at {loc}.")]
    JumpOutsideLoop {
        function: String,
        kind: String,
        loc: SourceLoc,
    },

    /// A `break` or `continue` names a loop label that does not enclose it.
    #[error(
        "Function `{function}` jumps to loop label `{label}` at {loc}, but no enclosing loop carries this label."
    )]
    UndefinedLoopLabel {
        function: String,
        label: Name,
        loc: SourceLoc,
    },

    /// Indexing, slicing or `length` applied to a non-sequence value.
    #[error(
        "Function `{function}` uses `{name}` as an array or slice at {loc}, but its type is `{ty}`."
    )]
    NotASequence {
        function: String,
        name: Name,
        ty: String,
        loc: SourceLoc,
    },

    /// Two functions of the same unit share a name.
    #[error("The function `{0}` is defined more than once within the unit.")]
    DuplicateFunction(String),

    /// A call refers to a function that is not defined within the unit.
    #[error(
        "Function `{function}` calls `{callee}` at {loc}, which is not defined within the unit."
    )]
    UndefinedFunction {
        function: String,
        callee: Name,
        loc: SourceLoc,
    },

    /// A terminator refers to a block that does not exist.
    #[error("The basic block `{block}` referenced in function `{function}` does not exist.")]
    UndefinedBasicBlock { function: String, block: BlockId },
}
