use strum::{EnumIs, EnumIter};
use thiserror::Error;
use wdinstr::modules::{block::BlockId, operand::SourceLoc};

use crate::{
    facts::{Prop, set::FactSet},
    prover::obligation::ObligationKind,
};

/// Coarse classification of compile failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIs, EnumIter)]
pub enum ErrorKind {
    TypeMismatch,
    UnprovableObligation,
    UnsupportedConstruct,
    InconsistentFactSet,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::UnprovableObligation => "unprovable obligation",
            ErrorKind::UnsupportedConstruct => "unsupported construct",
            ErrorKind::InconsistentFactSet => "inconsistent fact set",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error, EnumIs)]
pub enum CoreError {
    #[error("{loc}: type mismatch in `{function}`: {message}")]
    TypeMismatch {
        function: String,
        loc: SourceLoc,
        message: String,
    },

    #[error("{loc}: cannot prove {kind} in `{function}`: {prop}")]
    UnprovableObligation {
        function: String,
        loc: SourceLoc,
        kind: ObligationKind,
        prop: Prop,
        facts: Box<FactSet>,
    },

    #[error("{loc}: unsupported construct in `{function}`: {message}")]
    UnsupportedConstruct {
        function: String,
        loc: SourceLoc,
        message: String,
    },

    #[error("{loc}: inconsistent facts in `{function}`: {message}")]
    InconsistentFactSet {
        function: String,
        loc: SourceLoc,
        message: String,
    },

    #[error("block {block} of `{function}` is reachable but was never analysed")]
    UnanalysedBlock { function: String, block: BlockId },

    #[error("the worker analysing `{function}` panicked")]
    WorkerPanicked { function: String },

    #[error("Malformed program: {0}")]
    Ir(#[from] wdinstr::utils::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file '{file}': {source}")]
    ConfigParseError {
        source: toml::de::Error,
        file: String,
    },

    #[error("An unknown error occurred: {0}")]
    Unknown(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            CoreError::UnprovableObligation { .. } => ErrorKind::UnprovableObligation,
            CoreError::UnsupportedConstruct { .. } => ErrorKind::UnsupportedConstruct,
            CoreError::InconsistentFactSet { .. } => ErrorKind::InconsistentFactSet,
            CoreError::Ir(e) => match e {
                wdinstr::utils::Error::RefinementOutOfRange { .. }
                | wdinstr::utils::Error::NotASequence { .. } => ErrorKind::TypeMismatch,
                _ => ErrorKind::UnsupportedConstruct,
            },
            CoreError::UnanalysedBlock { .. } | CoreError::WorkerPanicked { .. } => ErrorKind::Internal,
            CoreError::IoError(_) | CoreError::ConfigParseError { .. } | CoreError::Unknown(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Location the error points at, when it has one.
    pub fn loc(&self) -> SourceLoc {
        match self {
            CoreError::TypeMismatch { loc, .. }
            | CoreError::UnprovableObligation { loc, .. }
            | CoreError::UnsupportedConstruct { loc, .. }
            | CoreError::InconsistentFactSet { loc, .. } => *loc,
            CoreError::Ir(wdinstr::utils::Error::UndefinedVariable { loc, .. })
            | CoreError::Ir(wdinstr::utils::Error::DuplicateVariable { loc, .. })
            | CoreError::Ir(wdinstr::utils::Error::ParameterAssignment { loc, .. })
            | CoreError::Ir(wdinstr::utils::Error::JumpOutsideLoop { loc, .. })
            | CoreError::Ir(wdinstr::utils::Error::UndefinedLoopLabel { loc, .. })
            | CoreError::Ir(wdinstr::utils::Error::NotASequence { loc, .. })
            | CoreError::Ir(wdinstr::utils::Error::UndefinedFunction { loc, .. }) => *loc,
            _ => SourceLoc::UNKNOWN,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
