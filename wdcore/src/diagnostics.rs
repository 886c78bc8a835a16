//! User-facing report of a failed analysis.
use wdinstr::modules::operand::SourceLoc;

use crate::{
    prover::obligation::ObligationKind,
    utils::error::{CoreError, ErrorKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    /// Function the diagnostic belongs to, empty for unit-level problems.
    pub function: String,
    /// Declaration index of `function`, used for ordering.
    pub index: usize,
    pub loc: SourceLoc,
    pub message: String,
    /// Set for unprovable obligations.
    pub obligation: Option<ObligationKind>,
    /// The proposition that could not be proven, rendered.
    pub proposition: Option<String>,
    /// Facts known where the proof failed, rendered.
    pub facts: Option<String>,
}

impl Diagnostic {
    pub fn from_error(function: &str, index: usize, error: &CoreError) -> Self {
        let (obligation, proposition, facts) = match error {
            CoreError::UnprovableObligation {
                kind, prop, facts, ..
            } => (Some(*kind), Some(prop.to_string()), Some(facts.to_string())),
            _ => (None, None, None),
        };
        Self {
            kind: error.kind(),
            function: function.to_string(),
            index,
            loc: error.loc(),
            message: error.to_string(),
            obligation,
            proposition,
            facts,
        }
    }

    pub fn is_unprovable(&self) -> bool {
        self.kind.is_unprovable_obligation()
    }

    /// Ordering key: declaration order, then location.
    pub fn sort_key(&self) -> (usize, SourceLoc) {
        (self.index, self.loc)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "error[{}]: {}", self.kind, self.message)?;
        if let Some(facts) = &self.facts {
            write!(f, "\n  known facts: {}", facts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{Prop, Term, set::FactSet};

    #[test]
    fn unprovable_obligation_keeps_its_snapshot() {
        let error = CoreError::UnprovableObligation {
            function: "f".to_string(),
            loc: SourceLoc::new(3, 5),
            kind: ObligationKind::Overflow,
            prop: Prop::Holds(Term::binary(
                wdinstr::modules::int::BinaryOp::Le,
                Term::var("x"),
                Term::int(255),
            )),
            facts: Box::new(FactSet::new()),
        };
        let d = Diagnostic::from_error("f", 2, &error);
        assert!(d.is_unprovable());
        assert_eq!(d.obligation, Some(ObligationKind::Overflow));
        assert_eq!(d.sort_key(), (2, SourceLoc::new(3, 5)));
        assert!(d.proposition.is_some());
        assert!(d.to_string().starts_with("error[unprovable obligation]"));
    }

    #[test]
    fn other_errors_carry_no_proposition() {
        let error = CoreError::UnsupportedConstruct {
            function: "g".to_string(),
            loc: SourceLoc::UNKNOWN,
            message: "recursion".to_string(),
        };
        let d = Diagnostic::from_error("g", 0, &error);
        assert_eq!(d.kind, ErrorKind::UnsupportedConstruct);
        assert!(d.proposition.is_none());
        assert!(d.facts.is_none());
    }

    #[test]
    fn analysis_faults_are_internal() {
        let panicked = Diagnostic::from_error(
            "h",
            1,
            &CoreError::WorkerPanicked {
                function: "h".to_string(),
            },
        );
        assert_eq!(panicked.kind, ErrorKind::Internal);
        assert!(panicked.message.contains("`h`"));

        let missed = CoreError::UnanalysedBlock {
            function: "h".to_string(),
            block: wdinstr::modules::block::BlockId(4),
        };
        assert_eq!(missed.kind(), ErrorKind::Internal);
        assert_eq!(missed.loc(), SourceLoc::UNKNOWN);
    }
}
