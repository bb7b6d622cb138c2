//! Pipeline stages
//!
//! A fixed five-stage sequence with two terminal states. Transitions are
//! checked against an explicit table; anything else is a sequencing bug.

use crate::error::PlanError;
use serde::{Deserialize, Serialize};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generating,
    Critiquing,
    Ranking,
    Executing,
    Validating,
    /// Terminal, pipeline ran to the end
    Completed,
    /// Terminal, a fatal error stopped the pipeline
    Failed,
}

impl Stage {
    /// All stages in pipeline order
    pub const ALL: [Stage; 7] = [
        Stage::Generating,
        Stage::Critiquing,
        Stage::Ranking,
        Stage::Executing,
        Stage::Validating,
        Stage::Completed,
        Stage::Failed,
    ];

    /// Check if terminal
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stage that follows on success
    #[inline]
    #[must_use]
    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Generating => Some(Self::Critiquing),
            Self::Critiquing => Some(Self::Ranking),
            Self::Ranking => Some(Self::Executing),
            Self::Executing => Some(Self::Validating),
            Self::Validating => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Name of the trace entry a completed stage appends
    #[inline]
    #[must_use]
    pub fn trace_name(&self) -> Option<&'static str> {
        match self {
            Self::Generating => Some("branch_generation"),
            Self::Critiquing => Some("branch_critique"),
            Self::Ranking => Some("branch_ranking"),
            Self::Executing => Some("patch_execution"),
            Self::Validating => Some("result_validation"),
            Self::Completed | Self::Failed => None,
        }
    }
}

/// Stages reachable from `from`
pub fn allowed_transitions(from: Stage) -> Vec<Stage> {
    use Stage::*;
    match from {
        Generating => vec![Critiquing, Failed],
        Critiquing => vec![Ranking, Failed],
        Ranking => vec![Executing, Failed],
        Executing => vec![Validating, Failed],
        Validating => vec![Completed, Failed],
        Completed => vec![],
        Failed => vec![],
    }
}

/// Check a transition against the table
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), PlanError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PlanError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn linear_path_is_allowed() {
        let mut stage = Stage::Generating;
        while let Some(next) = stage.next() {
            assert!(validate_transition(stage, next).is_ok());
            stage = next;
        }
        assert_eq!(stage, Stage::Completed);
    }

    #[test]
    fn skipping_stages_is_rejected() {
        assert!(validate_transition(Stage::Generating, Stage::Ranking).is_err());
        assert!(validate_transition(Stage::Ranking, Stage::Validating).is_err());
        assert!(validate_transition(Stage::Executing, Stage::Generating).is_err());
    }

    #[test]
    fn terminals_are_final() {
        for to in Stage::ALL {
            assert!(validate_transition(Stage::Completed, to).is_err());
            assert!(validate_transition(Stage::Failed, to).is_err());
        }
    }

    #[test]
    fn every_working_stage_can_fail() {
        for from in Stage::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(validate_transition(*from, Stage::Failed).is_ok());
            assert!(from.trace_name().is_some());
        }
    }

    proptest! {
        #[test]
        fn validate_agrees_with_table(from in 0usize..7, to in 0usize..7) {
            let (from, to) = (Stage::ALL[from], Stage::ALL[to]);
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }
    }
}
