//! # Transition Validator
//!
//! Pure functions deciding whether a stage move is legal and whether the
//! artifacts a stage demands are present. Nothing here touches storage.
//!
//! Rules, evaluated in order:
//! 1. Leaving DROP is never allowed.
//! 2. Entering HOLD or DROP is always allowed.
//! 3. Leaving HOLD is allowed into any stage.
//! 4. Otherwise the move must be exactly one step forward.

use crate::rules::stage_rule;
use crate::stage::Stage;
use crate::types::PipelineError;
use std::collections::BTreeMap;

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionDenied {
    /// The opportunity is in DROP.
    Terminal,
    /// The target skips ahead; `required_next` is the only legal forward move.
    Skip { required_next: Stage },
    /// The target is the current stage or behind it.
    Backward,
    /// A stage code did not parse.
    InvalidStage(String),
}

impl std::fmt::Display for TransitionDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionDenied::Terminal => f.write_str("Cannot transition from DROP (terminal state)"),
            TransitionDenied::Skip { required_next } => write!(
                f,
                "Cannot skip stages; the next stage must be {}",
                required_next
            ),
            TransitionDenied::Backward => f.write_str("Cannot move backward in the pipeline"),
            TransitionDenied::InvalidStage(code) => write!(f, "Invalid stage: {}", code),
        }
    }
}

impl From<TransitionDenied> for PipelineError {
    fn from(denied: TransitionDenied) -> Self {
        PipelineError::InvalidTransition(denied.to_string())
    }
}

/// Typed transition check.
pub fn check_transition(from: Stage, to: Stage) -> Result<(), TransitionDenied> {
    if from == Stage::Drop {
        return Err(TransitionDenied::Terminal);
    }
    if matches!(to, Stage::Hold | Stage::Drop) {
        return Ok(());
    }
    if from == Stage::Hold {
        return Ok(());
    }

    let (Some(from_idx), Some(to_idx)) = (from.order_index(), to.order_index()) else {
        // Both absorbing states were handled above.
        return Err(TransitionDenied::InvalidStage(to.code().to_string()));
    };

    if to_idx == from_idx.saturating_add(1) {
        Ok(())
    } else if to_idx > from_idx {
        match from.next() {
            Some(required_next) => Err(TransitionDenied::Skip { required_next }),
            None => Err(TransitionDenied::Backward),
        }
    } else {
        Err(TransitionDenied::Backward)
    }
}

/// `(allowed, reason)` form of [`check_transition`].
#[must_use]
pub fn can_transition(from: Stage, to: Stage) -> (bool, Option<String>) {
    match check_transition(from, to) {
        Ok(()) => (true, None),
        Err(denied) => (false, Some(denied.to_string())),
    }
}

/// [`can_transition`] over raw stage codes; unknown codes are rejected as
/// invalid stages.
#[must_use]
pub fn can_transition_codes(from: &str, to: &str) -> (bool, Option<String>) {
    let parsed = from
        .parse::<Stage>()
        .and_then(|f| to.parse::<Stage>().map(|t| (f, t)));
    match parsed {
        Ok((from, to)) => can_transition(from, to),
        Err(unknown) => (
            false,
            Some(TransitionDenied::InvalidStage(unknown.0).to_string()),
        ),
    }
}

// =============================================================================
// ARTIFACT PRECONDITIONS
// =============================================================================

/// Required artifact keys for `target` that are absent or blank in `artifacts`.
#[must_use]
pub fn missing_artifacts(target: Stage, artifacts: &BTreeMap<String, String>) -> Vec<String> {
    stage_rule(target)
        .required_artifacts
        .iter()
        .filter(|key| {
            artifacts
                .get(**key)
                .is_none_or(|value| value.trim().is_empty())
        })
        .map(|key| (*key).to_string())
        .collect()
}

/// `(ok, missing)` form of the artifact precondition check.
#[must_use]
pub fn validate_artifacts(target: Stage, artifacts: &BTreeMap<String, String>) -> (bool, Vec<String>) {
    let missing = missing_artifacts(target, artifacts);
    (missing.is_empty(), missing)
}

/// Fails with `MissingArtifacts` when any required artifact is absent.
pub fn require_artifacts(
    target: Stage,
    artifacts: &BTreeMap<String, String>,
) -> Result<(), PipelineError> {
    let missing = missing_artifacts(target, artifacts);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::MissingArtifacts(missing))
    }
}

// =============================================================================
// TESTS
// =============================================================================
