//! # Input Validation
//!
//! Checks applied to caller-supplied data before any store transaction
//! starts.
//!
//! - Reject blank identifiers and actors
//! - Enforce length limits
//! - Reject malformed approver lists

use crate::primitives::{MAX_APPROVERS, MAX_NOTE_LENGTH, MAX_SHORT_TEXT_LENGTH};
use crate::types::{Approver, PipelineError};
use std::collections::BTreeMap;

fn invalid(message: String) -> PipelineError {
    PipelineError::InvalidInput(message)
}

/// A required short field: non-blank and within `MAX_SHORT_TEXT_LENGTH`.
pub fn required_text(field: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{} must not be empty", field)));
    }
    if value.len() > MAX_SHORT_TEXT_LENGTH {
        return Err(invalid(format!(
            "{} exceeds {} bytes",
            field, MAX_SHORT_TEXT_LENGTH
        )));
    }
    Ok(())
}

/// An optional free-text field: within `MAX_NOTE_LENGTH` when present.
pub fn optional_note(field: &str, value: Option<&str>) -> Result<(), PipelineError> {
    match value {
        Some(text) if text.len() > MAX_NOTE_LENGTH => Err(invalid(format!(
            "{} exceeds {} bytes",
            field, MAX_NOTE_LENGTH
        ))),
        _ => Ok(()),
    }
}

/// A reason that must be present and non-blank (entering HOLD or DROP).
pub fn required_note(field: &str, value: Option<&str>) -> Result<(), PipelineError> {
    match value {
        Some(text) if !text.trim().is_empty() => optional_note(field, Some(text)),
        _ => Err(invalid(format!("{} is required", field))),
    }
}

/// Artifact keys are short text; references may be blank (blank counts as
/// missing in precondition checks) but not oversized.
pub fn artifacts(map: &BTreeMap<String, String>) -> Result<(), PipelineError> {
    for (key, reference) in map {
        required_text("artifact key", key)?;
        if reference.len() > MAX_SHORT_TEXT_LENGTH {
            return Err(invalid(format!(
                "artifact '{}' reference exceeds {} bytes",
                key, MAX_SHORT_TEXT_LENGTH
            )));
        }
    }
    Ok(())
}

/// A caller-supplied approver list must be non-empty, bounded, contain at
/// least one required slot, and not assign a user twice.
pub fn approvers(list: &[Approver]) -> Result<(), PipelineError> {
    if list.is_empty() {
        return Err(invalid("approver list must not be empty".to_string()));
    }
    if list.len() > MAX_APPROVERS {
        return Err(invalid(format!(
            "at most {} approvers are allowed",
            MAX_APPROVERS
        )));
    }
    if !list.iter().any(|a| a.required) {
        return Err(invalid(
            "approver list needs at least one required approver".to_string(),
        ));
    }
    let mut seen = std::collections::BTreeSet::new();
    for approver in list {
        if let Some(user) = &approver.user_id {
            required_text("approver user id", user)?;
        }
        if !seen.insert((approver.role, approver.principal())) {
            return Err(invalid(format!(
                "approver {} listed twice",
                approver.principal()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::ApproverRole;

    #[test]
    fn blank_and_oversized_text_rejected() {
        assert!(required_text("title", "  ").is_err());
        assert!(required_text("title", &"x".repeat(MAX_SHORT_TEXT_LENGTH + 1)).is_err());
        assert!(required_text("title", "Edge caching").is_ok());
    }

    #[test]
    fn notes() {
        assert!(optional_note("reason", None).is_ok());
        assert!(optional_note("reason", Some(&"x".repeat(MAX_NOTE_LENGTH + 1))).is_err());
        assert!(required_note("reason", None).is_err());
        assert!(required_note("reason", Some(" ")).is_err());
        assert!(required_note("reason", Some("budget freeze")).is_ok());
    }

    #[test]
    fn approver_lists() {
        assert!(approvers(&[]).is_err());
        assert!(approvers(&[Approver::optional(ApproverRole::DataTeam)]).is_err());
        assert!(
            approvers(&[
                Approver::required(ApproverRole::Executive),
                Approver::required(ApproverRole::Executive),
            ])
            .is_err()
        );
        assert!(
            approvers(&[
                Approver::required(ApproverRole::Executive).assigned_to("carol"),
                Approver::required(ApproverRole::Executive).assigned_to("dave"),
            ])
            .is_ok()
        );
    }

    #[test]
    fn artifact_keys_must_not_be_blank() {
        let mut map = BTreeMap::new();
        map.insert(" ".to_string(), "SIG-1".to_string());
        assert!(artifacts(&map).is_err());
    }
}
