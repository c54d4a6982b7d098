//! # Pipeline Primitives
//!
//! Hardcoded runtime constants for the stagegate engine.
//! These are compiled into the binary and are immutable at runtime.

/// Default lifetime of an approval request before the sweep expires it.
pub const DEFAULT_APPROVAL_EXPIRY_DAYS: i64 = 7;

/// Comment stamped on requests expired by the sweep.
pub const AUTO_EXPIRE_COMMENT: &str = "Auto-expired: no decision before deadline";

/// Comment stamped on pending requests closed because the opportunity was dropped.
pub const DROP_CLOSE_COMMENT: &str = "Opportunity dropped";

/// Actor recorded on system-driven changes.
pub const SYSTEM_ACTOR: &str = "system";

/// Identifier prefixes.
pub const OPPORTUNITY_PREFIX: &str = "OPP";
pub const TRANSITION_PREFIX: &str = "TRN";
pub const APPROVAL_PREFIX: &str = "APR";

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for titles, actor names and artifact keys.
pub const MAX_SHORT_TEXT_LENGTH: usize = 256;

/// Maximum length for reasons, comments and notes.
pub const MAX_NOTE_LENGTH: usize = 4096;

/// Maximum number of approver slots on one request.
pub const MAX_APPROVERS: usize = 16;
