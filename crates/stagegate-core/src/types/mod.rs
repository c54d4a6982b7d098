//! # Core Type Definitions
//!
//! This module contains the records the pipeline engine moves around:
//! - Identifiers (`OpportunityId`, `TransitionId`, `ApprovalRequestId`)
//! - The tracked entity (`Opportunity`) and its typed side records
//! - The immutable audit record (`StageTransition`)
//! - The HITL gate (`ApprovalRequest`, `Approver`, `ApprovalResponse`)
//! - Error types (`PipelineError`)
//!
//! Side records are explicit structs rather than open maps so that the
//! gate decision log and the approver list are checked at compile time.

use crate::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Opportunity identifier, `OPP-<year>-<NNN>`.
    OpportunityId
);
string_id!(
    /// Stage transition identifier, `TRN-<year>-<timestamp>-<seq>`.
    TransitionId
);
string_id!(
    /// Approval request identifier, `APR-<year>-<timestamp>-<seq>`.
    ApprovalRequestId
);

// =============================================================================
// ENUMERATIONS
// =============================================================================

/// What caused a stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    /// Committed by the system without a human decision.
    Auto,
    /// Committed directly on a user's request.
    Manual,
    /// Committed because an approval request reached quorum.
    Gate,
}

/// Outcome recorded for a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateDecision {
    Go,
    Hold,
    Stop,
}

/// Lifecycle of an approval request. Every state except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// A single approver's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Rejected,
}

impl FromStr for Decision {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" | "go" => Ok(Decision::Approved),
            "rejected" | "reject" | "stop" => Ok(Decision::Rejected),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown decision '{}'",
                other
            ))),
        }
    }
}

/// Kind of approval, derived from the requested stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalType {
    Gate1,
    Gate2,
    BizPlan,
    PreProposal,
    Handoff,
    StageAdvance,
}

/// Organisational role an approver slot is reserved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApproverRole {
    BdOwner,
    DataTeam,
    SecurityTeam,
    Executive,
    ReceivingTeam,
    PipelineAdmin,
}

impl ApproverRole {
    /// Role code. Doubles as the principal of an unassigned approver slot.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ApproverRole::BdOwner => "BD_OWNER",
            ApproverRole::DataTeam => "DATA_TEAM",
            ApproverRole::SecurityTeam => "SECURITY_TEAM",
            ApproverRole::Executive => "EXECUTIVE",
            ApproverRole::ReceivingTeam => "RECEIVING_TEAM",
            ApproverRole::PipelineAdmin => "PIPELINE_ADMIN",
        }
    }
}

impl std::fmt::Display for ApproverRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ApproverRole {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let roles = [
            ApproverRole::BdOwner,
            ApproverRole::DataTeam,
            ApproverRole::SecurityTeam,
            ApproverRole::Executive,
            ApproverRole::ReceivingTeam,
            ApproverRole::PipelineAdmin,
        ];
        roles
            .into_iter()
            .find(|r| r.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PipelineError::InvalidInput(format!("unknown approver role '{}'", s)))
    }
}

// =============================================================================
// OPPORTUNITY
// =============================================================================

/// One entry in an opportunity's gate decision log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecisionRecord {
    pub decision: GateDecision,
    pub approver: String,
    pub decided_at: DateTime<Utc>,
    pub comments: Option<String>,
    pub request_id: Option<ApprovalRequestId>,
}

/// The pipeline-tracked business record.
///
/// `current_stage` is only ever changed by the orchestrator; everything else
/// reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: OpportunityId,
    pub title: String,
    pub description: Option<String>,
    /// Business owner; fills the BD_OWNER approver slot by default.
    pub owner: Option<String>,
    pub current_stage: Stage,
    pub signal_id: Option<String>,
    pub brief_id: Option<String>,
    /// Artifact key -> reference, consulted by stage preconditions.
    pub stage_artifacts: BTreeMap<String, String>,
    /// Gate key (target stage code) -> append-only decision log.
    pub gate_decisions: BTreeMap<String, Vec<GateDecisionRecord>>,
    pub hold_reason: Option<String>,
    pub drop_reason: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-lock counter, bumped by the store on every update.
    pub version: u64,
}

impl Opportunity {
    /// Neither on hold nor dropped.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.current_stage.is_absorbing()
    }

    /// 1-based position in the forward pipeline, `None` for HOLD and DROP.
    #[must_use]
    pub fn stage_number(&self) -> Option<u8> {
        self.current_stage
            .order_index()
            .map(|i| (i as u8).saturating_add(1))
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.current_stage.is_terminal()
    }

    /// Look up an artifact reference by key.
    #[must_use]
    pub fn artifact(&self, key: &str) -> Option<&str> {
        self.stage_artifacts.get(key).map(String::as_str)
    }
}

// =============================================================================
// STAGE TRANSITION
// =============================================================================

/// Immutable audit record of one stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub id: TransitionId,
    pub opportunity_id: OpportunityId,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub trigger: TriggerKind,
    pub gate_decision: Option<GateDecision>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approval_request_id: Option<ApprovalRequestId>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// APPROVAL REQUEST
// =============================================================================

/// An approver slot on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub role: ApproverRole,
    pub required: bool,
    pub user_id: Option<String>,
}

impl Approver {
    #[must_use]
    pub fn required(role: ApproverRole) -> Self {
        Self {
            role,
            required: true,
            user_id: None,
        }
    }

    #[must_use]
    pub fn optional(role: ApproverRole) -> Self {
        Self {
            role,
            required: false,
            user_id: None,
        }
    }

    #[must_use]
    pub fn assigned_to(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Identity a response must carry to count for this slot: the assigned
    /// user, or the role code when nobody is assigned.
    #[must_use]
    pub fn principal(&self) -> &str {
        self.user_id.as_deref().unwrap_or(self.role.code())
    }
}

/// One recorded answer on a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub user_id: String,
    pub decision: Decision,
    pub responded_at: DateTime<Utc>,
    pub comments: Option<String>,
}

/// A pending or resolved HITL gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub opportunity_id: OpportunityId,
    pub from_stage: Stage,
    pub target_stage: Stage,
    pub approval_type: ApprovalType,
    pub status: ApprovalStatus,
    pub approvers: Vec<Approver>,
    /// Append-only.
    pub responses: Vec<ApprovalResponse>,
    pub requested_by: String,
    pub reason: Option<String>,
    pub artifacts: BTreeMap<String, String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub completion_comments: Option<String>,
    /// Optimistic-lock counter, bumped by the store on every update.
    pub version: u64,
}

impl ApprovalRequest {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Pending and past its deadline.
    #[must_use]
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.expires_at < now
    }

    /// Required slots that have no matching APPROVED response yet.
    #[must_use]
    pub fn outstanding_required(&self) -> Vec<&Approver> {
        self.approvers
            .iter()
            .filter(|a| a.required)
            .filter(|a| {
                !self
                    .responses
                    .iter()
                    .any(|r| r.decision == Decision::Approved && r.user_id == a.principal())
            })
            .collect()
    }

    /// Every required slot has been approved. Optional slots never gate.
    #[must_use]
    pub fn quorum_reached(&self) -> bool {
        self.outstanding_required().is_empty()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Which record a lookup or update concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Opportunity,
    Transition,
    ApprovalRequest,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordKind::Opportunity => "Opportunity",
            RecordKind::Transition => "Stage transition",
            RecordKind::ApprovalRequest => "Approval request",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in the pipeline engine.
///
/// Every variant is surfaced to the caller unchanged; nothing is retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    /// Stage order violated, or the opportunity is in DROP.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// The target stage's required artifacts are absent.
    #[error("Missing required artifacts: {}", .0.join(", "))]
    MissingArtifacts(Vec<String>),

    /// An approval request is already outstanding for this opportunity and stage.
    #[error("Duplicate pending approval request: {0}")]
    DuplicatePendingRequest(ApprovalRequestId),

    /// A decision was submitted on a request that is no longer pending.
    #[error("Approval request is not pending (status: {0})")]
    InvalidRequestState(ApprovalStatus),

    /// Caller-supplied data failed validation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The stored record changed since it was read.
    #[error("Concurrent update on {kind} {id}")]
    Conflict { kind: RecordKind, id: String },

    /// The persistence backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub(crate) fn not_found(kind: RecordKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
