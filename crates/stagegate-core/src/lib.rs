//! # stagegate-core
//!
//! The opportunity stage pipeline engine for stagegate - THE RULES.
//!
//! An opportunity moves through nine ordered forward stages, may be parked
//! in HOLD or abandoned in DROP, and enters gated stages only after
//! human-in-the-loop sign-off. Every stage change leaves an immutable audit
//! record written in the same transaction as the stage itself.
//!
//! ## Layers
//!
//! - `stage`, `rules`, `transition`: pure policy (no state, no I/O)
//! - `storage`: transactional record store (in-memory or redb)
//! - `orchestrator`: the single writer of `current_stage`
//! - `approval`: approval requests, decisions, expiry
//! - `pipeline`: the facade tying them together
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - Time is read through an injected `Clock`
//! - Notifications leave through an injected `EventSink`

// =============================================================================
// MODULES
// =============================================================================

pub mod approval;
pub mod clock;
pub mod events;
pub mod ids;
pub mod orchestrator;
pub mod pipeline;
pub mod primitives;
pub mod rules;
pub mod stage;
pub mod storage;
pub mod transition;
pub mod types;
pub mod validate;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use stage::{ALL_STAGES, FORWARD_STAGES, Stage, UnknownStage};
pub use types::{
    ApprovalRequest, ApprovalRequestId, ApprovalResponse, ApprovalStatus, ApprovalType, Approver,
    ApproverRole, Decision, GateDecision, GateDecisionRecord, Opportunity, OpportunityId,
    PipelineError, RecordKind, StageTransition, TransitionId, TriggerKind,
};

// =============================================================================
// RE-EXPORTS: Policy
// =============================================================================

pub use rules::{
    ApprovalRequirement, StageRule, all_rules, approval_type_for, default_approvers, stage_rule,
};
pub use transition::{
    TransitionDenied, can_transition, can_transition_codes, check_transition, require_artifacts,
    validate_artifacts,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use approval::{ApprovalOptions, ApprovalService, DecisionOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{EventSink, MemorySink, NullSink, PipelineEvent, TracingSink};
pub use orchestrator::{StageOrchestrator, TransitionCause, consistency_violations};
pub use pipeline::{
    NewOpportunity, Pipeline, PipelineConfig, SlaStatus, TransitionOutcome, TransitionRequest,
};
pub use storage::{MemoryStore, PipelineStore, RedbStore, StorageBackend, StoreRead, StoreWrite};
