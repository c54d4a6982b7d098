//! # Approval Request Engine
//!
//! Human-in-the-loop sign-off for gated stages.
//!
//! ## Lifecycle
//!
//! ```text
//! PENDING ──reject (any responder)──▶ REJECTED
//!    │
//!    ├──quorum of required approvers──▶ APPROVED ──▶ stage committed
//!    │
//!    └──deadline passed──▶ EXPIRED
//! ```
//!
//! Every operation runs in one store transaction. Decisions on the same
//! request are serialised by the store's single writer, so two concurrent
//! approvals cannot both complete a quorum and an approve racing a reject
//! settles on exactly one terminal status.

use crate::clock::Clock;
use crate::events::{EventSink, PipelineEvent, publish_all};
use crate::ids::next_approval_id;
use crate::orchestrator::{StageOrchestrator, TransitionCause};
use crate::pipeline::PipelineConfig;
use crate::primitives::{AUTO_EXPIRE_COMMENT, DROP_CLOSE_COMMENT, SYSTEM_ACTOR};
use crate::rules::{approval_type_for, default_approvers};
use crate::stage::Stage;
use crate::storage::{PipelineStore, StoreWrite};
use crate::transition::{check_transition, require_artifacts};
use crate::types::{
    ApprovalRequest, ApprovalRequestId, ApprovalResponse, ApprovalStatus, Approver, ApproverRole,
    Decision, Opportunity, OpportunityId, PipelineError, RecordKind, StageTransition,
};
use crate::validate;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// INPUTS AND OUTCOMES
// =============================================================================

/// Optional parameters of [`ApprovalService::request_approval`].
#[derive(Debug, Clone, Default)]
pub struct ApprovalOptions {
    pub reason: Option<String>,
    /// Artifacts submitted with the request; merged into the opportunity on
    /// approval.
    pub artifacts: BTreeMap<String, String>,
    /// Replaces the stage's approver template entirely.
    pub custom_approvers: Option<Vec<Approver>>,
    /// Users to assign to unassigned slots, by role.
    pub assignees: BTreeMap<ApproverRole, String>,
    /// Overrides the configured expiry window.
    pub expires_in: Option<Duration>,
}

/// Result of recording one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Quorum reached; the stage change was committed.
    Approved {
        request: ApprovalRequest,
        transition: StageTransition,
    },
    /// A rejection ended the request.
    Rejected { request: ApprovalRequest },
    /// Recorded; more required approvals are needed.
    QuorumNotReached {
        request: ApprovalRequest,
        outstanding_roles: Vec<ApproverRole>,
    },
}

impl DecisionOutcome {
    #[must_use]
    pub fn request(&self) -> &ApprovalRequest {
        match self {
            DecisionOutcome::Approved { request, .. }
            | DecisionOutcome::Rejected { request }
            | DecisionOutcome::QuorumNotReached { request, .. } => request,
        }
    }

    /// The request reached a terminal status.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !matches!(self, DecisionOutcome::QuorumNotReached { .. })
    }
}

/// What a decision transaction did. An overdue request is stamped EXPIRED
/// and committed before the caller sees the refusal.
enum Resolution {
    Decided(DecisionOutcome),
    Expired(ApprovalRequest),
}

// =============================================================================
// SERVICE
// =============================================================================

/// Creates approval requests, records decisions and expires stale requests.
#[derive(Debug)]
pub struct ApprovalService<S: PipelineStore> {
    store: S,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    orchestrator: StageOrchestrator,
    config: PipelineConfig,
}

impl<S: PipelineStore> ApprovalService<S> {
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Self {
        let orchestrator = StageOrchestrator::new(Arc::clone(&clock));
        Self {
            store,
            clock,
            events,
            orchestrator,
            config,
        }
    }

    /// Open a PENDING request for moving `opportunity_id` to `target`.
    ///
    /// Refused when the opportunity is missing, the move is illegal, the
    /// stage's artifacts are missing (from the opportunity and `options`
    /// combined), or a PENDING request for the same target already exists.
    /// An existing request that is past its deadline is expired first and
    /// does not count as a duplicate.
    pub fn request_approval(
        &self,
        opportunity_id: &OpportunityId,
        target: Stage,
        requested_by: &str,
        options: ApprovalOptions,
    ) -> Result<ApprovalRequest, PipelineError> {
        validate::required_text("requested_by", requested_by)?;
        validate::optional_note("reason", options.reason.as_deref())?;
        validate::artifacts(&options.artifacts)?;
        if let Some(custom) = &options.custom_approvers {
            validate::approvers(custom)?;
        }
        for user in options.assignees.values() {
            validate::required_text("assignee", user)?;
        }
        let expires_in = options.expires_in.unwrap_or(self.config.approval_expiry);
        if expires_in <= Duration::zero() {
            return Err(PipelineError::InvalidInput(
                "expiry window must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(expires_in)
            .ok_or_else(|| PipelineError::InvalidInput("expiry window too large".to_string()))?;

        let (request, swept) = self.store.write(|tx| {
            let opportunity = load_opportunity(tx, opportunity_id)?;
            check_transition(opportunity.current_stage, target)?;

            let mut combined = opportunity.stage_artifacts.clone();
            combined.extend(options.artifacts.clone());
            require_artifacts(target, &combined)?;

            let mut swept = Vec::new();
            for mut existing in tx.requests_for(opportunity_id)? {
                if !existing.is_pending() || existing.target_stage != target {
                    continue;
                }
                if existing.is_overdue(now) {
                    expire_in(tx, &mut existing, now)?;
                    swept.push(existing);
                } else {
                    return Err(PipelineError::DuplicatePendingRequest(existing.id));
                }
            }

            let approvers = assign_approvers(
                options
                    .custom_approvers
                    .clone()
                    .unwrap_or_else(|| default_approvers(target)),
                &opportunity,
                &options.assignees,
            );

            let request = ApprovalRequest {
                id: next_approval_id(tx, now)?,
                opportunity_id: opportunity.id.clone(),
                from_stage: opportunity.current_stage,
                target_stage: target,
                approval_type: approval_type_for(target),
                status: ApprovalStatus::Pending,
                approvers,
                responses: Vec::new(),
                requested_by: requested_by.to_string(),
                reason: options.reason.clone(),
                artifacts: options.artifacts.clone(),
                expires_at,
                created_at: now,
                completed_at: None,
                completed_by: None,
                completion_comments: None,
                version: 0,
            };
            tx.insert_request(&request)?;
            Ok((request, swept))
        })?;

        tracing::info!(
            request = %request.id,
            opportunity = %request.opportunity_id,
            target = %target,
            approvers = request.approvers.len(),
            expires_at = %request.expires_at,
            "approval requested"
        );

        let mut events: Vec<PipelineEvent> = swept.iter().map(expired_event).collect();
        events.push(PipelineEvent::ApprovalRequested {
            request_id: request.id.clone(),
            opportunity_id: request.opportunity_id.clone(),
            target_stage: target,
            approvers: request
                .approvers
                .iter()
                .map(|a| a.principal().to_string())
                .collect(),
        });
        publish_all(self.events.as_ref(), &events);
        Ok(request)
    }

    /// Record `responded_by`'s decision on a PENDING request.
    ///
    /// One rejection ends the request. An approval completes it once every
    /// required slot has an APPROVED response, and the stage change is then
    /// committed in the same transaction. A request past its deadline is
    /// stamped EXPIRED and the decision refused.
    pub fn process_decision(
        &self,
        request_id: &ApprovalRequestId,
        decision: Decision,
        responded_by: &str,
        comments: Option<String>,
    ) -> Result<DecisionOutcome, PipelineError> {
        validate::required_text("responded_by", responded_by)?;
        validate::optional_note("comments", comments.as_deref())?;
        let now = self.clock.now();

        let resolution = self.store.write(|tx| {
            let mut request = load_request(tx, request_id)?;
            if !request.is_pending() {
                return Err(PipelineError::InvalidRequestState(request.status));
            }
            if request.is_overdue(now) {
                expire_in(tx, &mut request, now)?;
                return Ok(Resolution::Expired(request));
            }

            request.responses.push(ApprovalResponse {
                user_id: responded_by.to_string(),
                decision,
                responded_at: now,
                comments: comments.clone(),
            });

            match decision {
                Decision::Rejected => {
                    complete(&mut request, ApprovalStatus::Rejected, responded_by, &comments, now);
                    tx.update_request(&mut request)?;
                    Ok(Resolution::Decided(DecisionOutcome::Rejected { request }))
                }
                Decision::Approved if request.quorum_reached() => {
                    complete(&mut request, ApprovalStatus::Approved, responded_by, &comments, now);
                    tx.update_request(&mut request)?;

                    let mut opportunity = load_opportunity(tx, &request.opportunity_id)?;
                    opportunity
                        .stage_artifacts
                        .extend(request.artifacts.clone());
                    let transition = self.orchestrator.commit(
                        tx,
                        &mut opportunity,
                        request.target_stage,
                        TransitionCause::Gate {
                            request_id: request.id.clone(),
                            approver: responded_by.to_string(),
                            comments: comments.clone(),
                        },
                    )?;
                    Ok(Resolution::Decided(DecisionOutcome::Approved {
                        request,
                        transition,
                    }))
                }
                Decision::Approved => {
                    tx.update_request(&mut request)?;
                    let outstanding_roles = request
                        .outstanding_required()
                        .iter()
                        .map(|a| a.role)
                        .collect();
                    Ok(Resolution::Decided(DecisionOutcome::QuorumNotReached {
                        request,
                        outstanding_roles,
                    }))
                }
            }
        })?;

        let outcome = match resolution {
            Resolution::Expired(request) => {
                tracing::info!(request = %request.id, "decision refused, request expired");
                publish_all(self.events.as_ref(), &[expired_event(&request)]);
                return Err(PipelineError::InvalidRequestState(ApprovalStatus::Expired));
            }
            Resolution::Decided(outcome) => outcome,
        };

        let request = outcome.request();
        let mut events = vec![PipelineEvent::ApprovalResponded {
            request_id: request.id.clone(),
            user_id: responded_by.to_string(),
            decision,
        }];
        if outcome.is_complete() {
            tracing::info!(
                request = %request.id,
                status = %request.status,
                by = responded_by,
                "approval request completed"
            );
            events.push(PipelineEvent::ApprovalCompleted {
                request_id: request.id.clone(),
                status: request.status,
                completed_by: responded_by.to_string(),
            });
        } else {
            tracing::debug!(request = %request.id, by = responded_by, "approval recorded, quorum not reached");
        }
        if let DecisionOutcome::Approved { transition, .. } = &outcome {
            events.push(PipelineEvent::StageChanged {
                opportunity_id: transition.opportunity_id.clone(),
                transition_id: transition.id.clone(),
                from: transition.from_stage,
                to: transition.to_stage,
                trigger: transition.trigger,
            });
        }
        publish_all(self.events.as_ref(), &events);
        Ok(outcome)
    }

    /// Expire every PENDING request whose deadline has passed.
    ///
    /// Each request is expired in its own transaction; a failure is logged and
    /// the sweep moves on. Returns the ids that were expired by this call, so a
    /// second run with nothing newly overdue returns an empty list.
    pub fn check_expired_requests(&self) -> Vec<ApprovalRequestId> {
        let now = self.clock.now();
        let pending = match self.store.read(|tx| tx.pending_requests()) {
            Ok(pending) => pending,
            Err(e) => {
                tracing::warn!(error = %e, "expiry sweep could not list pending requests");
                return Vec::new();
            }
        };

        let mut expired = Vec::new();
        for candidate in pending.into_iter().filter(|r| r.is_overdue(now)) {
            let result = self.store.write(|tx| {
                let mut request = load_request(tx, &candidate.id)?;
                // Re-checked: a decision may have landed since the listing.
                if !request.is_overdue(now) {
                    return Ok(None);
                }
                expire_in(tx, &mut request, now)?;
                Ok(Some(request))
            });
            match result {
                Ok(Some(request)) => {
                    publish_all(self.events.as_ref(), &[expired_event(&request)]);
                    expired.push(request.id);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(request = %candidate.id, error = %e, "failed to expire request");
                }
            }
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired approval requests");
        }
        expired
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get_request(&self, id: &ApprovalRequestId) -> Result<ApprovalRequest, PipelineError> {
        self.store.read(|tx| {
            tx.get_request(id)?
                .ok_or_else(|| PipelineError::not_found(RecordKind::ApprovalRequest, id))
        })
    }

    /// Every PENDING request, oldest first.
    pub fn pending_requests(&self) -> Result<Vec<ApprovalRequest>, PipelineError> {
        let mut pending = self.store.read(|tx| tx.pending_requests())?;
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pending)
    }

    pub fn requests_for_opportunity(
        &self,
        id: &OpportunityId,
    ) -> Result<Vec<ApprovalRequest>, PipelineError> {
        self.store.read(|tx| tx.requests_for(id))
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn load_opportunity(
    tx: &dyn StoreWrite,
    id: &OpportunityId,
) -> Result<Opportunity, PipelineError> {
    tx.get_opportunity(id)?
        .ok_or_else(|| PipelineError::not_found(RecordKind::Opportunity, id))
}

fn load_request(
    tx: &dyn StoreWrite,
    id: &ApprovalRequestId,
) -> Result<ApprovalRequest, PipelineError> {
    tx.get_request(id)?
        .ok_or_else(|| PipelineError::not_found(RecordKind::ApprovalRequest, id))
}

/// Fill unassigned slots: explicit assignees first, then the opportunity
/// owner for BD_OWNER. Slots left unassigned answer to their role code.
fn assign_approvers(
    mut approvers: Vec<Approver>,
    opportunity: &Opportunity,
    assignees: &BTreeMap<ApproverRole, String>,
) -> Vec<Approver> {
    for approver in approvers.iter_mut().filter(|a| a.user_id.is_none()) {
        approver.user_id = assignees.get(&approver.role).cloned().or_else(|| {
            (approver.role == ApproverRole::BdOwner)
                .then(|| opportunity.owner.clone())
                .flatten()
        });
    }
    approvers
}

fn complete(
    request: &mut ApprovalRequest,
    status: ApprovalStatus,
    by: &str,
    comments: &Option<String>,
    now: DateTime<Utc>,
) {
    request.status = status;
    request.completed_at = Some(now);
    request.completed_by = Some(by.to_string());
    request.completion_comments = comments.clone();
}

fn expire_in(
    tx: &mut dyn StoreWrite,
    request: &mut ApprovalRequest,
    now: DateTime<Utc>,
) -> Result<(), PipelineError> {
    complete(
        request,
        ApprovalStatus::Expired,
        SYSTEM_ACTOR,
        &Some(AUTO_EXPIRE_COMMENT.to_string()),
        now,
    );
    tx.update_request(request)
}

/// Reject every pending request on a dropped opportunity inside the drop's
/// own transaction. Returns the closed requests so the caller can publish
/// their completion after commit.
pub(crate) fn close_pending_on_drop(
    tx: &mut dyn StoreWrite,
    id: &OpportunityId,
    now: DateTime<Utc>,
) -> Result<Vec<ApprovalRequest>, PipelineError> {
    let mut closed = Vec::new();
    for mut request in tx.requests_for(id)? {
        if !request.is_pending() {
            continue;
        }
        complete(
            &mut request,
            ApprovalStatus::Rejected,
            SYSTEM_ACTOR,
            &Some(DROP_CLOSE_COMMENT.to_string()),
            now,
        );
        tx.update_request(&mut request)?;
        closed.push(request);
    }
    Ok(closed)
}

pub(crate) fn completed_event(request: &ApprovalRequest) -> PipelineEvent {
    PipelineEvent::ApprovalCompleted {
        request_id: request.id.clone(),
        status: request.status,
        completed_by: request.completed_by.clone().unwrap_or_default(),
    }
}

fn expired_event(request: &ApprovalRequest) -> PipelineEvent {
    PipelineEvent::ApprovalExpired {
        request_id: request.id.clone(),
        opportunity_id: request.opportunity_id.clone(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
