//! # Pipeline Facade
//!
//! The entry point callers use: create opportunities, attach artifacts,
//! request stage moves and read state back. A move into a stage that needs
//! sign-off becomes an approval request; anything else is committed directly
//! by the orchestrator.

use crate::approval::{
    ApprovalOptions, ApprovalService, close_pending_on_drop, completed_event,
};
use crate::clock::{Clock, SystemClock};
use crate::events::{EventSink, PipelineEvent, TracingSink, publish_all};
use crate::ids::next_opportunity_id;
use crate::orchestrator::{StageOrchestrator, TransitionCause, consistency_violations};
use crate::primitives::DEFAULT_APPROVAL_EXPIRY_DAYS;
use crate::rules::{ApprovalRequirement, stage_rule};
use crate::stage::Stage;
use crate::storage::{PipelineStore, StoreRead};
use crate::transition::{check_transition, missing_artifacts, require_artifacts};
use crate::types::{
    ApprovalRequest, ApproverRole, Opportunity, OpportunityId, PipelineError, RecordKind,
    StageTransition,
};
use crate::validate;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Lifetime of an approval request unless the caller overrides it.
    pub approval_expiry: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            approval_expiry: Duration::days(DEFAULT_APPROVAL_EXPIRY_DAYS),
        }
    }
}

impl PipelineConfig {
    /// Config with a custom expiry window; `days` must be positive.
    pub fn with_expiry_days(days: i64) -> Result<Self, PipelineError> {
        if days <= 0 {
            return Err(PipelineError::InvalidInput(format!(
                "approval expiry must be at least one day, got {}",
                days
            )));
        }
        let approval_expiry = Duration::try_days(days).ok_or_else(|| {
            PipelineError::InvalidInput(format!("approval expiry of {} days is too large", days))
        })?;
        Ok(Self { approval_expiry })
    }
}

// =============================================================================
// INPUTS AND OUTPUTS
// =============================================================================

/// Fields of a new opportunity.
#[derive(Debug, Clone, Default)]
pub struct NewOpportunity {
    pub title: String,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub signal_id: Option<String>,
    pub brief_id: Option<String>,
    pub created_by: String,
}

/// Parameters of a stage move.
#[derive(Debug, Clone, Default)]
pub struct TransitionRequest {
    /// Notes for the transition; required when entering HOLD or DROP.
    pub reason: Option<String>,
    /// Artifacts supplied with the move.
    pub artifacts: BTreeMap<String, String>,
    /// Ask for sign-off on a stage whose approval is optional.
    pub force_approval: bool,
    /// Users for approver slots, by role.
    pub assignees: BTreeMap<ApproverRole, String>,
    pub expires_in: Option<Duration>,
}

/// What a stage move request resulted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "record", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Committed(StageTransition),
    AwaitingApproval(ApprovalRequest),
}

/// Time an opportunity has spent in its current stage against the stage SLA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlaStatus {
    pub opportunity_id: OpportunityId,
    pub stage: Stage,
    pub entered_at: DateTime<Utc>,
    pub days_in_stage: i64,
    /// Zero means the stage has no SLA.
    pub sla_days: u32,
    pub breached: bool,
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Opportunity pipeline over a store.
#[derive(Debug)]
pub struct Pipeline<S: PipelineStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    orchestrator: StageOrchestrator,
    approvals: ApprovalService<Arc<S>>,
}

impl<S: PipelineStore> Pipeline<S> {
    pub fn new(
        store: S,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Self {
        let store = Arc::new(store);
        let approvals = ApprovalService::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&events),
            config,
        );
        Self {
            orchestrator: StageOrchestrator::new(Arc::clone(&clock)),
            store,
            clock,
            events,
            approvals,
        }
    }

    /// System clock, tracing events, default config.
    pub fn with_defaults(store: S) -> Self {
        Self::new(
            store,
            Arc::new(SystemClock),
            Arc::new(TracingSink),
            PipelineConfig::default(),
        )
    }

    /// The approval engine sharing this pipeline's store.
    pub fn approvals(&self) -> &ApprovalService<Arc<S>> {
        &self.approvals
    }

    /// Create an opportunity at Discovery.
    ///
    /// `signal_id` and `brief_id` are also recorded as artifacts so the stage
    /// preconditions can see them.
    pub fn create_opportunity(&self, new: NewOpportunity) -> Result<Opportunity, PipelineError> {
        validate::required_text("title", &new.title)?;
        validate::required_text("created_by", &new.created_by)?;
        validate::optional_note("description", new.description.as_deref())?;
        for (field, value) in [
            ("owner", &new.owner),
            ("signal_id", &new.signal_id),
            ("brief_id", &new.brief_id),
        ] {
            if let Some(value) = value {
                validate::required_text(field, value)?;
            }
        }

        let now = self.clock.now();
        let opportunity = self.store.write(|tx| {
            let mut stage_artifacts = BTreeMap::new();
            if let Some(signal) = &new.signal_id {
                stage_artifacts.insert("signal_id".to_string(), signal.clone());
            }
            if let Some(brief) = &new.brief_id {
                stage_artifacts.insert("brief_id".to_string(), brief.clone());
            }
            let opportunity = Opportunity {
                id: next_opportunity_id(tx, now)?,
                title: new.title.trim().to_string(),
                description: new.description.clone(),
                owner: new.owner.clone(),
                current_stage: Stage::Discovery,
                signal_id: new.signal_id.clone(),
                brief_id: new.brief_id.clone(),
                stage_artifacts,
                gate_decisions: BTreeMap::new(),
                hold_reason: None,
                drop_reason: None,
                created_by: new.created_by.clone(),
                created_at: now,
                updated_at: now,
                version: 0,
            };
            tx.insert_opportunity(&opportunity)?;
            Ok(opportunity)
        })?;

        tracing::info!(opportunity = %opportunity.id, title = %opportunity.title, "opportunity created");
        publish_all(
            self.events.as_ref(),
            &[PipelineEvent::OpportunityCreated {
                opportunity_id: opportunity.id.clone(),
                title: opportunity.title.clone(),
            }],
        );
        Ok(opportunity)
    }

    /// Record an artifact reference on an opportunity, replacing any earlier
    /// reference under the same key. Dropped opportunities are frozen.
    pub fn attach_artifact(
        &self,
        id: &OpportunityId,
        key: &str,
        reference: &str,
        actor: &str,
    ) -> Result<Opportunity, PipelineError> {
        validate::required_text("artifact key", key)?;
        validate::required_text("artifact reference", reference)?;
        validate::required_text("actor", actor)?;

        let now = self.clock.now();
        let opportunity = self.store.write(|tx| {
            let mut opportunity = load(&*tx, id)?;
            if opportunity.is_terminal() {
                return Err(PipelineError::InvalidInput(format!(
                    "{} is dropped; artifacts are frozen",
                    id
                )));
            }
            opportunity
                .stage_artifacts
                .insert(key.to_string(), reference.to_string());
            match key {
                "signal_id" => opportunity.signal_id = Some(reference.to_string()),
                "brief_id" => opportunity.brief_id = Some(reference.to_string()),
                _ => {}
            }
            opportunity.updated_at = now;
            tx.update_opportunity(&mut opportunity)?;
            Ok(opportunity)
        })?;

        tracing::info!(opportunity = %id, key, actor, "artifact attached");
        Ok(opportunity)
    }

    /// Ask to move an opportunity to `target`.
    ///
    /// Legality and artifact preconditions are checked first. A stage with
    /// required approval (or optional approval plus `force_approval`) opens
    /// an approval request; every other move is committed at once. A move to
    /// DROP also rejects the opportunity's pending requests in that commit.
    pub fn request_transition(
        &self,
        id: &OpportunityId,
        target: Stage,
        actor: &str,
        request: TransitionRequest,
    ) -> Result<TransitionOutcome, PipelineError> {
        validate::required_text("actor", actor)?;
        validate::artifacts(&request.artifacts)?;
        if target.is_absorbing() {
            validate::required_note("reason", request.reason.as_deref())?;
        } else {
            validate::optional_note("reason", request.reason.as_deref())?;
        }

        let needs_approval = match stage_rule(target).approval {
            ApprovalRequirement::Required => true,
            ApprovalRequirement::Optional => request.force_approval,
            ApprovalRequirement::None => false,
        };
        if needs_approval {
            let pending = self.approvals.request_approval(
                id,
                target,
                actor,
                ApprovalOptions {
                    reason: request.reason,
                    artifacts: request.artifacts,
                    custom_approvers: None,
                    assignees: request.assignees,
                    expires_in: request.expires_in,
                },
            )?;
            return Ok(TransitionOutcome::AwaitingApproval(pending));
        }

        let now = self.clock.now();
        let (transition, closed) = self.store.write(|tx| {
            let mut opportunity = load(&*tx, id)?;
            check_transition(opportunity.current_stage, target)?;
            let mut combined = opportunity.stage_artifacts.clone();
            combined.extend(request.artifacts.clone());
            require_artifacts(target, &combined)?;
            opportunity.stage_artifacts = combined;

            let transition = self.orchestrator.commit(
                tx,
                &mut opportunity,
                target,
                TransitionCause::Manual {
                    actor: actor.to_string(),
                    notes: request.reason.clone(),
                },
            )?;
            // A dropped opportunity can never move again, so nothing may stay pending on it.
            let closed = if target == Stage::Drop {
                close_pending_on_drop(tx, id, now)?
            } else {
                Vec::new()
            };
            Ok((transition, closed))
        })?;

        self.publish_stage_change(&transition);
        if !closed.is_empty() {
            tracing::info!(
                opportunity = %id,
                closed = closed.len(),
                "pending approval requests closed by drop"
            );
            let events: Vec<PipelineEvent> = closed.iter().map(completed_event).collect();
            publish_all(self.events.as_ref(), &events);
        }
        Ok(TransitionOutcome::Committed(transition))
    }

    /// Advance to the next forward stage when it needs no sign-off and its
    /// artifacts are present. Returns `None` when nothing could be advanced.
    pub fn auto_advance(
        &self,
        id: &OpportunityId,
    ) -> Result<Option<StageTransition>, PipelineError> {
        let transition = self.store.write(|tx| {
            let mut opportunity = load(&*tx, id)?;
            let Some(next) = opportunity.current_stage.next() else {
                return Ok(None);
            };
            if stage_rule(next).approval != ApprovalRequirement::None
                || !missing_artifacts(next, &opportunity.stage_artifacts).is_empty()
            {
                return Ok(None);
            }
            self.orchestrator
                .commit(tx, &mut opportunity, next, TransitionCause::Auto)
                .map(Some)
        })?;

        if let Some(transition) = &transition {
            self.publish_stage_change(transition);
        }
        Ok(transition)
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn get_opportunity(&self, id: &OpportunityId) -> Result<Opportunity, PipelineError> {
        self.store.read(|tx| load(tx, id))
    }

    /// All opportunities, ordered by id.
    pub fn list_opportunities(&self) -> Result<Vec<Opportunity>, PipelineError> {
        self.store.read(|tx| tx.list_opportunities())
    }

    /// Audit log of one opportunity, oldest first.
    pub fn transitions_for(
        &self,
        id: &OpportunityId,
    ) -> Result<Vec<StageTransition>, PipelineError> {
        self.store.read(|tx| {
            load(tx, id)?;
            tx.transitions_for(id)
        })
    }

    /// Audit invariant violations for one opportunity; empty means consistent.
    pub fn verify_consistency(&self, id: &OpportunityId) -> Result<Vec<String>, PipelineError> {
        self.store.read(|tx| {
            let opportunity = load(tx, id)?;
            let transitions = tx.transitions_for(id)?;
            Ok(consistency_violations(&opportunity, &transitions))
        })
    }

    /// Time in the current stage as of `now`.
    pub fn sla_status(
        &self,
        id: &OpportunityId,
        now: DateTime<Utc>,
    ) -> Result<SlaStatus, PipelineError> {
        let (opportunity, transitions) =
            self.store.read(|tx| Ok((load(tx, id)?, tx.transitions_for(id)?)))?;
        let entered_at = transitions
            .last()
            .map(|t| t.created_at)
            .unwrap_or(opportunity.created_at);
        let days_in_stage = (now - entered_at).num_days().max(0);
        let sla_days = stage_rule(opportunity.current_stage).sla_days;
        Ok(SlaStatus {
            opportunity_id: opportunity.id,
            stage: opportunity.current_stage,
            entered_at,
            days_in_stage,
            sla_days,
            breached: sla_days > 0 && days_in_stage > i64::from(sla_days),
        })
    }

    fn publish_stage_change(&self, transition: &StageTransition) {
        publish_all(
            self.events.as_ref(),
            &[PipelineEvent::StageChanged {
                opportunity_id: transition.opportunity_id.clone(),
                transition_id: transition.id.clone(),
                from: transition.from_stage,
                to: transition.to_stage,
                trigger: transition.trigger,
            }],
        );
    }
}

fn load<R: StoreRead + ?Sized>(tx: &R, id: &OpportunityId) -> Result<Opportunity, PipelineError> {
    tx.get_opportunity(id)?
        .ok_or_else(|| PipelineError::not_found(RecordKind::Opportunity, id))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{MemorySink, NullSink};
    use crate::storage::MemoryStore;
    use crate::primitives::{DROP_CLOSE_COMMENT, SYSTEM_ACTOR};
    use crate::types::{ApprovalStatus, Decision, TriggerKind};
    use chrono::TimeZone;

    fn pipeline() -> (Pipeline<MemoryStore>, Arc<ManualClock>, Arc<MemorySink>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).single().unwrap(),
        ));
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(
            MemoryStore::new(),
            clock.clone(),
            sink.clone(),
            PipelineConfig::default(),
        );
        (pipeline, clock, sink)
    }

    fn new_opportunity() -> NewOpportunity {
        NewOpportunity {
            title: "Predictive maintenance".into(),
            owner: Some("alice".into()),
            signal_id: Some("SIG-1".into()),
            created_by: "alice".into(),
            ..NewOpportunity::default()
        }
    }

    #[test]
    fn create_starts_at_discovery_with_signal_artifact() {
        let (pipeline, _, sink) = pipeline();
        let opp = pipeline.create_opportunity(new_opportunity()).unwrap();
        assert_eq!(opp.id.as_str(), "OPP-2026-001");
        assert_eq!(opp.current_stage, Stage::Discovery);
        assert_eq!(opp.stage_number(), Some(1));
        assert!(opp.is_active());
        assert_eq!(opp.artifact("signal_id"), Some("SIG-1"));
        assert_eq!(sink.events().len(), 1);

        let second = pipeline.create_opportunity(new_opportunity()).unwrap();
        assert_eq!(second.id.as_str(), "OPP-2026-002");
    }

    #[test]
    fn blank_title_is_rejected() {
        let (pipeline, _, _) = pipeline();
        let err = pipeline
            .create_opportunity(NewOpportunity {
                title: "   ".into(),
                created_by: "alice".into(),
                ..NewOpportunity::default()
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(pipeline.list_opportunities().unwrap().is_empty());
    }

    #[test]
    fn ungated_move_commits_directly() {
        let (pipeline, _, _) = pipeline();
        let opp = pipeline.create_opportunity(new_opportunity()).unwrap();
        let outcome = pipeline
            .request_transition(&opp.id, Stage::IdeaCard, "alice", TransitionRequest::default())
            .unwrap();
        match outcome {
            TransitionOutcome::Committed(t) => {
                assert_eq!(t.trigger, TriggerKind::Manual);
                assert_eq!(t.to_stage, Stage::IdeaCard);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            pipeline.get_opportunity(&opp.id).unwrap().current_stage,
            Stage::IdeaCard
        );
        assert!(pipeline.verify_consistency(&opp.id).unwrap().is_empty());
    }

    #[test]
    fn gated_move_opens_request() {
        let (pipeline, _, _) = pipeline();
        let opp = pipeline.create_opportunity(new_opportunity()).unwrap();
        pipeline
            .request_transition(&opp.id, Stage::IdeaCard, "alice", TransitionRequest::default())
            .unwrap();
        pipeline
            .attach_artifact(&opp.id, "scorecard_id", "SC-1", "alice")
            .unwrap();

        let outcome = pipeline
            .request_transition(
                &opp.id,
                Stage::Gate1Selection,
                "alice",
                TransitionRequest::default(),
            )
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::AwaitingApproval(_)));
        assert_eq!(
            pipeline.get_opportunity(&opp.id).unwrap().current_stage,
            Stage::IdeaCard
        );
    }

    #[test]
    fn optional_stage_commits_unless_forced() {
        let (pipeline, _, _) = pipeline();
        let opp = pipeline
            .create_opportunity(NewOpportunity {
                brief_id: Some("BR-1".into()),
                ..new_opportunity()
            })
            .unwrap();
        // HOLD may resume into any stage, so Mockup is reachable from here.
        let hold = TransitionRequest {
            reason: Some("waiting on sponsor".into()),
            ..TransitionRequest::default()
        };
        pipeline
            .request_transition(&opp.id, Stage::Hold, "alice", hold)
            .unwrap();
        let resumed = TransitionRequest {
            force_approval: true,
            ..TransitionRequest::default()
        };
        let outcome = pipeline
            .request_transition(&opp.id, Stage::Mockup, "alice", resumed)
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::AwaitingApproval(_)));

        let outcome = pipeline
            .request_transition(&opp.id, Stage::Mockup, "alice", TransitionRequest::default())
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Committed(_)));
    }

    #[test]
    fn hold_and_drop_need_a_reason() {
        let (pipeline, _, _) = pipeline();
        let opp = pipeline.create_opportunity(new_opportunity()).unwrap();
        let err = pipeline
            .request_transition(&opp.id, Stage::Drop, "alice", TransitionRequest::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let drop = TransitionRequest {
            reason: Some("market closed".into()),
            ..TransitionRequest::default()
        };
        pipeline
            .request_transition(&opp.id, Stage::Drop, "alice", drop)
            .unwrap();
        let dropped = pipeline.get_opportunity(&opp.id).unwrap();
        assert!(dropped.is_terminal());
        assert_eq!(dropped.stage_number(), None);
        assert_eq!(dropped.drop_reason.as_deref(), Some("market closed"));

        let err = pipeline
            .attach_artifact(&opp.id, "brief_id", "BR-1", "alice")
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn discarded_events_do_not_affect_commits() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).single().unwrap(),
        ));
        let pipeline = Pipeline::new(
            MemoryStore::new(),
            clock,
            Arc::new(NullSink),
            PipelineConfig::default(),
        );
        let opp = pipeline.create_opportunity(new_opportunity()).unwrap();
        let advanced = pipeline.auto_advance(&opp.id).unwrap();
        assert_eq!(advanced.map(|t| t.to_stage), Some(Stage::IdeaCard));
        assert_eq!(pipeline.transitions_for(&opp.id).unwrap().len(), 1);
    }

    #[test]
    fn drop_closes_pending_requests_in_the_same_commit() {
        let (pipeline, _, sink) = pipeline();
        let opp = pipeline.create_opportunity(new_opportunity()).unwrap();
        pipeline
            .request_transition(&opp.id, Stage::IdeaCard, "alice", TransitionRequest::default())
            .unwrap();
        pipeline
            .attach_artifact(&opp.id, "scorecard_id", "SC-1", "alice")
            .unwrap();
        let pending = match pipeline
            .request_transition(
                &opp.id,
                Stage::Gate1Selection,
                "alice",
                TransitionRequest::default(),
            )
            .unwrap()
        {
            TransitionOutcome::AwaitingApproval(request) => request,
            other => panic!("unexpected outcome: {other:?}"),
        };

        let drop = TransitionRequest {
            reason: Some("sponsor withdrew".into()),
            ..TransitionRequest::default()
        };
        pipeline
            .request_transition(&opp.id, Stage::Drop, "bob", drop)
            .unwrap();

        assert!(pipeline.approvals().pending_requests().unwrap().is_empty());
        let closed = pipeline.approvals().get_request(&pending.id).unwrap();
        assert_eq!(closed.status, ApprovalStatus::Rejected);
        assert_eq!(closed.completed_by.as_deref(), Some(SYSTEM_ACTOR));
        assert_eq!(closed.completion_comments.as_deref(), Some(DROP_CLOSE_COMMENT));
        assert!(sink.events().iter().any(|e| matches!(
            e,
            PipelineEvent::ApprovalCompleted { request_id, status: ApprovalStatus::Rejected, .. }
                if *request_id == pending.id
        )));

        // A late approval sees a closed request instead of failing on the stage move.
        let err = pipeline
            .approvals()
            .process_decision(&pending.id, Decision::Approved, "alice", None)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidRequestState(ApprovalStatus::Rejected)
        ));
        assert_eq!(
            pipeline.get_opportunity(&opp.id).unwrap().current_stage,
            Stage::Drop
        );
        assert!(pipeline.verify_consistency(&opp.id).unwrap().is_empty());
    }

    #[test]
    fn auto_advance_stops_at_gates_and_missing_artifacts() {
        let (pipeline, _, _) = pipeline();
        let opp = pipeline
            .create_opportunity(NewOpportunity {
                signal_id: None,
                ..new_opportunity()
            })
            .unwrap();
        assert!(pipeline.auto_advance(&opp.id).unwrap().is_none());

        pipeline
            .attach_artifact(&opp.id, "signal_id", "SIG-2", "alice")
            .unwrap();
        let advanced = pipeline.auto_advance(&opp.id).unwrap().unwrap();
        assert_eq!(advanced.trigger, TriggerKind::Auto);
        assert_eq!(advanced.created_by, crate::primitives::SYSTEM_ACTOR);

        // Gate1 requires sign-off.
        assert!(pipeline.auto_advance(&opp.id).unwrap().is_none());
    }

    #[test]
    fn sla_counts_days_since_last_transition() {
        let (pipeline, clock, _) = pipeline();
        let opp = pipeline.create_opportunity(new_opportunity()).unwrap();
        clock.advance(Duration::days(3));
        pipeline
            .request_transition(&opp.id, Stage::IdeaCard, "alice", TransitionRequest::default())
            .unwrap();

        let status = pipeline
            .sla_status(&opp.id, clock.now() + Duration::days(5))
            .unwrap();
        assert_eq!(status.stage, Stage::IdeaCard);
        assert_eq!(status.days_in_stage, 5);
        assert_eq!(status.sla_days, 7);
        assert!(!status.breached);

        let late = pipeline
            .sla_status(&opp.id, clock.now() + Duration::days(8))
            .unwrap();
        assert!(late.breached);
    }

    #[test]
    fn config_rejects_non_positive_expiry() {
        assert!(PipelineConfig::with_expiry_days(0).is_err());
        assert_eq!(
            PipelineConfig::with_expiry_days(3).unwrap().approval_expiry,
            Duration::days(3)
        );
    }

    #[test]
    fn unknown_opportunity_is_not_found() {
        let (pipeline, _, _) = pipeline();
        let err = pipeline
            .transitions_for(&OpportunityId::from("OPP-1999-001"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }
}
