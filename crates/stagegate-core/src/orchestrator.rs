//! # Stage Transition Orchestrator
//!
//! The only code path that changes `Opportunity::current_stage`.
//!
//! A commit writes the audit record, the new stage and (for gate-driven moves)
//! the gate decision entry through the caller's store transaction, so the
//! three land together or not at all.

use crate::clock::Clock;
use crate::ids::next_transition_id;
use crate::primitives::SYSTEM_ACTOR;
use crate::stage::Stage;
use crate::storage::StoreWrite;
use crate::transition::check_transition;
use crate::types::{
    ApprovalRequestId, GateDecision, GateDecisionRecord, Opportunity, PipelineError,
    StageTransition, TriggerKind,
};
use std::sync::Arc;

/// Why a stage is being committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionCause {
    /// The system advanced a stage that needs no sign-off.
    Auto,
    /// A user moved the opportunity directly.
    Manual {
        actor: String,
        notes: Option<String>,
    },
    /// An approval request reached quorum.
    Gate {
        request_id: ApprovalRequestId,
        approver: String,
        comments: Option<String>,
    },
}

impl TransitionCause {
    fn trigger(&self) -> TriggerKind {
        match self {
            TransitionCause::Auto => TriggerKind::Auto,
            TransitionCause::Manual { .. } => TriggerKind::Manual,
            TransitionCause::Gate { .. } => TriggerKind::Gate,
        }
    }

    fn actor(&self) -> &str {
        match self {
            TransitionCause::Auto => SYSTEM_ACTOR,
            TransitionCause::Manual { actor, .. } => actor,
            TransitionCause::Gate { approver, .. } => approver,
        }
    }

    fn notes(&self) -> Option<&str> {
        match self {
            TransitionCause::Auto => None,
            TransitionCause::Manual { notes, .. } => notes.as_deref(),
            TransitionCause::Gate { comments, .. } => comments.as_deref(),
        }
    }
}

/// Commits stage changes.
#[derive(Debug, Clone)]
pub struct StageOrchestrator {
    clock: Arc<dyn Clock>,
}

impl StageOrchestrator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Move `opportunity` to `target` inside `tx`.
    ///
    /// The move is re-validated first, so DROP stays absorbing whichever path
    /// calls this. On success `opportunity` holds the stored state (including
    /// its bumped version); on error it is left untouched and the caller's
    /// transaction must be abandoned.
    pub fn commit(
        &self,
        tx: &mut dyn StoreWrite,
        opportunity: &mut Opportunity,
        target: Stage,
        cause: TransitionCause,
    ) -> Result<StageTransition, PipelineError> {
        check_transition(opportunity.current_stage, target)?;

        let now = self.clock.now();
        let from = opportunity.current_stage;
        let trigger = cause.trigger();

        let (gate_decision, approved_by, approved_at, approval_request_id) = match &cause {
            TransitionCause::Gate {
                request_id,
                approver,
                ..
            } => (
                Some(GateDecision::Go),
                Some(approver.clone()),
                Some(now),
                Some(request_id.clone()),
            ),
            _ => (absorbing_decision(target), None, None, None),
        };

        let transition = StageTransition {
            id: next_transition_id(tx, now)?,
            opportunity_id: opportunity.id.clone(),
            from_stage: from,
            to_stage: target,
            trigger,
            gate_decision,
            approved_by,
            approved_at,
            approval_request_id,
            notes: cause.notes().map(str::to_string),
            created_by: cause.actor().to_string(),
            created_at: now,
        };
        tx.insert_transition(&transition)?;

        let mut updated = opportunity.clone();
        updated.current_stage = target;
        updated.updated_at = now;
        match target {
            Stage::Hold => updated.hold_reason = cause.notes().map(str::to_string),
            Stage::Drop => updated.drop_reason = cause.notes().map(str::to_string),
            _ => {}
        }
        if let TransitionCause::Gate {
            request_id,
            approver,
            comments,
        } = &cause
        {
            updated
                .gate_decisions
                .entry(target.code().to_string())
                .or_default()
                .push(GateDecisionRecord {
                    decision: GateDecision::Go,
                    approver: approver.clone(),
                    decided_at: now,
                    comments: comments.clone(),
                    request_id: Some(request_id.clone()),
                });
        }
        tx.update_opportunity(&mut updated)?;
        *opportunity = updated;

        tracing::info!(
            opportunity = %opportunity.id,
            from = %from,
            to = %target,
            trigger = ?trigger,
            transition = %transition.id,
            "stage committed"
        );
        Ok(transition)
    }
}

/// Decision recorded on a direct move into HOLD or DROP.
fn absorbing_decision(target: Stage) -> Option<GateDecision> {
    match target {
        Stage::Hold => Some(GateDecision::Hold),
        Stage::Drop => Some(GateDecision::Stop),
        _ => None,
    }
}

/// Audit invariants between an opportunity and its transition log.
///
/// Returns a description of every violation; empty means consistent:
/// - the latest transition ends at `current_stage` (or, with no transitions,
///   the opportunity is still at Discovery)
/// - every transition starts where the previous one ended
/// - every gate-driven transition has a matching gate decision entry
#[must_use]
pub fn consistency_violations(
    opportunity: &Opportunity,
    transitions: &[StageTransition],
) -> Vec<String> {
    let mut violations = Vec::new();

    match transitions.last() {
        Some(last) if last.to_stage != opportunity.current_stage => violations.push(format!(
            "latest transition {} ends at {} but current stage is {}",
            last.id, last.to_stage, opportunity.current_stage
        )),
        None if opportunity.current_stage != Stage::Discovery => violations.push(format!(
            "no transitions recorded but current stage is {}",
            opportunity.current_stage
        )),
        _ => {}
    }

    for (prev, next) in transitions.iter().zip(transitions.iter().skip(1)) {
        if prev.to_stage != next.from_stage {
            violations.push(format!(
                "transition {} starts at {} but {} ended at {}",
                next.id, next.from_stage, prev.id, prev.to_stage
            ));
        }
    }

    for t in transitions.iter().filter(|t| t.trigger == TriggerKind::Gate) {
        let recorded = opportunity
            .gate_decisions
            .get(t.to_stage.code())
            .is_some_and(|log| {
                log.iter()
                    .any(|d| d.request_id.is_some() && d.request_id == t.approval_request_id)
            });
        if !recorded {
            violations.push(format!(
                "gate transition {} has no decision entry under {}",
                t.id,
                t.to_stage.code()
            ));
        }
    }

    violations
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::test_support::sample_opportunity;
    use crate::storage::{MemoryStore, PipelineStore};
    use chrono::{TimeZone, Utc};

    fn setup() -> (MemoryStore, StageOrchestrator, Opportunity) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 3, 9, 0, 0).single().unwrap());
        let store = MemoryStore::new();
        let opp = sample_opportunity("OPP-2026-001");
        store.write(|tx| tx.insert_opportunity(&opp)).unwrap();
        (store, StageOrchestrator::new(Arc::new(clock)), opp)
    }

    fn manual(notes: &str) -> TransitionCause {
        TransitionCause::Manual {
            actor: "alice".into(),
            notes: Some(notes.into()),
        }
    }

    #[test]
    fn commit_records_transition_and_stage_together() {
        let (store, orchestrator, mut opp) = setup();
        let transition = store
            .write(|tx| orchestrator.commit(tx, &mut opp, Stage::IdeaCard, manual("ready")))
            .expect("commit");

        assert_eq!(transition.from_stage, Stage::Discovery);
        assert_eq!(transition.to_stage, Stage::IdeaCard);
        assert_eq!(transition.trigger, TriggerKind::Manual);
        assert_eq!(opp.current_stage, Stage::IdeaCard);
        assert_eq!(opp.version, 1);

        let (stored, log) = store
            .read(|tx| Ok((tx.get_opportunity(&opp.id)?, tx.transitions_for(&opp.id)?)))
            .unwrap();
        let stored = stored.unwrap();
        assert_eq!(stored, opp);
        assert!(consistency_violations(&stored, &log).is_empty());
    }

    #[test]
    fn gate_commit_appends_go_decision() {
        let (store, orchestrator, mut opp) = setup();
        opp.current_stage = Stage::IdeaCard;
        store.write(|tx| tx.update_opportunity(&mut opp)).unwrap();

        let cause = TransitionCause::Gate {
            request_id: ApprovalRequestId::from("APR-1"),
            approver: "alice".into(),
            comments: Some("strong scorecard".into()),
        };
        let transition = store
            .write(|tx| orchestrator.commit(tx, &mut opp, Stage::Gate1Selection, cause))
            .unwrap();

        assert_eq!(transition.gate_decision, Some(GateDecision::Go));
        assert_eq!(transition.approved_by.as_deref(), Some("alice"));
        let log = &opp.gate_decisions["03_GATE1"];
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].decision, GateDecision::Go);
        assert_eq!(log[0].request_id, Some(ApprovalRequestId::from("APR-1")));
    }

    #[test]
    fn drop_is_absorbing() {
        let (store, orchestrator, mut opp) = setup();
        store
            .write(|tx| orchestrator.commit(tx, &mut opp, Stage::Drop, manual("no market")))
            .unwrap();
        assert_eq!(opp.drop_reason.as_deref(), Some("no market"));

        for target in crate::stage::ALL_STAGES {
            let err = store
                .write(|tx| orchestrator.commit(tx, &mut opp, target, TransitionCause::Auto))
                .unwrap_err();
            assert!(matches!(err, PipelineError::InvalidTransition(_)));
        }
        assert_eq!(opp.current_stage, Stage::Drop);
        let log = store.read(|tx| tx.transitions_for(&opp.id)).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn hold_records_reason_and_resumes_anywhere() {
        let (store, orchestrator, mut opp) = setup();
        store
            .write(|tx| orchestrator.commit(tx, &mut opp, Stage::Hold, manual("budget freeze")))
            .unwrap();
        assert_eq!(opp.hold_reason.as_deref(), Some("budget freeze"));

        store
            .write(|tx| orchestrator.commit(tx, &mut opp, Stage::BizPlanning, manual("resumed")))
            .unwrap();
        assert_eq!(opp.current_stage, Stage::BizPlanning);
    }

    #[test]
    fn failed_commit_leaves_caller_copy_untouched() {
        let (store, orchestrator, opp) = setup();
        let mut stale = opp.clone();
        stale.version = 42;
        let before = stale.clone();

        let err = store
            .write(|tx| orchestrator.commit(tx, &mut stale, Stage::IdeaCard, TransitionCause::Auto))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict { .. }));
        assert_eq!(stale, before);
        assert!(store.read(|tx| tx.transitions_for(&opp.id)).unwrap().is_empty());
    }

    #[test]
    fn violations_detect_stage_drift() {
        let (store, orchestrator, mut opp) = setup();
        store
            .write(|tx| orchestrator.commit(tx, &mut opp, Stage::IdeaCard, TransitionCause::Auto))
            .unwrap();
        let log = store.read(|tx| tx.transitions_for(&opp.id)).unwrap();

        let mut drifted = opp.clone();
        drifted.current_stage = Stage::Mockup;
        assert_eq!(consistency_violations(&drifted, &log).len(), 1);

        let untouched = sample_opportunity("OPP-2026-002");
        assert!(consistency_violations(&untouched, &[]).is_empty());
    }
}
