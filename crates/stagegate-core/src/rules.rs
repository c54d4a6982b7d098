//! # Stage Rule Table
//!
//! Static, read-only policy for every stage: whether entering it needs
//! approval, which roles must sign off, which artifacts must already exist,
//! and how long the stage is expected to take.
//!
//! | Stage | Approval | Required roles | Optional roles | Required artifacts |
//! |-------|----------|----------------|----------------|--------------------|
//! | 01_DISCOVERY | None | | | |
//! | 02_IDEA_CARD | None | | | signal_id |
//! | 03_GATE1 | Required | BD_OWNER | | signal_id, scorecard_id |
//! | 04_MOCKUP | Optional | | BD_OWNER | brief_id |
//! | 05_GATE2 | Required | BD_OWNER | DATA_TEAM, SECURITY_TEAM | brief_id, mockup_id |
//! | 06_BIZ_PLANNING | Required | BD_OWNER, EXECUTIVE | | validation_report_id |
//! | 07_PILOT | Optional | | BD_OWNER | business_plan_id |
//! | 08_PRE_PROPOSAL | Required | BD_OWNER, EXECUTIVE | | pilot_report_id |
//! | 09_HANDOFF | Required | BD_OWNER, RECEIVING_TEAM | | proposal_id |
//! | HOLD / DROP | None | | | |

use crate::stage::Stage;
use crate::types::ApproverRole::{BdOwner, DataTeam, Executive, ReceivingTeam, SecurityTeam};
use crate::types::{ApprovalType, Approver, ApproverRole};
use serde::Serialize;

/// Whether entering a stage needs human sign-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalRequirement {
    None,
    /// Commits directly unless the caller explicitly asks for sign-off.
    Optional,
    Required,
}

/// Policy record for one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRule {
    pub stage: Stage,
    pub label: &'static str,
    pub description: &'static str,
    pub approval: ApprovalRequirement,
    pub required_approvers: &'static [ApproverRole],
    pub optional_approvers: &'static [ApproverRole],
    pub required_artifacts: &'static [&'static str],
    pub expected_duration_days: u32,
    pub sla_days: u32,
}

static STAGE_RULES: [StageRule; 11] = [
    StageRule {
        stage: Stage::Discovery,
        label: "Discovery",
        description: "Collect and triage market signals",
        approval: ApprovalRequirement::None,
        required_approvers: &[],
        optional_approvers: &[],
        required_artifacts: &[],
        expected_duration_days: 14,
        sla_days: 14,
    },
    StageRule {
        stage: Stage::IdeaCard,
        label: "Idea Card",
        description: "Shape the signal into a one-page opportunity idea",
        approval: ApprovalRequirement::None,
        required_approvers: &[],
        optional_approvers: &[],
        required_artifacts: &["signal_id"],
        expected_duration_days: 5,
        sla_days: 7,
    },
    StageRule {
        stage: Stage::Gate1Selection,
        label: "Gate1 Selection",
        description: "Scorecard review; decide whether to invest in a mockup",
        approval: ApprovalRequirement::Required,
        required_approvers: &[BdOwner],
        optional_approvers: &[],
        required_artifacts: &["signal_id", "scorecard_id"],
        expected_duration_days: 3,
        sla_days: 5,
    },
    StageRule {
        stage: Stage::Mockup,
        label: "Mockup",
        description: "Build a clickable mockup from the opportunity brief",
        approval: ApprovalRequirement::Optional,
        required_approvers: &[],
        optional_approvers: &[BdOwner],
        required_artifacts: &["brief_id"],
        expected_duration_days: 10,
        sla_days: 14,
    },
    StageRule {
        stage: Stage::Gate2Validation,
        label: "Gate2 Validation",
        description: "Validate the mockup with customers, data and security",
        approval: ApprovalRequirement::Required,
        required_approvers: &[BdOwner],
        optional_approvers: &[DataTeam, SecurityTeam],
        required_artifacts: &["brief_id", "mockup_id"],
        expected_duration_days: 5,
        sla_days: 7,
    },
    StageRule {
        stage: Stage::BizPlanning,
        label: "Biz Planning",
        description: "Business case, pricing and go-to-market plan",
        approval: ApprovalRequirement::Required,
        required_approvers: &[BdOwner, Executive],
        optional_approvers: &[],
        required_artifacts: &["validation_report_id"],
        expected_duration_days: 14,
        sla_days: 21,
    },
    StageRule {
        stage: Stage::Pilot,
        label: "Pilot / PoC",
        description: "Run a limited pilot with a design partner",
        approval: ApprovalRequirement::Optional,
        required_approvers: &[],
        optional_approvers: &[BdOwner],
        required_artifacts: &["business_plan_id"],
        expected_duration_days: 21,
        sla_days: 30,
    },
    StageRule {
        stage: Stage::PreProposal,
        label: "Pre-Proposal",
        description: "Draft the proposal and align with leadership",
        approval: ApprovalRequirement::Required,
        required_approvers: &[BdOwner, Executive],
        optional_approvers: &[],
        required_artifacts: &["pilot_report_id"],
        expected_duration_days: 10,
        sla_days: 14,
    },
    StageRule {
        stage: Stage::Handoff,
        label: "Handoff",
        description: "Hand the opportunity to the delivery team",
        approval: ApprovalRequirement::Required,
        required_approvers: &[BdOwner, ReceivingTeam],
        optional_approvers: &[],
        required_artifacts: &["proposal_id"],
        expected_duration_days: 5,
        sla_days: 7,
    },
    StageRule {
        stage: Stage::Hold,
        label: "Hold",
        description: "Paused; may resume into any stage",
        approval: ApprovalRequirement::None,
        required_approvers: &[],
        optional_approvers: &[],
        required_artifacts: &[],
        expected_duration_days: 30,
        sla_days: 30,
    },
    StageRule {
        stage: Stage::Drop,
        label: "Drop",
        description: "Abandoned; terminal",
        approval: ApprovalRequirement::None,
        required_approvers: &[],
        optional_approvers: &[],
        required_artifacts: &[],
        expected_duration_days: 0,
        sla_days: 0,
    },
];

/// Policy for a stage.
#[must_use]
pub fn stage_rule(stage: Stage) -> &'static StageRule {
    // Table order matches `ALL_STAGES`; the fallback keeps lookup total.
    STAGE_RULES
        .iter()
        .find(|rule| rule.stage == stage)
        .unwrap_or(&STAGE_RULES[0])
}

/// The whole table, in stage order.
#[must_use]
pub fn all_rules() -> &'static [StageRule] {
    &STAGE_RULES
}

/// Fixed stage -> approval type mapping.
#[must_use]
pub fn approval_type_for(stage: Stage) -> ApprovalType {
    match stage {
        Stage::Gate1Selection => ApprovalType::Gate1,
        Stage::Gate2Validation => ApprovalType::Gate2,
        Stage::BizPlanning => ApprovalType::BizPlan,
        Stage::PreProposal => ApprovalType::PreProposal,
        Stage::Handoff => ApprovalType::Handoff,
        _ => ApprovalType::StageAdvance,
    }
}

/// Approver template for a stage: required roles first, then optional ones.
///
/// Stages with no configured roles still get a BD_OWNER slot so that an
/// explicitly requested sign-off has someone to answer it.
#[must_use]
pub fn default_approvers(stage: Stage) -> Vec<Approver> {
    let rule = stage_rule(stage);
    let mut approvers: Vec<Approver> = rule
        .required_approvers
        .iter()
        .map(|&role| Approver::required(role))
        .chain(rule.optional_approvers.iter().map(|&role| Approver::optional(role)))
        .collect();
    if !approvers.iter().any(|a| a.required) {
        approvers.insert(0, Approver::required(BdOwner));
        approvers.dedup_by(|b, a| a.role == b.role);
    }
    approvers
}

// =============================================================================
// TESTS
// =============================================================================
