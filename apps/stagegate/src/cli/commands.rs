//! # CLI Command Implementations
//!
//! Each command opens the pipeline, runs one engine operation and prints the
//! result, as text or (with `--json-mode`) as pretty JSON.

use crate::config::BackendKind;
use serde::Serialize;
use stagegate_core::{
    ApprovalRequest, ApprovalRequestId, ApproverRole, Decision, DecisionOutcome, MemoryStore,
    NewOpportunity, Opportunity, OpportunityId, Pipeline, PipelineConfig, PipelineError, RedbStore,
    SlaStatus, Stage, StageTransition, StorageBackend, SystemClock, TracingSink, TransitionDenied,
    TransitionOutcome, TransitionRequest, all_rules, can_transition_codes,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

// =============================================================================
// CONTEXT
// =============================================================================

/// Settings resolved from flags, environment and config file.
#[derive(Debug, Clone)]
pub struct Context {
    pub database: PathBuf,
    pub backend: BackendKind,
    pub pipeline_config: PipelineConfig,
    pub actor: String,
    pub json_mode: bool,
}

impl Context {
    /// Open the configured backend.
    pub fn open(&self) -> Result<Pipeline<StorageBackend>, PipelineError> {
        let backend = match self.backend {
            BackendKind::Redb => StorageBackend::Persistent(RedbStore::open(&self.database)?),
            BackendKind::Memory => StorageBackend::InMemory(MemoryStore::new()),
        };
        Ok(Pipeline::new(
            backend,
            Arc::new(SystemClock),
            Arc::new(TracingSink),
            self.pipeline_config,
        ))
    }
}

/// Print `value` as JSON in JSON mode, otherwise run `human`.
fn emit<T: Serialize>(ctx: &Context, value: &T, human: impl FnOnce()) -> Result<(), PipelineError> {
    if ctx.json_mode {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
        println!("{}", json);
    } else {
        human();
    }
    Ok(())
}

/// Parse a stage code, reporting an unknown code as an invalid transition.
fn parse_stage(code: &str) -> Result<Stage, PipelineError> {
    code.parse::<Stage>()
        .map_err(|e| TransitionDenied::InvalidStage(e.0).into())
}

fn print_opportunity_line(opp: &Opportunity) {
    println!(
        "{:<14} {:<16} {:<10} {}",
        opp.id.as_str(),
        opp.current_stage.code(),
        opp.owner.as_deref().unwrap_or("-"),
        opp.title
    );
}

fn print_request_line(request: &ApprovalRequest) {
    let approvers: Vec<String> = request
        .approvers
        .iter()
        .map(|a| {
            let marker = if a.required { "" } else { "?" };
            format!("{}{}", a.principal(), marker)
        })
        .collect();
    println!(
        "{:<28} {:<14} {:<16} {:<9} expires {}  [{}]",
        request.id.as_str(),
        request.opportunity_id.as_str(),
        request.target_stage.code(),
        request.status.to_string(),
        request.expires_at.format("%Y-%m-%d %H:%M"),
        approvers.join(", ")
    );
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the database file.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), PipelineError> {
    if ctx.backend == BackendKind::Memory {
        println!("Memory backend selected; nothing to initialize.");
        return Ok(());
    }
    if ctx.database.exists() {
        if !force {
            return Err(PipelineError::InvalidInput(format!(
                "database {} already exists (use --force to replace it)",
                ctx.database.display()
            )));
        }
        std::fs::remove_file(&ctx.database).map_err(|e| {
            PipelineError::Storage(format!("cannot remove {}: {}", ctx.database.display(), e))
        })?;
        tracing::warn!(path = %ctx.database.display(), "existing database removed");
    }
    RedbStore::open(&ctx.database)?;
    println!("Initialized pipeline database at {}", ctx.database.display());
    Ok(())
}

// =============================================================================
// OPPORTUNITY COMMANDS
// =============================================================================

pub fn cmd_create(
    ctx: &Context,
    title: String,
    description: Option<String>,
    owner: Option<String>,
    signal_id: Option<String>,
    brief_id: Option<String>,
) -> Result<(), PipelineError> {
    let pipeline = ctx.open()?;
    let opp = pipeline.create_opportunity(NewOpportunity {
        title,
        description,
        owner,
        signal_id,
        brief_id,
        created_by: ctx.actor.clone(),
    })?;
    emit(ctx, &opp, || {
        println!("Created {} at {}", opp.id, opp.current_stage);
    })
}

pub fn cmd_list(ctx: &Context, stage: Option<&str>) -> Result<(), PipelineError> {
    let filter = stage.map(parse_stage).transpose()?;
    let pipeline = ctx.open()?;
    let opportunities: Vec<Opportunity> = pipeline
        .list_opportunities()?
        .into_iter()
        .filter(|o| filter.is_none_or(|s| o.current_stage == s))
        .collect();
    emit(ctx, &opportunities, || {
        if opportunities.is_empty() {
            println!("No opportunities.");
        }
        for opp in &opportunities {
            print_opportunity_line(opp);
        }
    })
}

#[derive(Serialize)]
struct ShowOutput<'a> {
    opportunity: &'a Opportunity,
    transitions: &'a [StageTransition],
    requests: &'a [ApprovalRequest],
    sla: &'a SlaStatus,
    violations: &'a [String],
}

pub fn cmd_show(ctx: &Context, id: &str) -> Result<(), PipelineError> {
    let pipeline = ctx.open()?;
    let id = OpportunityId::from(id);
    let opportunity = pipeline.get_opportunity(&id)?;
    let transitions = pipeline.transitions_for(&id)?;
    let requests = pipeline.approvals().requests_for_opportunity(&id)?;
    let sla = pipeline.sla_status(&id, chrono::Utc::now())?;
    let violations = pipeline.verify_consistency(&id)?;

    let output = ShowOutput {
        opportunity: &opportunity,
        transitions: &transitions,
        requests: &requests,
        sla: &sla,
        violations: &violations,
    };
    emit(ctx, &output, || {
        println!("{}  {}", opportunity.id, opportunity.title);
        println!("==================");
        println!("Stage:   {}", opportunity.current_stage);
        println!("Owner:   {}", opportunity.owner.as_deref().unwrap_or("-"));
        if let Some(reason) = &opportunity.hold_reason {
            println!("Held:    {}", reason);
        }
        if let Some(reason) = &opportunity.drop_reason {
            println!("Dropped: {}", reason);
        }
        let sla_note = if sla.breached { "  (SLA breached)" } else { "" };
        println!(
            "In stage {} day(s), SLA {} day(s){}",
            sla.days_in_stage, sla.sla_days, sla_note
        );
        println!();
        println!("Artifacts:");
        for (key, reference) in &opportunity.stage_artifacts {
            println!("  {:<22} {}", key, reference);
        }
        println!();
        println!("Transitions:");
        for t in &transitions {
            println!(
                "  {}  {} -> {}  {:?} by {}",
                t.created_at.format("%Y-%m-%d %H:%M"),
                t.from_stage,
                t.to_stage,
                t.trigger,
                t.created_by
            );
        }
        if !requests.is_empty() {
            println!();
            println!("Approval requests:");
            for request in &requests {
                print_request_line(request);
            }
        }
        for violation in &violations {
            println!("WARNING: {}", violation);
        }
    })
}

pub fn cmd_artifact(
    ctx: &Context,
    id: &str,
    key: &str,
    reference: &str,
) -> Result<(), PipelineError> {
    let pipeline = ctx.open()?;
    let opp = pipeline.attach_artifact(&OpportunityId::from(id), key, reference, &ctx.actor)?;
    emit(ctx, &opp, || {
        println!("{}: {} = {}", opp.id, key, reference);
    })
}

// =============================================================================
// ADVANCE COMMAND
// =============================================================================

/// Optional parts of `advance`.
#[derive(Debug, Default)]
pub struct AdvanceArgs {
    pub reason: Option<String>,
    pub artifacts: Vec<(String, String)>,
    pub force_approval: bool,
    pub assignees: Vec<(String, String)>,
    pub expires_days: Option<i64>,
}

impl AdvanceArgs {
    fn into_request(self) -> Result<TransitionRequest, PipelineError> {
        let mut assignees = BTreeMap::new();
        for (role, user) in self.assignees {
            assignees.insert(role.parse::<ApproverRole>()?, user);
        }
        let expires_in = self
            .expires_days
            .map(|days| PipelineConfig::with_expiry_days(days).map(|c| c.approval_expiry))
            .transpose()?;
        Ok(TransitionRequest {
            reason: self.reason,
            artifacts: self.artifacts.into_iter().collect(),
            force_approval: self.force_approval,
            assignees,
            expires_in,
        })
    }
}

pub fn cmd_advance(
    ctx: &Context,
    id: &str,
    to: &str,
    args: AdvanceArgs,
) -> Result<(), PipelineError> {
    let target = parse_stage(to)?;
    let request = args.into_request()?;
    let pipeline = ctx.open()?;
    let outcome =
        pipeline.request_transition(&OpportunityId::from(id), target, &ctx.actor, request)?;
    emit(ctx, &outcome, || match &outcome {
        TransitionOutcome::Committed(t) => {
            println!("{}: {} -> {} ({})", t.opportunity_id, t.from_stage, t.to_stage, t.id);
        }
        TransitionOutcome::AwaitingApproval(request) => {
            println!("{} needs approval; request opened:", request.target_stage);
            print_request_line(request);
        }
    })
}

pub fn cmd_auto_advance(ctx: &Context, id: &str) -> Result<(), PipelineError> {
    let pipeline = ctx.open()?;
    let transition = pipeline.auto_advance(&OpportunityId::from(id))?;
    emit(ctx, &transition, || match &transition {
        Some(t) => println!("{}: {} -> {} ({})", t.opportunity_id, t.from_stage, t.to_stage, t.id),
        None => println!("{}: nothing to advance automatically", id),
    })
}

// =============================================================================
// APPROVAL COMMANDS
// =============================================================================

pub fn cmd_approvals(ctx: &Context, opportunity: Option<&str>) -> Result<(), PipelineError> {
    let pipeline = ctx.open()?;
    let requests = match opportunity {
        Some(id) => pipeline
            .approvals()
            .requests_for_opportunity(&OpportunityId::from(id))?,
        None => pipeline.approvals().pending_requests()?,
    };
    emit(ctx, &requests, || {
        if requests.is_empty() {
            println!("No approval requests.");
        }
        for request in &requests {
            print_request_line(request);
        }
    })
}

#[derive(Serialize)]
struct DecisionOutput<'a> {
    request: &'a ApprovalRequest,
    completed: bool,
    outstanding_roles: Vec<ApproverRole>,
    transition: Option<&'a StageTransition>,
}

pub fn cmd_decide(
    ctx: &Context,
    request_id: &str,
    decision: &str,
    comments: Option<String>,
) -> Result<(), PipelineError> {
    let decision = decision.parse::<Decision>()?;
    let pipeline = ctx.open()?;
    let outcome = pipeline.approvals().process_decision(
        &ApprovalRequestId::from(request_id),
        decision,
        &ctx.actor,
        comments,
    )?;

    let output = DecisionOutput {
        request: outcome.request(),
        completed: outcome.is_complete(),
        outstanding_roles: match &outcome {
            DecisionOutcome::QuorumNotReached {
                outstanding_roles, ..
            } => outstanding_roles.clone(),
            _ => Vec::new(),
        },
        transition: match &outcome {
            DecisionOutcome::Approved { transition, .. } => Some(transition),
            _ => None,
        },
    };
    emit(ctx, &output, || match &outcome {
        DecisionOutcome::Approved { request, transition } => println!(
            "{} approved; {} moved to {}",
            request.id, transition.opportunity_id, transition.to_stage
        ),
        DecisionOutcome::Rejected { request } => println!("{} rejected", request.id),
        DecisionOutcome::QuorumNotReached {
            request,
            outstanding_roles,
        } => {
            let roles: Vec<&str> = outstanding_roles.iter().map(|r| r.code()).collect();
            println!(
                "{}: decision recorded; still waiting on {}",
                request.id,
                roles.join(", ")
            );
        }
    })
}

/// One expiry pass. The database is opened for this pass only, so other
/// commands can use it between passes.
pub fn sweep_once(ctx: &Context) -> Result<Vec<ApprovalRequestId>, PipelineError> {
    let pipeline = ctx.open()?;
    Ok(pipeline.approvals().check_expired_requests())
}

pub fn cmd_expire(ctx: &Context) -> Result<(), PipelineError> {
    let expired = sweep_once(ctx)?;
    emit(ctx, &expired, || {
        println!("Expired {} request(s)", expired.len());
        for id in &expired {
            println!("  {}", id);
        }
    })
}

/// Sweep every `every_secs` seconds until Ctrl-C.
pub async fn cmd_sweep(ctx: &Context, every_secs: u64) -> Result<(), PipelineError> {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(every_secs));
    tracing::info!(every_secs, "expiry sweep started");
    println!("Sweeping every {}s; press Ctrl+C to stop", every_secs);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A busy database is retried on the next tick.
                let expired = match sweep_once(ctx) {
                    Ok(expired) => expired,
                    Err(e) => {
                        tracing::warn!(error = %e, "expiry sweep skipped");
                        continue;
                    }
                };
                if !expired.is_empty() {
                    emit(ctx, &expired, || {
                        for id in &expired {
                            println!("expired {}", id);
                        }
                    })?;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "ctrl-c handler failed");
                }
                tracing::info!("expiry sweep stopped");
                return Ok(());
            }
        }
    }
}

// =============================================================================
// MAINTENANCE COMMANDS
// =============================================================================

/// Reclaim free space in the database file.
pub fn cmd_compact(ctx: &Context) -> Result<(), PipelineError> {
    if ctx.backend == BackendKind::Memory {
        println!("Memory backend selected; nothing to compact.");
        return Ok(());
    }
    let mut store = RedbStore::open(&ctx.database)?;
    let compacted = store.compact()?;
    emit(ctx, &compacted, || {
        if compacted {
            println!("Compacted {}", ctx.database.display());
        } else {
            println!("{} is already compact", ctx.database.display());
        }
    })
}

// =============================================================================
// POLICY COMMANDS
// =============================================================================

pub fn cmd_rules(ctx: &Context) -> Result<(), PipelineError> {
    let rules = all_rules();
    emit(ctx, &rules, || {
        println!(
            "{:<16} {:<9} {:<28} {:<34} SLA",
            "STAGE", "APPROVAL", "APPROVERS", "ARTIFACTS"
        );
        for rule in rules {
            let mut approvers: Vec<String> = rule
                .required_approvers
                .iter()
                .map(|r| r.code().to_string())
                .collect();
            approvers.extend(rule.optional_approvers.iter().map(|r| format!("{}?", r.code())));
            println!(
                "{:<16} {:<9} {:<28} {:<34} {}",
                rule.stage.code(),
                format!("{:?}", rule.approval),
                approvers.join(","),
                rule.required_artifacts.join(","),
                rule.sla_days
            );
        }
    })
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    from: &'a str,
    to: &'a str,
    allowed: bool,
    reason: Option<String>,
}

pub fn cmd_check(ctx: &Context, from: &str, to: &str) -> Result<(), PipelineError> {
    let (allowed, reason) = can_transition_codes(from, to);
    let output = CheckOutput {
        from,
        to,
        allowed,
        reason,
    };
    emit(ctx, &output, || match &output.reason {
        None => println!("{} -> {}: allowed", from, to),
        Some(reason) => println!("{} -> {}: refused ({})", from, to, reason),
    })
}
