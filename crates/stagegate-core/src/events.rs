//! # Pipeline Events
//!
//! Notifications emitted after a store transaction commits. Sinks observe;
//! they cannot fail an operation or alter committed state.

use crate::stage::Stage;
use crate::types::{
    ApprovalRequestId, ApprovalStatus, Decision, OpportunityId, TransitionId, TriggerKind,
};
use serde::Serialize;
use std::sync::Mutex;

/// Something that happened in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    OpportunityCreated {
        opportunity_id: OpportunityId,
        title: String,
    },
    StageChanged {
        opportunity_id: OpportunityId,
        transition_id: TransitionId,
        from: Stage,
        to: Stage,
        trigger: TriggerKind,
    },
    ApprovalRequested {
        request_id: ApprovalRequestId,
        opportunity_id: OpportunityId,
        target_stage: Stage,
        /// Principals of every approver slot.
        approvers: Vec<String>,
    },
    ApprovalResponded {
        request_id: ApprovalRequestId,
        user_id: String,
        decision: Decision,
    },
    ApprovalCompleted {
        request_id: ApprovalRequestId,
        status: ApprovalStatus,
        completed_by: String,
    },
    ApprovalExpired {
        request_id: ApprovalRequestId,
        opportunity_id: OpportunityId,
    },
}

impl PipelineEvent {
    /// Short name used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::OpportunityCreated { .. } => "opportunity_created",
            PipelineEvent::StageChanged { .. } => "stage_changed",
            PipelineEvent::ApprovalRequested { .. } => "approval_requested",
            PipelineEvent::ApprovalResponded { .. } => "approval_responded",
            PipelineEvent::ApprovalCompleted { .. } => "approval_completed",
            PipelineEvent::ApprovalExpired { .. } => "approval_expired",
        }
    }
}

/// Receiver of pipeline events.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    fn publish(&self, event: &PipelineEvent);
}

/// Publish a batch in order.
pub(crate) fn publish_all(sink: &dyn EventSink, events: &[PipelineEvent]) {
    for event in events {
        sink.publish(event);
    }
}

/// Writes every event to the `tracing` stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageChanged {
                opportunity_id,
                from,
                to,
                trigger,
                ..
            } => tracing::info!(
                event = event.name(),
                opportunity = %opportunity_id,
                from = %from,
                to = %to,
                trigger = ?trigger,
                "stage changed"
            ),
            PipelineEvent::ApprovalRequested {
                request_id,
                target_stage,
                approvers,
                ..
            } => tracing::info!(
                event = event.name(),
                request = %request_id,
                target = %target_stage,
                approvers = ?approvers,
                "approval requested"
            ),
            other => tracing::info!(event = other.name(), detail = ?other, "pipeline event"),
        }
    }
}

/// Discards events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &PipelineEvent) {}
}

/// Keeps every event in memory, in publication order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Remove and return everything published so far.
    pub fn drain(&self) -> Vec<PipelineEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
