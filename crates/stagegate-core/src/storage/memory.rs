//! # In-Memory Store
//!
//! `BTreeMap` tables behind a `Mutex`. A write works on a copy of the tables
//! and swaps it in only when the closure succeeds.

use super::{PipelineStore, StoreRead, StoreWrite};
use crate::types::{
    ApprovalRequest, ApprovalRequestId, Opportunity, OpportunityId, PipelineError, RecordKind,
    StageTransition, TransitionId,
};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct Tables {
    opportunities: BTreeMap<OpportunityId, Opportunity>,
    transitions: BTreeMap<TransitionId, StageTransition>,
    requests: BTreeMap<ApprovalRequestId, ApprovalRequest>,
    sequences: BTreeMap<String, u64>,
}

/// Volatile store; everything is lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineStore for MemoryStore {
    fn read<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&dyn StoreRead) -> Result<T, PipelineError>,
    {
        // A poisoned lock still guards a consistent table set: writes are
        // swapped in only after the closure returned.
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        f(&*tables)
    }

    fn write<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut dyn StoreWrite) -> Result<T, PipelineError>,
    {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let mut working = tables.clone();
        let out = f(&mut working)?;
        *tables = working;
        Ok(out)
    }
}

fn conflict(kind: RecordKind, id: impl std::fmt::Display) -> PipelineError {
    PipelineError::Conflict {
        kind,
        id: id.to_string(),
    }
}

impl StoreRead for Tables {
    fn get_opportunity(&self, id: &OpportunityId) -> Result<Option<Opportunity>, PipelineError> {
        Ok(self.opportunities.get(id).cloned())
    }

    fn list_opportunities(&self) -> Result<Vec<Opportunity>, PipelineError> {
        Ok(self.opportunities.values().cloned().collect())
    }

    fn transitions_for(&self, id: &OpportunityId) -> Result<Vec<StageTransition>, PipelineError> {
        let mut out: Vec<StageTransition> = self
            .transitions
            .values()
            .filter(|t| &t.opportunity_id == id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn get_request(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, PipelineError> {
        Ok(self.requests.get(id).cloned())
    }

    fn pending_requests(&self) -> Result<Vec<ApprovalRequest>, PipelineError> {
        Ok(self
            .requests
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect())
    }

    fn requests_for(&self, id: &OpportunityId) -> Result<Vec<ApprovalRequest>, PipelineError> {
        let mut out: Vec<ApprovalRequest> = self
            .requests
            .values()
            .filter(|r| &r.opportunity_id == id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

impl StoreWrite for Tables {
    fn insert_opportunity(&mut self, opportunity: &Opportunity) -> Result<(), PipelineError> {
        if self.opportunities.contains_key(&opportunity.id) {
            return Err(conflict(RecordKind::Opportunity, &opportunity.id));
        }
        self.opportunities
            .insert(opportunity.id.clone(), opportunity.clone());
        Ok(())
    }

    fn update_opportunity(&mut self, opportunity: &mut Opportunity) -> Result<(), PipelineError> {
        let stored = self
            .opportunities
            .get(&opportunity.id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::Opportunity, &opportunity.id))?;
        if stored.version != opportunity.version {
            return Err(conflict(RecordKind::Opportunity, &opportunity.id));
        }
        opportunity.version = opportunity.version.saturating_add(1);
        self.opportunities
            .insert(opportunity.id.clone(), opportunity.clone());
        Ok(())
    }

    fn insert_transition(&mut self, transition: &StageTransition) -> Result<(), PipelineError> {
        if self.transitions.contains_key(&transition.id) {
            return Err(conflict(RecordKind::Transition, &transition.id));
        }
        self.transitions
            .insert(transition.id.clone(), transition.clone());
        Ok(())
    }

    fn insert_request(&mut self, request: &ApprovalRequest) -> Result<(), PipelineError> {
        if self.requests.contains_key(&request.id) {
            return Err(conflict(RecordKind::ApprovalRequest, &request.id));
        }
        self.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn update_request(&mut self, request: &mut ApprovalRequest) -> Result<(), PipelineError> {
        let stored = self
            .requests
            .get(&request.id)
            .ok_or_else(|| PipelineError::not_found(RecordKind::ApprovalRequest, &request.id))?;
        if stored.version != request.version {
            return Err(conflict(RecordKind::ApprovalRequest, &request.id));
        }
        request.version = request.version.saturating_add(1);
        self.requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    fn next_sequence(&mut self, scope: &str) -> Result<u64, PipelineError> {
        let counter = self.sequences.entry(scope.to_string()).or_insert(0);
        *counter = counter.saturating_add(1);
        Ok(*counter)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::test_support::sample_opportunity;

    #[test]
    fn write_commits_on_ok() {
        let store = MemoryStore::new();
        let opp = sample_opportunity("OPP-2026-001");
        store.write(|tx| tx.insert_opportunity(&opp)).expect("insert");

        let loaded = store
            .read(|tx| tx.get_opportunity(&opp.id))
            .expect("read");
        assert_eq!(loaded, Some(opp));
    }

    #[test]
    fn write_rolls_back_on_err() {
        let store = MemoryStore::new();
        let opp = sample_opportunity("OPP-2026-001");
        let result: Result<(), PipelineError> = store.write(|tx| {
            tx.insert_opportunity(&opp)?;
            tx.next_sequence("OPP-2026")?;
            Err(PipelineError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());

        assert!(store.read(|tx| tx.list_opportunities()).unwrap().is_empty());
        let seq = store.write(|tx| tx.next_sequence("OPP-2026")).unwrap();
        assert_eq!(seq, 1);
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let store = MemoryStore::new();
        let opp = sample_opportunity("OPP-2026-001");
        store.write(|tx| tx.insert_opportunity(&opp)).unwrap();

        let mut first = opp.clone();
        store.write(|tx| tx.update_opportunity(&mut first)).unwrap();
        assert_eq!(first.version, 1);

        let mut stale = opp;
        let err = store
            .write(|tx| tx.update_opportunity(&mut stale))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict { .. }));
    }

    #[test]
    fn duplicate_insert_is_a_conflict() {
        let store = MemoryStore::new();
        let opp = sample_opportunity("OPP-2026-001");
        store.write(|tx| tx.insert_opportunity(&opp)).unwrap();
        let err = store.write(|tx| tx.insert_opportunity(&opp)).unwrap_err();
        assert!(matches!(err, PipelineError::Conflict { .. }));
    }

    #[test]
    fn update_of_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let mut opp = sample_opportunity("OPP-2026-404");
        let err = store
            .write(|tx| tx.update_opportunity(&mut opp))
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }
}
