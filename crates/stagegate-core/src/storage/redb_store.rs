//! # redb-backed Pipeline Storage
//!
//! A disk-backed record store using the redb embedded database.
//!
//! redb provides what the engine relies on:
//! - ACID transactions (one closure = one write transaction)
//! - A single writer at a time, so concurrent decisions on the same request
//!   are serialised
//! - Crash safety (copy-on-write B-trees)
//!
//! Records are postcard-encoded and keyed by their string id.

use super::{PipelineStore, StoreRead, StoreWrite};
use crate::types::{
    ApprovalRequest, ApprovalRequestId, Opportunity, OpportunityId, PipelineError, RecordKind,
    StageTransition,
};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Table for opportunities: id -> serialized Opportunity
const OPPORTUNITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("opportunities");

/// Table for transitions: id -> serialized StageTransition (insert-only)
const TRANSITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("stage_transitions");

/// Table for approval requests: id -> serialized ApprovalRequest
const APPROVALS: TableDefinition<&str, &[u8]> = TableDefinition::new("approval_requests");

/// Table for id counters: scope -> last issued value
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

fn storage_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Storage(e.to_string())
}

fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, PipelineError> {
    postcard::to_allocvec(record).map_err(|e| PipelineError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PipelineError> {
    postcard::from_bytes(bytes).map_err(|e| PipelineError::Serialization(e.to_string()))
}

fn get_record<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<T>, PipelineError> {
    match table.get(key).map_err(storage_err)? {
        Some(data) => decode(data.value()).map(Some),
        None => Ok(None),
    }
}

fn scan_records<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> Result<Vec<T>, PipelineError> {
    let mut records = Vec::new();
    for entry in table.iter().map_err(storage_err)? {
        let (_, value) = entry.map_err(storage_err)?;
        records.push(decode(value.value())?);
    }
    Ok(records)
}

fn sort_transitions(mut transitions: Vec<StageTransition>) -> Vec<StageTransition> {
    transitions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    transitions
}

fn sort_requests(mut requests: Vec<ApprovalRequest>) -> Vec<ApprovalRequest> {
    requests.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    requests
}

/// A disk-backed pipeline store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a pipeline database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;

        // Initialize tables so read transactions never see a missing table
        {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let _ = write_txn.open_table(OPPORTUNITIES).map_err(storage_err)?;
            let _ = write_txn.open_table(TRANSITIONS).map_err(storage_err)?;
            let _ = write_txn.open_table(APPROVALS).map_err(storage_err)?;
            let _ = write_txn.open_table(SEQUENCES).map_err(storage_err)?;
            write_txn.commit().map_err(storage_err)?;
        }

        tracing::debug!(path = %path.as_ref().display(), "opened pipeline database");
        Ok(Self { db })
    }

    /// Compact the database file. Returns `false` when there was nothing
    /// left to reclaim.
    pub fn compact(&mut self) -> Result<bool, PipelineError> {
        let compacted = self.db.compact().map_err(storage_err)?;
        tracing::debug!(compacted, "compacted pipeline database");
        Ok(compacted)
    }
}

impl PipelineStore for RedbStore {
    fn read<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&dyn StoreRead) -> Result<T, PipelineError>,
    {
        let reader = RedbReader {
            txn: self.db.begin_read().map_err(storage_err)?,
        };
        f(&reader)
    }

    fn write<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut dyn StoreWrite) -> Result<T, PipelineError>,
    {
        let mut writer = RedbWriter {
            txn: self.db.begin_write().map_err(storage_err)?,
        };
        match f(&mut writer) {
            Ok(out) => {
                writer.txn.commit().map_err(storage_err)?;
                Ok(out)
            }
            Err(e) => {
                if let Err(abort_err) = writer.txn.abort() {
                    tracing::warn!(error = %abort_err, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }
}

// =============================================================================
// READ TRANSACTION
// =============================================================================

struct RedbReader {
    txn: ReadTransaction,
}

impl StoreRead for RedbReader {
    fn get_opportunity(&self, id: &OpportunityId) -> Result<Option<Opportunity>, PipelineError> {
        let table = self.txn.open_table(OPPORTUNITIES).map_err(storage_err)?;
        get_record(&table, id.as_str())
    }

    fn list_opportunities(&self) -> Result<Vec<Opportunity>, PipelineError> {
        let table = self.txn.open_table(OPPORTUNITIES).map_err(storage_err)?;
        scan_records(&table)
    }

    fn transitions_for(&self, id: &OpportunityId) -> Result<Vec<StageTransition>, PipelineError> {
        let table = self.txn.open_table(TRANSITIONS).map_err(storage_err)?;
        let all: Vec<StageTransition> = scan_records(&table)?;
        Ok(sort_transitions(
            all.into_iter().filter(|t| &t.opportunity_id == id).collect(),
        ))
    }

    fn get_request(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, PipelineError> {
        let table = self.txn.open_table(APPROVALS).map_err(storage_err)?;
        get_record(&table, id.as_str())
    }

    fn pending_requests(&self) -> Result<Vec<ApprovalRequest>, PipelineError> {
        let table = self.txn.open_table(APPROVALS).map_err(storage_err)?;
        let all: Vec<ApprovalRequest> = scan_records(&table)?;
        Ok(all.into_iter().filter(|r| r.is_pending()).collect())
    }

    fn requests_for(&self, id: &OpportunityId) -> Result<Vec<ApprovalRequest>, PipelineError> {
        let table = self.txn.open_table(APPROVALS).map_err(storage_err)?;
        let all: Vec<ApprovalRequest> = scan_records(&table)?;
        Ok(sort_requests(
            all.into_iter().filter(|r| &r.opportunity_id == id).collect(),
        ))
    }
}

// =============================================================================
// WRITE TRANSACTION
// =============================================================================

struct RedbWriter {
    txn: WriteTransaction,
}

impl RedbWriter {
    fn insert_new(
        &mut self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
        kind: RecordKind,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        let mut table = self.txn.open_table(definition).map_err(storage_err)?;
        let exists = table.get(key).map_err(storage_err)?.is_some();
        if exists {
            return Err(PipelineError::Conflict {
                kind,
                id: key.to_string(),
            });
        }
        table.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }

    /// Compare `expected` with the stored record's version, then overwrite.
    fn replace_versioned(
        &mut self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
        kind: RecordKind,
        key: &str,
        stored_version: impl FnOnce(&[u8]) -> Result<u64, PipelineError>,
        expected: u64,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        let mut table = self.txn.open_table(definition).map_err(storage_err)?;
        let current = match table.get(key).map_err(storage_err)? {
            Some(data) => stored_version(data.value())?,
            None => return Err(PipelineError::not_found(kind, key)),
        };
        if current != expected {
            return Err(PipelineError::Conflict {
                kind,
                id: key.to_string(),
            });
        }
        table.insert(key, bytes).map_err(storage_err)?;
        Ok(())
    }
}

impl StoreRead for RedbWriter {
    fn get_opportunity(&self, id: &OpportunityId) -> Result<Option<Opportunity>, PipelineError> {
        let table = self.txn.open_table(OPPORTUNITIES).map_err(storage_err)?;
        get_record(&table, id.as_str())
    }

    fn list_opportunities(&self) -> Result<Vec<Opportunity>, PipelineError> {
        let table = self.txn.open_table(OPPORTUNITIES).map_err(storage_err)?;
        scan_records(&table)
    }

    fn transitions_for(&self, id: &OpportunityId) -> Result<Vec<StageTransition>, PipelineError> {
        let table = self.txn.open_table(TRANSITIONS).map_err(storage_err)?;
        let all: Vec<StageTransition> = scan_records(&table)?;
        Ok(sort_transitions(
            all.into_iter().filter(|t| &t.opportunity_id == id).collect(),
        ))
    }

    fn get_request(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, PipelineError> {
        let table = self.txn.open_table(APPROVALS).map_err(storage_err)?;
        get_record(&table, id.as_str())
    }

    fn pending_requests(&self) -> Result<Vec<ApprovalRequest>, PipelineError> {
        let table = self.txn.open_table(APPROVALS).map_err(storage_err)?;
        let all: Vec<ApprovalRequest> = scan_records(&table)?;
        Ok(all.into_iter().filter(|r| r.is_pending()).collect())
    }

    fn requests_for(&self, id: &OpportunityId) -> Result<Vec<ApprovalRequest>, PipelineError> {
        let table = self.txn.open_table(APPROVALS).map_err(storage_err)?;
        let all: Vec<ApprovalRequest> = scan_records(&table)?;
        Ok(sort_requests(
            all.into_iter().filter(|r| &r.opportunity_id == id).collect(),
        ))
    }
}

impl StoreWrite for RedbWriter {
    fn insert_opportunity(&mut self, opportunity: &Opportunity) -> Result<(), PipelineError> {
        let bytes = encode(opportunity)?;
        self.insert_new(
            OPPORTUNITIES,
            RecordKind::Opportunity,
            opportunity.id.as_str(),
            &bytes,
        )
    }

    fn update_opportunity(&mut self, opportunity: &mut Opportunity) -> Result<(), PipelineError> {
        let expected = opportunity.version;
        opportunity.version = expected.saturating_add(1);
        let bytes = encode(opportunity)?;
        let result = self.replace_versioned(
            OPPORTUNITIES,
            RecordKind::Opportunity,
            opportunity.id.as_str(),
            |data| decode::<Opportunity>(data).map(|o| o.version),
            expected,
            &bytes,
        );
        if result.is_err() {
            opportunity.version = expected;
        }
        result
    }

    fn insert_transition(&mut self, transition: &StageTransition) -> Result<(), PipelineError> {
        let bytes = encode(transition)?;
        self.insert_new(
            TRANSITIONS,
            RecordKind::Transition,
            transition.id.as_str(),
            &bytes,
        )
    }

    fn insert_request(&mut self, request: &ApprovalRequest) -> Result<(), PipelineError> {
        let bytes = encode(request)?;
        self.insert_new(
            APPROVALS,
            RecordKind::ApprovalRequest,
            request.id.as_str(),
            &bytes,
        )
    }

    fn update_request(&mut self, request: &mut ApprovalRequest) -> Result<(), PipelineError> {
        let expected = request.version;
        request.version = expected.saturating_add(1);
        let bytes = encode(request)?;
        let result = self.replace_versioned(
            APPROVALS,
            RecordKind::ApprovalRequest,
            request.id.as_str(),
            |data| decode::<ApprovalRequest>(data).map(|r| r.version),
            expected,
            &bytes,
        );
        if result.is_err() {
            request.version = expected;
        }
        result
    }

    fn next_sequence(&mut self, scope: &str) -> Result<u64, PipelineError> {
        let mut table = self.txn.open_table(SEQUENCES).map_err(storage_err)?;
        let current = table
            .get(scope)
            .map_err(storage_err)?
            .map(|v| v.value())
            .unwrap_or(0);
        let next = current.saturating_add(1);
        table.insert(scope, next).map_err(storage_err)?;
        Ok(next)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::stage::Stage;
    use crate::storage::test_support::sample_opportunity;
    use tempfile::tempdir;

    #[test]
    fn insert_and_read_back() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("pipeline.redb")).expect("open db");
        let opp = sample_opportunity("OPP-2026-001");

        store.write(|tx| tx.insert_opportunity(&opp)).expect("insert");
        let loaded = store.read(|tx| tx.get_opportunity(&opp.id)).expect("read");
        assert_eq!(loaded, Some(opp));
    }

    #[test]
    fn persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("pipeline.redb");
        let opp = sample_opportunity("OPP-2026-001");

        {
            let store = RedbStore::open(&db_path).expect("open db");
            store.write(|tx| tx.insert_opportunity(&opp)).expect("insert");
            store.write(|tx| tx.next_sequence("OPP-2026")).expect("seq");
        }

        {
            let store = RedbStore::open(&db_path).expect("reopen db");
            let all = store.read(|tx| tx.list_opportunities()).expect("list");
            assert_eq!(all.len(), 1);
            let seq = store.write(|tx| tx.next_sequence("OPP-2026")).expect("seq");
            assert_eq!(seq, 2);
        }
    }

    #[test]
    fn compact_keeps_records() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("pipeline.redb")).expect("open db");
        for n in 1..=20 {
            let opp = sample_opportunity(&format!("OPP-2026-{:03}", n));
            store.write(|tx| tx.insert_opportunity(&opp)).expect("insert");
        }

        store.compact().expect("compact");
        let all = store.read(|tx| tx.list_opportunities()).expect("list");
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn failed_closure_leaves_no_trace() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("pipeline.redb")).expect("open db");
        let opp = sample_opportunity("OPP-2026-001");

        let result: Result<(), PipelineError> = store.write(|tx| {
            tx.insert_opportunity(&opp)?;
            Err(PipelineError::InvalidInput("abort".into()))
        });
        assert!(result.is_err());
        assert!(store.read(|tx| tx.list_opportunities()).unwrap().is_empty());
    }

    #[test]
    fn version_check_rejects_stale_update() {
        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("pipeline.redb")).expect("open db");
        let opp = sample_opportunity("OPP-2026-001");
        store.write(|tx| tx.insert_opportunity(&opp)).unwrap();

        let mut fresh = opp.clone();
        fresh.current_stage = Stage::IdeaCard;
        store.write(|tx| tx.update_opportunity(&mut fresh)).unwrap();
        assert_eq!(fresh.version, 1);

        let mut stale = opp;
        let err = store
            .write(|tx| tx.update_opportunity(&mut stale))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict { .. }));
        assert_eq!(stale.version, 0);

        let stored = store
            .read(|tx| tx.get_opportunity(&fresh.id))
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_stage, Stage::IdeaCard);
    }

    #[test]
    fn transitions_are_insert_only() {
        use crate::types::{StageTransition, TransitionId, TriggerKind};

        let temp = tempdir().expect("temp dir");
        let store = RedbStore::open(temp.path().join("pipeline.redb")).expect("open db");
        let opp = sample_opportunity("OPP-2026-001");
        let transition = StageTransition {
            id: TransitionId::from("TRN-2026-0202100000-00000001"),
            opportunity_id: opp.id.clone(),
            from_stage: Stage::Discovery,
            to_stage: Stage::IdeaCard,
            trigger: TriggerKind::Manual,
            gate_decision: None,
            approved_by: None,
            approved_at: None,
            approval_request_id: None,
            notes: None,
            created_by: "alice".into(),
            created_at: opp.created_at,
        };

        store.write(|tx| tx.insert_transition(&transition)).unwrap();
        let err = store
            .write(|tx| tx.insert_transition(&transition))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Conflict { .. }));

        let listed = store.read(|tx| tx.transitions_for(&opp.id)).unwrap();
        assert_eq!(listed, vec![transition]);
    }
}
