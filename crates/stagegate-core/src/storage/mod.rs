//! # Pipeline Storage
//!
//! The persistence interface the engine consumes, and its two backends.
//!
//! Every engine operation runs inside one [`PipelineStore::write`] closure.
//! The closure's writes become visible together when it returns `Ok` and are
//! discarded when it returns `Err`, so the transaction is the unit of
//! atomicity. Both backends admit one writer at a time, which serialises the
//! read-modify-write of an approval request.
//!
//! Updates are additionally compare-and-swap checked against the record's
//! `version`, so a lost update surfaces as `PipelineError::Conflict` rather
//! than silently overwriting.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::types::{
    ApprovalRequest, ApprovalRequestId, Opportunity, OpportunityId, PipelineError,
    StageTransition,
};

/// Read access inside a transaction.
pub trait StoreRead {
    fn get_opportunity(&self, id: &OpportunityId) -> Result<Option<Opportunity>, PipelineError>;

    /// All opportunities ordered by id.
    fn list_opportunities(&self) -> Result<Vec<Opportunity>, PipelineError>;

    /// Transitions of one opportunity, oldest first.
    fn transitions_for(&self, id: &OpportunityId) -> Result<Vec<StageTransition>, PipelineError>;

    fn get_request(&self, id: &ApprovalRequestId)
    -> Result<Option<ApprovalRequest>, PipelineError>;

    /// Every request whose status is PENDING.
    fn pending_requests(&self) -> Result<Vec<ApprovalRequest>, PipelineError>;

    /// Every request (any status) targeting one opportunity, oldest first.
    fn requests_for(&self, id: &OpportunityId) -> Result<Vec<ApprovalRequest>, PipelineError>;
}

/// Write access inside a transaction.
pub trait StoreWrite: StoreRead {
    /// Fails with `Conflict` if the id is taken.
    fn insert_opportunity(&mut self, opportunity: &Opportunity) -> Result<(), PipelineError>;

    /// Version-checked update; bumps `opportunity.version` on success.
    fn update_opportunity(&mut self, opportunity: &mut Opportunity) -> Result<(), PipelineError>;

    /// Transitions are insert-only; fails with `Conflict` if the id is taken.
    fn insert_transition(&mut self, transition: &StageTransition) -> Result<(), PipelineError>;

    /// Fails with `Conflict` if the id is taken.
    fn insert_request(&mut self, request: &ApprovalRequest) -> Result<(), PipelineError>;

    /// Version-checked update; bumps `request.version` on success.
    fn update_request(&mut self, request: &mut ApprovalRequest) -> Result<(), PipelineError>;

    /// Increment and return the counter for `scope` (first value is 1).
    fn next_sequence(&mut self, scope: &str) -> Result<u64, PipelineError>;
}

/// A transactional record store.
pub trait PipelineStore: Send + Sync {
    /// Run `f` against a consistent snapshot.
    fn read<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&dyn StoreRead) -> Result<T, PipelineError>;

    /// Run `f` in a write transaction; commit on `Ok`, roll back on `Err`.
    fn write<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut dyn StoreWrite) -> Result<T, PipelineError>;
}

impl<S: PipelineStore> PipelineStore for std::sync::Arc<S> {
    fn read<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&dyn StoreRead) -> Result<T, PipelineError>,
    {
        (**self).read(f)
    }

    fn write<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut dyn StoreWrite) -> Result<T, PipelineError>,
    {
        (**self).write(f)
    }
}

/// Backend chosen at runtime.
#[derive(Debug)]
pub enum StorageBackend {
    /// Volatile tables, lost on drop.
    InMemory(MemoryStore),
    /// Disk-backed redb database.
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl PipelineStore for StorageBackend {
    fn read<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&dyn StoreRead) -> Result<T, PipelineError>,
    {
        match self {
            StorageBackend::InMemory(store) => store.read(f),
            StorageBackend::Persistent(store) => store.read(f),
        }
    }

    fn write<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        F: FnOnce(&mut dyn StoreWrite) -> Result<T, PipelineError>,
    {
        match self {
            StorageBackend::InMemory(store) => store.write(f),
            StorageBackend::Persistent(store) => store.write(f),
        }
    }
}
