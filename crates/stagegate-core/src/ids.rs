//! # Identifier Generation
//!
//! Human-readable ids. Counters live in the store so ids stay unique across
//! process restarts; the timestamp part is informational only.
//!
//! - Opportunity: `OPP-<year>-<NNN>` (per-year counter, at least 3 digits)
//! - Transition: `TRN-<year>-<MMDDhhmmss>-<seq>`
//! - Approval request: `APR-<year>-<MMDDhhmmss>-<seq>`
//!
//! `<seq>` is zero-padded to eight digits so ids minted in the same second
//! still sort in allocation order.

use crate::primitives::{APPROVAL_PREFIX, OPPORTUNITY_PREFIX, TRANSITION_PREFIX};
use crate::storage::StoreWrite;
use crate::types::{ApprovalRequestId, OpportunityId, PipelineError, TransitionId};
use chrono::{DateTime, Datelike, Utc};

/// Allocate the next opportunity id for the year of `now`.
pub fn next_opportunity_id(
    tx: &mut dyn StoreWrite,
    now: DateTime<Utc>,
) -> Result<OpportunityId, PipelineError> {
    let year = now.year();
    let seq = tx.next_sequence(&format!("{}-{}", OPPORTUNITY_PREFIX, year))?;
    Ok(OpportunityId(format!("{}-{}-{:03}", OPPORTUNITY_PREFIX, year, seq)))
}

/// Allocate the next transition id.
pub fn next_transition_id(
    tx: &mut dyn StoreWrite,
    now: DateTime<Utc>,
) -> Result<TransitionId, PipelineError> {
    timestamped(tx, TRANSITION_PREFIX, now).map(TransitionId)
}

/// Allocate the next approval request id.
pub fn next_approval_id(
    tx: &mut dyn StoreWrite,
    now: DateTime<Utc>,
) -> Result<ApprovalRequestId, PipelineError> {
    timestamped(tx, APPROVAL_PREFIX, now).map(ApprovalRequestId)
}

fn timestamped(
    tx: &mut dyn StoreWrite,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<String, PipelineError> {
    let seq = tx.next_sequence(prefix)?;
    Ok(format!(
        "{}-{}-{}-{:08}",
        prefix,
        now.year(),
        now.format("%m%d%H%M%S"),
        seq
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, PipelineStore};
    use chrono::TimeZone;

    fn at(year: i32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, 5, 17, 8, 30, 5)
            .single()
            .expect("valid date")
    }

    #[test]
    fn opportunity_ids_count_per_year() {
        let store = MemoryStore::new();
        let ids = store
            .write(|tx| {
                Ok(vec![
                    next_opportunity_id(tx, at(2026))?,
                    next_opportunity_id(tx, at(2026))?,
                    next_opportunity_id(tx, at(2027))?,
                ])
            })
            .expect("allocate");
        assert_eq!(ids[0].as_str(), "OPP-2026-001");
        assert_eq!(ids[1].as_str(), "OPP-2026-002");
        assert_eq!(ids[2].as_str(), "OPP-2027-001");
    }

    #[test]
    fn timestamped_ids_are_unique_within_one_second() {
        let store = MemoryStore::new();
        let (a, b) = store
            .write(|tx| Ok((next_transition_id(tx, at(2026))?, next_transition_id(tx, at(2026))?)))
            .expect("allocate");
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "TRN-2026-0517083005-00000001");
    }

    #[test]
    fn timestamped_ids_sort_in_allocation_order_past_four_digits() {
        let store = MemoryStore::new();
        let ids = store
            .write(|tx| {
                (0..10_001)
                    .map(|_| next_approval_id(tx, at(2026)))
                    .collect::<Result<Vec<_>, _>>()
            })
            .expect("allocate");
        let last = &ids[ids.len() - 1];
        assert_eq!(last.as_str(), "APR-2026-0517083005-00010001");
        assert!(ids[9_998] < ids[9_999]);
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn approval_ids_use_their_own_prefix() {
        let store = MemoryStore::new();
        let id = store
            .write(|tx| next_approval_id(tx, at(2026)))
            .expect("allocate");
        assert!(id.as_str().starts_with("APR-2026-"));
    }
}
