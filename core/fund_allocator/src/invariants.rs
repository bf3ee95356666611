//! Invariant checkers shared by the unit tests of this crate and the
//! service's storage tests. Every function panics with the violated rule.

use crate::types::{Allocation, Fundable, Funding};

/// INV-1: `0 <= invested_amount <= full_amount`.
pub fn assert_capacity(id: i64, funding: &Funding) {
    assert!(
        funding.invested_amount >= 0,
        "INV-1 violated: entity {} has negative invested amount ({})",
        id,
        funding.invested_amount
    );
    assert!(
        funding.invested_amount <= funding.full_amount,
        "INV-1 violated: entity {} overfilled ({} > {})",
        id,
        funding.invested_amount,
        funding.full_amount
    );
}

/// INV-2: `fully_invested` iff the target is reached, and `close_date` is
/// set iff `fully_invested`.
pub fn assert_closure_consistent(id: i64, funding: &Funding) {
    assert_eq!(
        funding.fully_invested,
        funding.invested_amount == funding.full_amount,
        "INV-2 violated: entity {} has fully_invested={} at {}/{}",
        id,
        funding.fully_invested,
        funding.invested_amount,
        funding.full_amount
    );
    assert_eq!(
        funding.close_date.is_some(),
        funding.fully_invested,
        "INV-2 violated: entity {} close_date={:?} with fully_invested={}",
        id,
        funding.close_date,
        funding.fully_invested
    );
}

/// INV-3: the target amount is positive.
pub fn assert_target_positive(id: i64, funding: &Funding) {
    assert!(
        funding.full_amount > 0,
        "INV-3 violated: entity {} has non-positive target ({})",
        id,
        funding.full_amount
    );
}

/// INV-4: value placed into sinks equals what left the source.
pub fn assert_conserved(allocation: &Allocation, source_before: i64, source_after: i64) {
    assert_eq!(
        allocation.placed(),
        source_after - source_before,
        "INV-4 violated: {} {} placed {} but its invested amount moved {} -> {}",
        allocation.source_kind,
        allocation.source_id,
        allocation.placed(),
        source_before,
        source_after
    );
}

/// INV-5: `invested_amount` never decreases and a closed entity stays
/// closed with the same `close_date`.
pub fn assert_monotonic(id: i64, before: &Funding, after: &Funding) {
    assert!(
        after.invested_amount >= before.invested_amount,
        "INV-5 violated: entity {} invested amount decreased {} -> {}",
        id,
        before.invested_amount,
        after.invested_amount
    );
    if before.fully_invested {
        assert_eq!(
            before, after,
            "INV-5 violated: closed entity {} was modified",
            id
        );
    }
}

/// Run all per-entity invariants.
pub fn assert_all<F: Fundable>(entity: &F) {
    let funding = entity.funding();
    assert_target_positive(entity.id(), funding);
    assert_capacity(entity.id(), funding);
    assert_closure_consistent(entity.id(), funding);
}
