//! # Allocator
//!
//! Moves value from one freshly created entity (the *source*) into the
//! backlog of open entities of the opposite kind (the *sinks*).
//!
//! A donation is spread over open projects; a new project soaks up open
//! donations. Both directions run through [`distribute`], parameterised by
//! the source type, so the two paths share every line of arithmetic.
//!
//! Sinks are consumed strictly in the order given. Callers obtain that
//! order from [`order_backlog`] (or an equivalent `ORDER BY create_date,
//! id` query), which makes a pass fully deterministic.

use chrono::{DateTime, Utc};

use crate::types::{Allocation, Fundable, Transfer};

/// Sort open entities first-come-first-served.
///
/// Ties on `create_date` fall back to `id`, so two backlogs with equal
/// contents always come out in the same order. Closed entries are dropped.
pub fn order_backlog<F: Fundable>(mut backlog: Vec<F>) -> Vec<F> {
    backlog.retain(|f| f.funding().is_open());
    backlog.sort_by(|a, b| {
        a.funding()
            .create_date
            .cmp(&b.funding().create_date)
            .then_with(|| a.id().cmp(&b.id()))
    });
    backlog
}

/// Distribute the source's remaining capacity over `sinks`, in order.
///
/// Every sink that reaches its target and, if fully placed, the source are
/// closed with the same `now`. Sinks after the point where the source runs
/// dry are left untouched. A sink that is already closed is skipped.
///
/// The pass starts from the source's current deficit, so running it again
/// on an already closed source places nothing. It must still run only once
/// per source: the caller records completion in the same transaction that
/// persists the result.
pub fn distribute<F: Fundable>(
    source: &mut F,
    sinks: &mut [F::Counterpart],
    now: DateTime<Utc>,
) -> Allocation {
    let mut allocation = Allocation {
        source_kind: F::KIND,
        source_id: source.id(),
        transfers: Vec::new(),
        source_closed: false,
        at: now,
    };

    let mut available = source.funding().deficit();
    if available <= 0 || !source.funding().is_open() {
        return allocation;
    }

    for sink in sinks.iter_mut() {
        let deficit = sink.funding().deficit();
        if !sink.funding().is_open() || deficit <= 0 {
            continue;
        }

        let transfer = deficit.min(available);
        sink.funding_mut().invest(transfer);
        source.funding_mut().invest(transfer);
        available -= transfer;

        let sink_closed = sink.funding().deficit() == 0 && sink.funding_mut().close(now);
        allocation.transfers.push(Transfer {
            sink_id: sink.id(),
            amount: transfer,
            sink_closed,
        });

        if available == 0 {
            allocation.source_closed = source.funding_mut().close(now);
            break;
        }
    }

    allocation
}
