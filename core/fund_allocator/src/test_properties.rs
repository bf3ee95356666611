use chrono::{DateTime, Utc};
use proptest::prelude::*;

use crate::invariants::{assert_all, assert_conserved, assert_monotonic};
use crate::{distribute, order_backlog, CharityProject, Donation, Fundable, Funding};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn project(id: i64, full: i64, created: i64) -> CharityProject {
    CharityProject {
        id,
        name: format!("project-{id}"),
        description: "shelter".to_string(),
        funding: Funding::new(full, at(created)),
    }
}

fn donation(id: i64, full: i64, created: i64) -> Donation {
    Donation {
        id,
        comment: Some(format!("donation-{id}")),
        funding: Funding::new(full, at(created)),
    }
}

/// An open project: `(full_amount, invested_amount, created)` with
/// `invested_amount < full_amount`.
fn open_project_parts() -> impl Strategy<Value = (i64, i64, i64)> {
    (1i64..=20).prop_flat_map(|full| (Just(full), 0..full, 0i64..5))
}

#[test]
fn test_fairness_oldest_sink_first() {
    let mut sinks = vec![project(1, 5, 1), project(2, 5, 2)];
    let mut source = donation(1, 7, 3);

    distribute(&mut source, &mut sinks, at(10));

    assert_eq!(sinks[0].funding.invested_amount, 5);
    assert!(sinks[0].funding.fully_invested);
    assert_eq!(sinks[1].funding.invested_amount, 2);
    assert!(!sinks[1].funding.fully_invested);
    assert_eq!(sinks[1].funding.close_date, None);
    assert_eq!(source.funding.invested_amount, 7);
    assert!(source.funding.fully_invested);
}

#[test]
fn test_exact_fill_closes_both_at_same_instant() {
    let mut sinks = vec![project(1, 10, 0)];
    let mut source = donation(1, 10, 1);

    let allocation = distribute(&mut source, &mut sinks, at(5));

    assert!(source.funding.fully_invested);
    assert!(sinks[0].funding.fully_invested);
    assert_eq!(source.funding.close_date, Some(at(5)));
    assert_eq!(source.funding.close_date, sinks[0].funding.close_date);
    assert!(allocation.source_closed);
    assert_eq!(allocation.closed_sinks().collect::<Vec<_>>(), vec![1]);
}

#[test]
fn test_empty_backlog_leaves_source_untouched() {
    let mut sinks: Vec<CharityProject> = Vec::new();
    let mut source = donation(1, 10, 0);
    let before = source.clone();

    let allocation = distribute(&mut source, &mut sinks, at(1));

    assert!(allocation.is_empty());
    assert!(!allocation.source_closed);
    assert_eq!(source, before);
}

#[test]
fn test_source_outlasting_backlog_stays_open() {
    let mut sinks = vec![donation(1, 1, 0), donation(2, 1, 1), donation(3, 1, 2)];
    let mut source = project(1, 5, 3);

    let allocation = distribute(&mut source, &mut sinks, at(9));

    assert_eq!(source.funding.invested_amount, 3);
    assert!(!source.funding.fully_invested);
    assert_eq!(source.funding.close_date, None);
    assert_eq!(allocation.placed(), 3);
    for sink in &sinks {
        assert_all(sink);
        assert!(sink.funding.fully_invested);
    }
    assert_all(&source);
}

#[test]
fn test_remaining_sinks_untouched_after_source_runs_dry() {
    let mut sinks = vec![project(1, 3, 0), project(2, 3, 1), project(3, 3, 2)];
    let mut source = donation(1, 3, 3);

    let allocation = distribute(&mut source, &mut sinks, at(4));

    assert_eq!(allocation.transfers.len(), 1);
    assert_eq!(sinks[1].funding, Funding::new(3, at(1)));
    assert_eq!(sinks[2].funding, Funding::new(3, at(2)));
}

#[test]
fn test_same_snapshot_same_result() {
    let snapshot = vec![project(1, 4, 0), project(2, 9, 0), project(3, 2, 1)];
    let fresh = donation(1, 11, 2);

    let mut first_sinks = order_backlog(snapshot.clone());
    let mut first_source = fresh.clone();
    let first = distribute(&mut first_source, &mut first_sinks, at(3));

    let mut second_sinks = order_backlog(snapshot.into_iter().rev().collect());
    let mut second_source = fresh;
    let second = distribute(&mut second_source, &mut second_sinks, at(3));

    assert_eq!(first, second);
    assert_eq!(first_sinks, second_sinks);
    assert_eq!(first_source, second_source);
}

proptest! {
    /// Whatever the backlog looks like, a pass moves exactly what the source
    /// gives up, never overfills a sink and never reopens or shrinks one.
    #[test]
    fn prop_distribute_conserves_and_respects_capacity(
        parts in prop::collection::vec(open_project_parts(), 0..6),
        amount in 1i64..=40,
    ) {
        let sinks: Vec<CharityProject> = parts
            .iter()
            .enumerate()
            .map(|(i, &(full, invested, created))| {
                let mut p = project(i as i64 + 1, full, created);
                p.funding.invested_amount = invested;
                p
            })
            .collect();
        let mut sinks = order_backlog(sinks);
        let before_sinks = sinks.clone();

        let mut source = donation(1, amount, 10);
        let before_source = source.funding.invested_amount;

        let allocation = distribute(&mut source, &mut sinks, at(11));

        assert_conserved(&allocation, before_source, source.funding.invested_amount);
        assert_all(&source);
        for (before, after) in before_sinks.iter().zip(&sinks) {
            assert_all(after);
            assert_monotonic(after.id(), &before.funding, &after.funding);
        }

        let absorbed: i64 = sinks
            .iter()
            .zip(&before_sinks)
            .map(|(a, b)| a.funding.invested_amount - b.funding.invested_amount)
            .sum();
        prop_assert_eq!(absorbed, allocation.placed());

        let room: i64 = before_sinks.iter().map(|s| s.funding.deficit()).sum();
        prop_assert_eq!(allocation.placed(), amount.min(room));
        prop_assert_eq!(source.funding.fully_invested, amount <= room);
    }
}
