//! Allocation service: runs one `distribute` pass per newly created
//! project or donation inside a single SQLite transaction.
//!
//! ## Consistency
//!
//! * Every pass holds the process-wide write lock for its whole
//!   transaction, so two passes never read the same backlog concurrently.
//! * New projects and donations are inserted by the pass that allocates
//!   them, so a failed pass leaves no unallocated row behind and the
//!   caller can simply resubmit.
//! * The completion marker in `allocation_runs` is claimed first in the same
//!   transaction; a second call for the same entity is a no-op.
//! * Row updates are guarded on the invested amount that was read. Any
//!   mismatch, or SQLite reporting the database as busy, rolls the whole
//!   pass back and recomputes it from a fresh read with exponential
//!   back-off, up to the configured number of attempts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fund_allocator::{distribute, CharityProject, Donation, Fundable, FundableKind};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::db::{self, Table};
use crate::errors::{FundError, Result};
use crate::models::{self, DonationCreate, ProjectCreate};

const INITIAL_BACKOFF_MS: u64 = 20;
const MAX_BACKOFF_MS: u64 = 1_000;

/// Why a single attempt gave up.
#[derive(Debug)]
enum AttemptError {
    /// A row changed under us or the database was busy; safe to recompute.
    Retryable(String),
    Fatal(FundError),
}

impl From<FundError> for AttemptError {
    fn from(err: FundError) -> Self {
        if db::is_busy(&err) {
            AttemptError::Retryable(err.to_string())
        } else {
            AttemptError::Fatal(err)
        }
    }
}

impl From<sqlx::Error> for AttemptError {
    fn from(err: sqlx::Error) -> Self {
        FundError::from(err).into()
    }
}

/// Where the source of a pass comes from.
#[derive(Clone, Copy)]
enum Source<'a> {
    Stored(i64),
    NewProject(&'a ProjectCreate),
    NewDonation(&'a DonationCreate),
}

impl fmt::Display for Source<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Stored(id) => write!(f, "{id}"),
            Source::NewProject(input) => write!(f, "{:?} (new)", input.name),
            Source::NewDonation(input) => write!(f, "of {} (new)", input.full_amount),
        }
    }
}

#[derive(Clone)]
pub struct Allocator {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    max_attempts: u32,
}

impl Allocator {
    pub fn new(pool: SqlitePool, max_attempts: u32) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Exclusive access to funding state for edits outside an allocation
    /// pass (project updates and deletes).
    pub async fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Store a new project and fill it from open donations in one
    /// transaction.
    pub async fn create_project(&self, input: &ProjectCreate) -> Result<CharityProject> {
        self.allocate::<CharityProject>(Source::NewProject(input)).await
    }

    /// Store a new donation and spread it over open projects in one
    /// transaction.
    pub async fn create_donation(&self, input: &DonationCreate) -> Result<Donation> {
        self.allocate::<Donation>(Source::NewDonation(input)).await
    }

    /// Spread a stored donation over open projects, oldest first.
    pub async fn allocate_donation(&self, id: i64) -> Result<Donation> {
        self.allocate::<Donation>(Source::Stored(id)).await
    }

    /// Fill a stored project from open donations, oldest first.
    pub async fn allocate_project(&self, id: i64) -> Result<CharityProject> {
        self.allocate::<CharityProject>(Source::Stored(id)).await
    }

    /// Allocate every project and donation that has no completion marker,
    /// in creation order across both kinds. Returns how many were processed.
    pub async fn allocate_pending(&self) -> Result<usize> {
        let projects = db::unallocated::<CharityProject>(&self.pool).await?;
        let donations = db::unallocated::<Donation>(&self.pool).await?;

        let mut pending: Vec<(i64, FundableKind, i64)> = projects
            .into_iter()
            .map(|(id, created)| (created, FundableKind::CharityProject, id))
            .chain(
                donations
                    .into_iter()
                    .map(|(id, created)| (created, FundableKind::Donation, id)),
            )
            .collect();
        pending.sort();

        for (_, kind, id) in &pending {
            match kind {
                FundableKind::CharityProject => {
                    self.allocate_project(*id).await?;
                }
                FundableKind::Donation => {
                    self.allocate_donation(*id).await?;
                }
            }
        }

        if !pending.is_empty() {
            info!("Recovered {} pending allocation(s)", pending.len());
        }
        Ok(pending.len())
    }

    async fn allocate<F>(&self, source: Source<'_>) -> Result<F>
    where
        F: Table,
        F::Counterpart: Table,
    {
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 1..=self.max_attempts {
            match self.attempt::<F>(source).await {
                Ok(entity) => return Ok(entity),
                Err(AttemptError::Fatal(e @ FundError::NotFound(_))) => return Err(e),
                Err(AttemptError::Fatal(e)) if db::is_unique_violation(&e) => return Err(e),
                Err(AttemptError::Fatal(e)) => {
                    return Err(FundError::AllocationFailed(e.to_string()))
                }
                Err(AttemptError::Retryable(reason)) if attempt < self.max_attempts => {
                    warn!(
                        "Allocation of {} {source} conflicted (attempt {attempt}, retry in {backoff}ms): {reason}",
                        F::KIND
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_MS);
                }
                Err(AttemptError::Retryable(reason)) => {
                    return Err(FundError::AllocationFailed(format!(
                        "{} {source} gave up after {attempt} attempts: {reason}",
                        F::KIND
                    )))
                }
            }
        }

        Err(FundError::AllocationFailed(format!(
            "{} {source} was not attempted",
            F::KIND
        )))
    }

    /// One full pass. Any early return drops the transaction, which rolls
    /// back everything written so far.
    async fn attempt<F>(&self, source: Source<'_>) -> std::result::Result<F, AttemptError>
    where
        F: Table,
        F::Counterpart: Table,
    {
        let _guard = self.write_lock.lock().await;
        let now = models::now();
        let mut tx = self.pool.begin().await?;

        let id = match source {
            Source::Stored(id) => id,
            Source::NewProject(input) => db::insert_project(&mut tx, input, now).await?.id,
            Source::NewDonation(input) => db::insert_donation(&mut tx, input, now).await?.id,
        };

        if !db::claim_allocation(&mut tx, F::KIND, id, now).await? {
            let current = db::fetch::<F>(&mut tx, id).await?.ok_or_else(|| not_found::<F>(id))?;
            debug!("{} {id} already allocated, nothing to do", F::KIND);
            return Ok(current);
        }

        let mut entity = db::fetch::<F>(&mut tx, id)
            .await?
            .ok_or_else(|| not_found::<F>(id))?;
        let entity_before = entity.funding().invested_amount;

        let mut sinks = db::fetch_open::<F::Counterpart>(&mut tx).await?;
        let sinks_before: Vec<i64> = sinks
            .iter()
            .map(|s| s.funding().invested_amount)
            .collect();

        let allocation = distribute(&mut entity, &mut sinks, now);

        for (sink, before) in sinks.iter().zip(sinks_before) {
            if sink.funding().invested_amount == before {
                continue;
            }
            if !db::save_funding::<F::Counterpart>(&mut tx, sink.id(), before, sink.funding())
                .await?
            {
                return Err(AttemptError::Retryable(format!(
                    "{} {} changed concurrently",
                    allocation.sink_kind(),
                    sink.id()
                )));
            }
        }

        if !allocation.is_empty()
            && !db::save_funding::<F>(&mut tx, id, entity_before, entity.funding()).await?
        {
            return Err(AttemptError::Retryable(format!(
                "{} {id} changed concurrently",
                F::KIND
            )));
        }

        db::insert_transfers(&mut tx, &allocation).await?;
        tx.commit().await?;

        info!(
            "Allocated {} {id}: placed {} into {} {}(s), {} closed, source {}",
            F::KIND,
            allocation.placed(),
            allocation.transfers.len(),
            allocation.sink_kind(),
            allocation.closed_sinks().count(),
            if allocation.source_closed { "closed" } else { "open" }
        );

        Ok(entity)
    }
}

fn not_found<F: Fundable>(id: i64) -> AttemptError {
    AttemptError::Fatal(FundError::NotFound(format!("{} {id} not found", F::KIND)))
}
