//! # Fund book
//!
//! In-memory store of projects and donations implementing the two
//! allocation entry points end to end: fetch the ordered open backlog, run
//! [`distribute`], write back every touched record and mark the source as
//! allocated.
//!
//! | Collection  | Key   | Value              |
//! |-------------|-------|--------------------|
//! | `projects`  | `id`  | [`CharityProject`] |
//! | `donations` | `id`  | [`Donation`]       |
//! | `allocated` | kind, id | completion marker |
//!
//! The SQL-backed service follows the same steps inside one database
//! transaction.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::allocator::{distribute, order_backlog};
use crate::types::{Allocation, CharityProject, Donation, Fundable, FundableKind, Funding};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BookError {
    #[error("{0} {1} not found")]
    NotFound(FundableKind, i64),

    #[error("{0} {1} was already allocated")]
    AlreadyAllocated(FundableKind, i64),
}

/// Entities that live in a [`FundBook`] collection.
pub trait Booked: Fundable + Clone {
    fn table(book: &FundBook) -> &BTreeMap<i64, Self>;
    fn table_mut(book: &mut FundBook) -> &mut BTreeMap<i64, Self>;
}

impl Booked for CharityProject {
    fn table(book: &FundBook) -> &BTreeMap<i64, Self> {
        &book.projects
    }

    fn table_mut(book: &mut FundBook) -> &mut BTreeMap<i64, Self> {
        &mut book.projects
    }
}

impl Booked for Donation {
    fn table(book: &FundBook) -> &BTreeMap<i64, Self> {
        &book.donations
    }

    fn table_mut(book: &mut FundBook) -> &mut BTreeMap<i64, Self> {
        &mut book.donations
    }
}

#[derive(Debug, Default, Clone)]
pub struct FundBook {
    projects: BTreeMap<i64, CharityProject>,
    donations: BTreeMap<i64, Donation>,
    allocated: BTreeSet<(FundableKind, i64)>,
    next_project_id: i64,
    next_donation_id: i64,
}

impl FundBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, zero-invested project. Returns the stored copy.
    pub fn create_project(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        full_amount: i64,
        create_date: DateTime<Utc>,
    ) -> CharityProject {
        self.next_project_id += 1;
        let project = CharityProject {
            id: self.next_project_id,
            name: name.into(),
            description: description.into(),
            funding: Funding::new(full_amount, create_date),
        };
        self.projects.insert(project.id, project.clone());
        project
    }

    /// Register a new, zero-invested donation. Returns the stored copy.
    pub fn create_donation(
        &mut self,
        full_amount: i64,
        comment: Option<String>,
        create_date: DateTime<Utc>,
    ) -> Donation {
        self.next_donation_id += 1;
        let donation = Donation {
            id: self.next_donation_id,
            comment,
            funding: Funding::new(full_amount, create_date),
        };
        self.donations.insert(donation.id, donation.clone());
        donation
    }

    pub fn project(&self, id: i64) -> Option<&CharityProject> {
        self.projects.get(&id)
    }

    pub fn donation(&self, id: i64) -> Option<&Donation> {
        self.donations.get(&id)
    }

    pub fn projects(&self) -> impl Iterator<Item = &CharityProject> {
        self.projects.values()
    }

    pub fn donations(&self) -> impl Iterator<Item = &Donation> {
        self.donations.values()
    }

    /// Open entities of kind `F`, oldest first.
    pub fn open<F: Booked>(&self) -> Vec<F> {
        order_backlog(F::table(self).values().cloned().collect())
    }

    pub fn is_allocated(&self, kind: FundableKind, id: i64) -> bool {
        self.allocated.contains(&(kind, id))
    }

    /// Spread a donation over open projects.
    pub fn allocate_donation(
        &mut self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<(Donation, Allocation), BookError> {
        self.allocate::<Donation>(id, now)
    }

    /// Fill a project from open donations.
    pub fn allocate_project(
        &mut self,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<(CharityProject, Allocation), BookError> {
        self.allocate::<CharityProject>(id, now)
    }

    fn allocate<F>(&mut self, id: i64, now: DateTime<Utc>) -> Result<(F, Allocation), BookError>
    where
        F: Booked,
        F::Counterpart: Booked,
    {
        if self.is_allocated(F::KIND, id) {
            return Err(BookError::AlreadyAllocated(F::KIND, id));
        }
        let mut source = F::table(self)
            .get(&id)
            .cloned()
            .ok_or(BookError::NotFound(F::KIND, id))?;

        let mut sinks = self.open::<F::Counterpart>();
        let allocation = distribute(&mut source, &mut sinks, now);

        let touched: BTreeSet<i64> = allocation.transfers.iter().map(|t| t.sink_id).collect();
        let table = <F::Counterpart as Booked>::table_mut(self);
        for sink in sinks.into_iter().filter(|s| touched.contains(&s.id())) {
            table.insert(sink.id(), sink);
        }
        F::table_mut(self).insert(id, source.clone());
        self.allocated.insert((F::KIND, id));

        Ok((source, allocation))
    }
}
