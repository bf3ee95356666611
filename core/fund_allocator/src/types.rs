//! # Types
//!
//! Shared data structures for charity projects and donations.
//!
//! ## Design decisions
//!
//! ### One funding shape, two kinds
//!
//! A [`CharityProject`] and a [`Donation`] carry the same [`Funding`] block.
//! Everything the allocator touches lives there; kind-specific fields
//! (project name, donation comment) are invisible to it.
//!
//! ### Counterparts at the type level
//!
//! [`Fundable::Counterpart`] ties each kind to the opposite one, so a
//! donation can only ever be distributed over projects and vice versa.
//!
//! ### Closure as a one-way transition
//!
//! ```text
//! open ──(invested == full)──► closed
//! ```
//!
//! A closed entity never reopens and its `close_date` is never rewritten.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which side of the matching an entity is on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundableKind {
    CharityProject,
    Donation,
}

impl FundableKind {
    /// Short identifier suitable for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CharityProject => "charity_project",
            Self::Donation => "donation",
        }
    }

    /// The kind this one is matched against.
    pub fn counterpart(&self) -> Self {
        match self {
            Self::CharityProject => Self::Donation,
            Self::Donation => Self::CharityProject,
        }
    }
}

impl fmt::Display for FundableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored kind string that names neither side.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown fundable kind: {0:?}")]
pub struct UnknownKind(pub String);

impl FromStr for FundableKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charity_project" => Ok(Self::CharityProject),
            "donation" => Ok(Self::Donation),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

impl TryFrom<String> for FundableKind {
    type Error = UnknownKind;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Funding state shared by projects and donations.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Funding {
    /// Target amount. Always positive.
    pub full_amount: i64,
    /// Amount already matched against the other side.
    pub invested_amount: i64,
    /// `true` once `invested_amount == full_amount`.
    pub fully_invested: bool,
    pub create_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_date: Option<DateTime<Utc>>,
}

impl Funding {
    /// Fresh, zero-invested funding block.
    pub fn new(full_amount: i64, create_date: DateTime<Utc>) -> Self {
        Self {
            full_amount,
            invested_amount: 0,
            fully_invested: false,
            create_date,
            close_date: None,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.fully_invested
    }

    /// Capacity still unfilled.
    pub fn deficit(&self) -> i64 {
        self.full_amount - self.invested_amount
    }

    /// Mark as fully invested.
    ///
    /// Returns `false` and leaves the block untouched when it is already
    /// closed, so `close_date` is set at most once.
    pub fn close(&mut self, now: DateTime<Utc>) -> bool {
        if self.fully_invested {
            return false;
        }
        self.fully_invested = true;
        self.close_date = Some(now);
        true
    }

    /// Raise `invested_amount` by `amount`. Callers bound `amount` by
    /// [`Funding::deficit`].
    pub(crate) fn invest(&mut self, amount: i64) {
        debug_assert!(amount >= 0 && amount <= self.deficit());
        self.invested_amount += amount;
    }
}

/// Anything that can sit on either side of an allocation.
pub trait Fundable: Sized {
    /// The kind this one is distributed against.
    type Counterpart: Fundable<Counterpart = Self>;

    const KIND: FundableKind;

    fn id(&self) -> i64;
    fn funding(&self) -> &Funding;
    fn funding_mut(&mut self) -> &mut Funding;
}

/// A fundraising project with a capped target.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CharityProject {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub funding: Funding,
}

/// A single donation waiting to be spread over projects.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub funding: Funding,
}

impl Fundable for CharityProject {
    type Counterpart = Donation;
    const KIND: FundableKind = FundableKind::CharityProject;

    fn id(&self) -> i64 {
        self.id
    }

    fn funding(&self) -> &Funding {
        &self.funding
    }

    fn funding_mut(&mut self) -> &mut Funding {
        &mut self.funding
    }
}

impl Fundable for Donation {
    type Counterpart = CharityProject;
    const KIND: FundableKind = FundableKind::Donation;

    fn id(&self) -> i64 {
        self.id
    }

    fn funding(&self) -> &Funding {
        &self.funding
    }

    fn funding_mut(&mut self) -> &mut Funding {
        &mut self.funding
    }
}

/// One movement of value from the source into a sink.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub sink_id: i64,
    pub amount: i64,
    /// Whether this transfer filled the sink.
    pub sink_closed: bool,
}

/// Outcome of one distribution pass.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub source_kind: FundableKind,
    pub source_id: i64,
    /// Transfers in sink order. Only touched sinks appear.
    pub transfers: Vec<Transfer>,
    pub source_closed: bool,
    /// Instant used for every closure in this pass.
    pub at: DateTime<Utc>,
}

impl Allocation {
    /// Total value moved out of the source.
    pub fn placed(&self) -> i64 {
        self.transfers.iter().map(|t| t.amount).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn sink_kind(&self) -> FundableKind {
        self.source_kind.counterpart()
    }

    /// Ids of sinks closed by this pass.
    pub fn closed_sinks(&self) -> impl Iterator<Item = i64> + '_ {
        self.transfers
            .iter()
            .filter(|t| t.sink_closed)
            .map(|t| t.sink_id)
    }
}
