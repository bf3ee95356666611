//! Row shapes stored in SQLite and the request payloads accepted by the API.
//!
//! Rows convert into the `fund_allocator` domain types; timestamps are kept
//! as unix microseconds in the database.

use chrono::{DateTime, SubsecRound, Utc};
use fund_allocator::{CharityProject, Donation, FundableKind, Funding};
use serde::{Deserialize, Serialize};

use crate::errors::{FundError, Result};

/// A charity project as stored in / read from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub full_amount: i64,
    pub invested_amount: i64,
    pub fully_invested: bool,
    pub create_date: i64,
    pub close_date: Option<i64>,
}

/// A donation as stored in / read from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DonationRow {
    pub id: i64,
    pub comment: Option<String>,
    pub full_amount: i64,
    pub invested_amount: i64,
    pub fully_invested: bool,
    pub create_date: i64,
    pub close_date: Option<i64>,
}

/// One ledger entry written by an allocation pass.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AllocationRecord {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub source_kind: FundableKind,
    pub source_id: i64,
    #[sqlx(try_from = "String")]
    pub sink_kind: FundableKind,
    pub sink_id: i64,
    pub amount: i64,
    pub created_at: i64,
}

/// Current time at the precision rows keep, so entities handed back to
/// callers match what a later read returns.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| FundError::CorruptRecord(format!("timestamp out of range: {micros}")))
}

fn funding(
    full_amount: i64,
    invested_amount: i64,
    fully_invested: bool,
    create_date: i64,
    close_date: Option<i64>,
) -> Result<Funding> {
    Ok(Funding {
        full_amount,
        invested_amount,
        fully_invested,
        create_date: from_micros(create_date)?,
        close_date: close_date.map(from_micros).transpose()?,
    })
}

impl TryFrom<ProjectRow> for CharityProject {
    type Error = FundError;

    fn try_from(row: ProjectRow) -> Result<Self> {
        Ok(CharityProject {
            id: row.id,
            funding: funding(
                row.full_amount,
                row.invested_amount,
                row.fully_invested,
                row.create_date,
                row.close_date,
            )?,
            name: row.name,
            description: row.description,
        })
    }
}

impl TryFrom<DonationRow> for Donation {
    type Error = FundError;

    fn try_from(row: DonationRow) -> Result<Self> {
        Ok(Donation {
            id: row.id,
            funding: funding(
                row.full_amount,
                row.invested_amount,
                row.fully_invested,
                row.create_date,
                row.close_date,
            )?,
            comment: row.comment,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Request payloads
// ─────────────────────────────────────────────────────────

/// `POST /charity_project/`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectCreate {
    pub name: String,
    pub description: String,
    pub full_amount: i64,
}

/// `PATCH /charity_project/:id`. Funding state is never writable here.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub full_amount: Option<i64>,
}

impl ProjectUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.full_amount.is_none()
    }
}

/// `POST /donation/`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DonationCreate {
    pub full_amount: i64,
    pub comment: Option<String>,
}
