//! # Fund Allocator
//!
//! Core of the **QRKot** charity fund: matches donations against
//! fundraising projects with capped targets.
//!
//! | Piece        | Item(s)                                         |
//! |--------------|-------------------------------------------------|
//! | Data model   | [`CharityProject`], [`Donation`], [`Funding`]   |
//! | Ordering     | [`order_backlog`]                               |
//! | Matching     | [`distribute`]                                  |
//! | Entry points | [`FundBook::allocate_donation`], [`FundBook::allocate_project`] |
//!
//! ## Architecture
//!
//! [`distribute`] is pure arithmetic over already-loaded records and never
//! fails. Reading the backlog and persisting the outcome belong to the
//! storage side: [`book`] does it in memory, the `fund_api` service does it
//! inside a SQLite transaction.

mod allocator;
pub mod book;
mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod invariants;

#[cfg(test)]
mod test_properties;

pub use allocator::{distribute, order_backlog};
pub use book::{BookError, Booked, FundBook};
pub use types::{
    Allocation, CharityProject, Donation, Fundable, FundableKind, Funding, Transfer,
    UnknownKind,
};
