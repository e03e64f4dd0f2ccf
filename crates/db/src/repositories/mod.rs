//! Postgres implementations of the ledger storage ports.
//!
//! [`PgLedgerStore`] implements every port in `tally_core::store` over one
//! connection pool:
//! - `ledger` - row locks, guarded updates, transactions
//! - `audit` - read side of `balance_logs`
//! - `alert` - `balance_alerts` persistence and triage

mod alert;
mod audit;
mod convert;
mod ledger;

pub use ledger::{PgLedgerStore, PgLedgerTransaction};
