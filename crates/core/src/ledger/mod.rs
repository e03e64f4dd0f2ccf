//! Balance ledger service.
//!
//! Every mutation runs the same transaction: lock the row, plan against
//! it, write with a guard, append the audit entry, commit. Alert
//! detection is handed off after commit.

mod service;

#[cfg(test)]
mod tests;

pub use service::BalanceLedger;
