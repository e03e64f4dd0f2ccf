//! User balance data model.
//!
//! This module holds the pieces of the ledger that need no storage:
//! - The per-user balance row and its invariants
//! - Guards and deltas used for conditional writes
//! - Audit entries describing each committed mutation
//! - Planning rules that turn an operation request into a guarded write
//! - Error types for balance operations

pub mod entry;
pub mod error;
pub mod rules;
pub mod types;

#[cfg(test)]
mod rules_props;

pub use entry::{
    LedgerEntry, MAX_CLIENT_ADDRESS_LEN, MAX_CORRELATION_ID_LEN, OperationRequest, fits_column,
};
pub use error::{BalanceError, ErrorCategory};
pub use rules::{Mutation, plan, validate_amount};
pub use types::{Balance, BalanceDelta, BalanceGuard, OperationKind, OperatorInfo, OperatorKind};
