//! Core business logic for Tally.
//!
//! This crate holds the balance ledger and the fraud alert engine. Storage
//! is reached only through the ports in [`store`]; the Postgres adapter
//! lives in `tally-db`.
//!
//! # Modules
//!
//! - `balance` - Balance rows, audit entries, and planning rules
//! - `ledger` - The transactional operation surface
//! - `alert` - Fraud and integrity detectors, engine, and dispatcher
//! - `limits` - Cached limits with hard-coded fallbacks
//! - `store` - Storage ports and the in-memory store

pub mod alert;
pub mod balance;
pub mod ledger;
pub mod limits;
pub mod store;

pub use alert::{Alert, AlertDispatcher, AlertKind, FraudAlertEngine};
pub use balance::{Balance, BalanceError, LedgerEntry, OperationKind, OperationRequest};
pub use ledger::BalanceLedger;
pub use limits::{LimitsConfig, LimitsProvider};
pub use store::{AlertStore, AuditLog, LedgerStore, MemoryStore, StoreError};
