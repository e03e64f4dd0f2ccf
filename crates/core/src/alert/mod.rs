//! Fraud and integrity alerting.
//!
//! - `detectors` - pure rules over entries and balance rows
//! - `engine` - runs detectors and persists alerts
//! - `dispatcher` - bounded queue between the ledger and the engine

pub mod detectors;
pub mod dispatcher;
pub mod engine;
pub mod types;


pub use detectors::{RefundAnomaly, UnfreezeFailure};
pub use dispatcher::{AlertDispatcher, AlertJob, AlertWorker};
pub use engine::{AlertError, FraudAlertEngine, ReconcileReport};
pub use types::{Alert, AlertKind, AlertSeverity, AlertStatus};
