//! `SeaORM` entities for the ledger tables.

pub mod balance_alerts;
pub mod balance_logs;
pub mod user_balances;
