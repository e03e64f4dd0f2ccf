//! Storage ports for the ledger.
//!
//! The ledger is a client of a transactional row store. Implementations:
//! - `memory::MemoryStore` - in-process, per-user async row locks
//! - `tally_db::PgLedgerStore` - Postgres via SeaORM
//!
//! A [`LedgerTransaction`] owns the row locks it has taken; dropping it
//! without committing rolls back every staged write.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tally_shared::types::{AlertId, PageRequest, PageResponse, UserId};
use thiserror::Error;

use crate::alert::{Alert, AlertKind, AlertStatus};
use crate::balance::{Balance, BalanceDelta, BalanceGuard, LedgerEntry, OperationKind};

pub use memory::MemoryStore;

/// Errors raised by storage implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row lock wait exceeded the configured bound.
    #[error("Timed out waiting for the balance lock of user {0}")]
    LockTimeout(UserId),

    /// Serialization failure or deadlock; the transaction was aborted.
    #[error("Transaction conflict on the balance of user {0}")]
    Conflict(UserId),

    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Store is in an unexpected state.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// One open transaction against the ledger store.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Reads the user's row under an exclusive lock held until commit or rollback.
    ///
    /// Creates a zero-valued row first if the user has none. Blocks while
    /// another transaction holds the lock, up to the store's lock timeout.
    async fn locked_read(&mut self, user_id: UserId) -> Result<Balance, StoreError>;

    /// Applies `delta` only if `guard` holds against the current row.
    ///
    /// Returns the number of rows affected; zero means the guard failed.
    async fn conditional_update(
        &mut self,
        user_id: UserId,
        guard: &BalanceGuard,
        delta: &BalanceDelta,
    ) -> Result<u64, StoreError>;

    /// Sums recharge amounts for the user since `since`, including this transaction's entries.
    async fn recharged_since(
        &mut self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError>;

    /// Appends an audit entry as part of this transaction.
    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Commits every staged write and releases the locks.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards every staged write and releases the locks.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Balance rows and transaction entry point.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Opens a transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError>;

    /// Reads a committed row without locking.
    async fn find_balance(&self, user_id: UserId) -> Result<Option<Balance>, StoreError>;

    /// Lists committed rows ordered by user id.
    async fn list_balances(&self, page: PageRequest) -> Result<Vec<Balance>, StoreError>;
}

/// Read side of the append-only audit log.
///
/// Only committed entries are visible.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Entries of `kind` for the user created at or after `since`, oldest first.
    async fn query_recent(
        &self,
        user_id: UserId,
        kind: OperationKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Paginated history for the user, newest first.
    async fn history(
        &self,
        user_id: UserId,
        page: PageRequest,
        kind: Option<OperationKind>,
    ) -> Result<PageResponse<LedgerEntry>, StoreError>;

    /// Entries carrying the given correlation id, oldest first.
    async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Persistence for raised alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persists a new alert.
    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Returns true if a pending alert of `kind` exists for the user since `since`.
    async fn has_pending_since(
        &self,
        user_id: UserId,
        kind: AlertKind,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Lists alerts, newest first.
    async fn list_alerts(
        &self,
        user_id: Option<UserId>,
        status: Option<AlertStatus>,
        page: PageRequest,
    ) -> Result<PageResponse<Alert>, StoreError>;

    /// Marks a pending alert acknowledged. Returns false if it was not pending.
    async fn acknowledge(&self, alert_id: AlertId) -> Result<bool, StoreError>;
}
