//! Balance rows under Postgres row locks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use tally_core::balance::{Balance, BalanceDelta, BalanceGuard, LedgerEntry, OperationKind};
use tally_core::store::{LedgerStore, LedgerTransaction, StoreError};
use tally_shared::types::{PageRequest, UserId};
use tracing::debug;

use super::convert::{balance_from_model, db_error, entry_to_active, row_error};
use crate::entities::{balance_logs, user_balances};

/// Default bound on row lock waits.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Ledger storage backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pub(super) db: DatabaseConnection,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long a transaction waits for a row lock before failing.
    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Returns the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// An open Postgres transaction.
///
/// Dropping it without committing rolls back.
pub struct PgLedgerTransaction {
    txn: DatabaseTransaction,
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError> {
        let txn = self.db.begin().await.map_err(db_error)?;
        // Scoped to this transaction; the pooled connection keeps its default.
        txn.execute_unprepared(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .await
        .map_err(db_error)?;
        Ok(Box::new(PgLedgerTransaction { txn }))
    }

    async fn find_balance(&self, user_id: UserId) -> Result<Option<Balance>, StoreError> {
        Ok(user_balances::Entity::find_by_id(user_id.into_inner())
            .one(&self.db)
            .await
            .map_err(db_error)?
            .map(balance_from_model))
    }

    async fn list_balances(&self, page: PageRequest) -> Result<Vec<Balance>, StoreError> {
        Ok(user_balances::Entity::find()
            .order_by_asc(user_balances::Column::UserId)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(balance_from_model)
            .collect())
    }
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn locked_read(&mut self, user_id: UserId) -> Result<Balance, StoreError> {
        let id = user_id.into_inner();
        let now = Utc::now().into();

        let created = user_balances::Entity::insert(user_balances::ActiveModel {
            user_id: Set(id),
            available: Set(Decimal::ZERO),
            frozen: Set(Decimal::ZERO),
            total_in: Set(Decimal::ZERO),
            total_out: Set(Decimal::ZERO),
            total_gifted: Set(Decimal::ZERO),
            version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        })
        .on_conflict(
            OnConflict::column(user_balances::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&self.txn)
        .await
        .map_err(row_error(user_id))?;
        if created > 0 {
            debug!(%user_id, "Created balance row");
        }

        user_balances::Entity::find_by_id(id)
            .lock_exclusive()
            .one(&self.txn)
            .await
            .map_err(row_error(user_id))?
            .map(balance_from_model)
            .ok_or_else(|| StoreError::Internal(format!("balance row for {user_id} vanished")))
    }

    async fn conditional_update(
        &mut self,
        user_id: UserId,
        guard: &BalanceGuard,
        delta: &BalanceDelta,
    ) -> Result<u64, StoreError> {
        use user_balances::Column;

        let mut update = user_balances::Entity::update_many()
            .col_expr(Column::Available, Expr::col(Column::Available).add(delta.available))
            .col_expr(Column::Frozen, Expr::col(Column::Frozen).add(delta.frozen))
            .col_expr(Column::TotalIn, Expr::col(Column::TotalIn).add(delta.total_in))
            .col_expr(Column::TotalOut, Expr::col(Column::TotalOut).add(delta.total_out))
            .col_expr(
                Column::TotalGifted,
                Expr::col(Column::TotalGifted).add(delta.total_gifted),
            )
            .col_expr(Column::Version, Expr::col(Column::Version).add(1))
            .col_expr(Column::UpdatedAt, Expr::current_timestamp().into())
            .filter(Column::UserId.eq(user_id.into_inner()));

        if let Some(min) = guard.min_available {
            update = update.filter(Column::Available.gte(min));
        }
        if let Some(max) = guard.max_available {
            update = update.filter(Column::Available.lte(max));
        }
        if let Some(min) = guard.min_frozen {
            update = update.filter(Column::Frozen.gte(min));
        }

        let result = update
            .exec(&self.txn)
            .await
            .map_err(row_error(user_id))?;
        Ok(result.rows_affected)
    }

    async fn recharged_since(
        &mut self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError> {
        let total: Option<Option<Decimal>> = balance_logs::Entity::find()
            .select_only()
            .column_as(Expr::col(balance_logs::Column::Amount).sum(), "total")
            .filter(balance_logs::Column::UserId.eq(user_id.into_inner()))
            .filter(balance_logs::Column::Kind.eq(OperationKind::Recharge.as_str()))
            .filter(balance_logs::Column::CreatedAt.gte(since))
            .into_tuple()
            .one(&self.txn)
            .await
            .map_err(row_error(user_id))?;
        Ok(total.flatten().unwrap_or(Decimal::ZERO))
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        balance_logs::Entity::insert(entry_to_active(entry))
            .exec_without_returning(&self.txn)
            .await
            .map_err(row_error(entry.user_id))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.rollback().await.map_err(db_error)
    }
}
