//! Read side of the audit log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use tally_core::balance::{LedgerEntry, OperationKind};
use tally_core::store::{AuditLog, StoreError};
use tally_shared::types::{PageRequest, PageResponse, UserId};

use super::PgLedgerStore;
use super::convert::{db_error, entry_from_model};
use crate::entities::balance_logs;

#[async_trait]
impl AuditLog for PgLedgerStore {
    async fn query_recent(
        &self,
        user_id: UserId,
        kind: OperationKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        balance_logs::Entity::find()
            .filter(balance_logs::Column::UserId.eq(user_id.into_inner()))
            .filter(balance_logs::Column::Kind.eq(kind.as_str()))
            .filter(balance_logs::Column::CreatedAt.gte(since))
            .order_by_asc(balance_logs::Column::CreatedAt)
            .order_by_asc(balance_logs::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(entry_from_model)
            .collect()
    }

    async fn history(
        &self,
        user_id: UserId,
        page: PageRequest,
        kind: Option<OperationKind>,
    ) -> Result<PageResponse<LedgerEntry>, StoreError> {
        let mut query =
            balance_logs::Entity::find().filter(balance_logs::Column::UserId.eq(user_id.into_inner()));
        if let Some(kind) = kind {
            query = query.filter(balance_logs::Column::Kind.eq(kind.as_str()));
        }

        let total = query.clone().count(&self.db).await.map_err(db_error)?;
        let entries = query
            .order_by_desc(balance_logs::Column::CreatedAt)
            .order_by_desc(balance_logs::Column::Id)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(entry_from_model)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PageResponse::new(entries, page.page, page.per_page, total))
    }

    async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        balance_logs::Entity::find()
            .filter(balance_logs::Column::CorrelationId.eq(correlation_id))
            .order_by_asc(balance_logs::Column::CreatedAt)
            .order_by_asc(balance_logs::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(entry_from_model)
            .collect()
    }
}
