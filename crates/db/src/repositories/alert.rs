//! Alert persistence and triage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use tally_core::alert::{Alert, AlertKind, AlertStatus};
use tally_core::store::{AlertStore, StoreError};
use tally_shared::types::{AlertId, PageRequest, PageResponse, UserId};

use super::PgLedgerStore;
use super::convert::{alert_from_model, alert_to_active, db_error};
use crate::entities::balance_alerts;

#[async_trait]
impl AlertStore for PgLedgerStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        balance_alerts::Entity::insert(alert_to_active(alert))
            .exec_without_returning(&self.db)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn has_pending_since(
        &self,
        user_id: UserId,
        kind: AlertKind,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let found = balance_alerts::Entity::find()
            .filter(balance_alerts::Column::UserId.eq(user_id.into_inner()))
            .filter(balance_alerts::Column::Kind.eq(kind.as_str()))
            .filter(balance_alerts::Column::Status.eq(AlertStatus::Pending.as_str()))
            .filter(balance_alerts::Column::CreatedAt.gte(since))
            .count(&self.db)
            .await
            .map_err(db_error)?;
        Ok(found > 0)
    }

    async fn list_alerts(
        &self,
        user_id: Option<UserId>,
        status: Option<AlertStatus>,
        page: PageRequest,
    ) -> Result<PageResponse<Alert>, StoreError> {
        let mut query = balance_alerts::Entity::find();
        if let Some(user_id) = user_id {
            query = query.filter(balance_alerts::Column::UserId.eq(user_id.into_inner()));
        }
        if let Some(status) = status {
            query = query.filter(balance_alerts::Column::Status.eq(status.as_str()));
        }

        let total = query.clone().count(&self.db).await.map_err(db_error)?;
        let alerts = query
            .order_by_desc(balance_alerts::Column::CreatedAt)
            .order_by_desc(balance_alerts::Column::Id)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .map_err(db_error)?
            .into_iter()
            .map(alert_from_model)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PageResponse::new(alerts, page.page, page.per_page, total))
    }

    async fn acknowledge(&self, alert_id: AlertId) -> Result<bool, StoreError> {
        let result = balance_alerts::Entity::update_many()
            .col_expr(
                balance_alerts::Column::Status,
                Expr::value(AlertStatus::Acknowledged.as_str()),
            )
            .col_expr(
                balance_alerts::Column::AcknowledgedAt,
                Expr::current_timestamp().into(),
            )
            .filter(balance_alerts::Column::Id.eq(alert_id.into_inner()))
            .filter(balance_alerts::Column::Status.eq(AlertStatus::Pending.as_str()))
            .exec(&self.db)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected == 1)
    }
}
