//! `SeaORM` Entity for the balance_logs table (append-only).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "balance_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub amount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub balance_before: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub balance_after: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub frozen_before: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub frozen_after: Decimal,
    pub correlation_id: Option<String>,
    pub operator_id: Option<Uuid>,
    pub operator_kind: String,
    pub client_address: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
