//! `SeaORM` Entity for the user_balances table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "user_balances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub available: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub frozen: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub total_in: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub total_out: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 2)))")]
    pub total_gifted: Decimal,
    pub version: i64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
