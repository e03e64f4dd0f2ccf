//! Balance and audit log migration.
//!
//! Creates the per-user balance table, the append-only audit log, and the
//! trigger that keeps the log immutable.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(USER_BALANCES_SQL).await?;
        db.execute_unprepared(BALANCE_LOGS_SQL).await?;
        db.execute_unprepared(APPEND_ONLY_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            r"
DROP TABLE IF EXISTS balance_logs CASCADE;
DROP FUNCTION IF EXISTS prevent_balance_log_mutation();
DROP TABLE IF EXISTS user_balances CASCADE;
",
        )
        .await?;
        Ok(())
    }
}

const USER_BALANCES_SQL: &str = r"
-- One row per user, created on first mutation
CREATE TABLE user_balances (
    user_id UUID PRIMARY KEY,
    available NUMERIC(20, 2) NOT NULL DEFAULT 0,
    frozen NUMERIC(20, 2) NOT NULL DEFAULT 0,
    total_in NUMERIC(20, 2) NOT NULL DEFAULT 0,
    total_out NUMERIC(20, 2) NOT NULL DEFAULT 0,
    total_gifted NUMERIC(20, 2) NOT NULL DEFAULT 0,
    version BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_available_non_negative CHECK (available >= 0),
    CONSTRAINT chk_frozen_non_negative CHECK (frozen >= 0),
    CONSTRAINT chk_gifted_non_negative CHECK (total_gifted >= 0)
);
";

const BALANCE_LOGS_SQL: &str = r"
-- One row per committed balance mutation
CREATE TABLE balance_logs (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    kind VARCHAR(20) NOT NULL,
    amount NUMERIC(20, 2) NOT NULL,
    balance_before NUMERIC(20, 2) NOT NULL,
    balance_after NUMERIC(20, 2) NOT NULL,
    frozen_before NUMERIC(20, 2) NOT NULL,
    frozen_after NUMERIC(20, 2) NOT NULL,
    correlation_id VARCHAR(128),
    operator_id UUID,
    operator_kind VARCHAR(10) NOT NULL,
    client_address VARCHAR(45),
    remark TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_log_kind CHECK (kind IN (
        'recharge', 'consume', 'refund', 'freeze',
        'unfreeze', 'deduct_frozen', 'adjust', 'gift'
    )),
    CONSTRAINT chk_log_operator_kind CHECK (operator_kind IN ('user', 'admin', 'system')),
    CONSTRAINT chk_log_amount_nonzero CHECK (amount <> 0)
);

-- History and frequency queries
CREATE INDEX idx_balance_logs_user_time ON balance_logs(user_id, created_at DESC);
CREATE INDEX idx_balance_logs_user_kind_time ON balance_logs(user_id, kind, created_at DESC);

-- External dedup by order or recharge number
CREATE INDEX idx_balance_logs_correlation ON balance_logs(correlation_id) WHERE correlation_id IS NOT NULL;
";

const APPEND_ONLY_SQL: &str = r"
CREATE OR REPLACE FUNCTION prevent_balance_log_mutation()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'balance_logs is append-only';
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_balance_logs_append_only
BEFORE UPDATE OR DELETE ON balance_logs
FOR EACH ROW
EXECUTE FUNCTION prevent_balance_log_mutation();
";
