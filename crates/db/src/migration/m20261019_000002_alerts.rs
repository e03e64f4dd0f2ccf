//! Fraud alert migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(BALANCE_ALERTS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared("DROP TABLE IF EXISTS balance_alerts CASCADE;")
            .await?;
        Ok(())
    }
}

const BALANCE_ALERTS_SQL: &str = r"
CREATE TABLE balance_alerts (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    kind VARCHAR(32) NOT NULL,
    severity VARCHAR(10) NOT NULL,
    title VARCHAR(255) NOT NULL,
    body TEXT NOT NULL,
    related_amount NUMERIC(20, 2),
    related_correlation_id VARCHAR(128),
    client_address VARCHAR(45),
    status VARCHAR(16) NOT NULL DEFAULT 'pending',
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    acknowledged_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_alert_severity CHECK (severity IN ('warning', 'critical')),
    CONSTRAINT chk_alert_status CHECK (status IN ('pending', 'acknowledged')),
    CONSTRAINT chk_alert_acknowledged CHECK ((status = 'acknowledged') = (acknowledged_at IS NOT NULL))
);

-- Frequency dedup: pending alerts of a kind for a user within a window
CREATE INDEX idx_balance_alerts_dedup ON balance_alerts(user_id, kind, created_at DESC) WHERE status = 'pending';

-- Triage queue
CREATE INDEX idx_balance_alerts_status ON balance_alerts(status, created_at DESC);
";
