//! Row mapping and error translation.

use chrono::Utc;
use sea_orm::{DbErr, RuntimeErr};
use tally_core::alert::{Alert, AlertKind, AlertSeverity, AlertStatus};
use tally_core::balance::{Balance, LedgerEntry, OperationKind, OperatorKind};
use tally_core::store::StoreError;
use tally_shared::types::UserId;

use crate::entities::{balance_alerts, balance_logs, user_balances};

/// Lock wait exceeded `lock_timeout`.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// Serializable isolation conflict.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Returns the Postgres SQLSTATE carried by a database error, if any.
fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
        | DbErr::Query(RuntimeErr::SqlxError(sqlx::Error::Database(e)))
        | DbErr::Conn(RuntimeErr::SqlxError(sqlx::Error::Database(e))) => {
            e.code().map(|code| code.into_owned())
        }
        _ => None,
    }
}

/// Translates an error raised while working on one user's row.
pub(crate) fn row_error(user_id: UserId) -> impl FnOnce(DbErr) -> StoreError {
    move |err| match sqlstate(&err).as_deref() {
        Some(LOCK_NOT_AVAILABLE) => StoreError::LockTimeout(user_id),
        Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => StoreError::Conflict(user_id),
        _ => StoreError::Database(err.to_string()),
    }
}

pub(crate) fn db_error(err: DbErr) -> StoreError {
    StoreError::Database(err.to_string())
}

fn corrupt(table: &str, detail: String) -> StoreError {
    StoreError::Internal(format!("Unreadable {table} row: {detail}"))
}

pub(crate) fn balance_from_model(model: user_balances::Model) -> Balance {
    Balance {
        user_id: UserId::from(model.user_id),
        available: model.available,
        frozen: model.frozen,
        total_in: model.total_in,
        total_out: model.total_out,
        total_gifted: model.total_gifted,
        version: model.version,
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub(crate) fn entry_to_active(entry: &LedgerEntry) -> balance_logs::ActiveModel {
    use sea_orm::ActiveValue::Set;

    balance_logs::ActiveModel {
        id: Set(entry.id.into_inner()),
        user_id: Set(entry.user_id.into_inner()),
        kind: Set(entry.kind.as_str().to_string()),
        amount: Set(entry.amount),
        balance_before: Set(entry.balance_before),
        balance_after: Set(entry.balance_after),
        frozen_before: Set(entry.frozen_before),
        frozen_after: Set(entry.frozen_after),
        correlation_id: Set(entry.correlation_id.clone()),
        operator_id: Set(entry.operator_id),
        operator_kind: Set(entry.operator_kind.as_str().to_string()),
        client_address: Set(entry.client_address.clone()),
        remark: Set(entry.remark.clone()),
        created_at: Set(entry.created_at.into()),
    }
}

pub(crate) fn entry_from_model(model: balance_logs::Model) -> Result<LedgerEntry, StoreError> {
    let kind: OperationKind = model
        .kind
        .parse()
        .map_err(|e| corrupt("balance_logs", e))?;
    let operator_kind: OperatorKind = model
        .operator_kind
        .parse()
        .map_err(|e| corrupt("balance_logs", e))?;

    Ok(LedgerEntry {
        id: model.id.into(),
        user_id: model.user_id.into(),
        kind,
        amount: model.amount,
        balance_before: model.balance_before,
        balance_after: model.balance_after,
        frozen_before: model.frozen_before,
        frozen_after: model.frozen_after,
        correlation_id: model.correlation_id,
        operator_id: model.operator_id,
        operator_kind,
        client_address: model.client_address,
        remark: model.remark,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

pub(crate) fn alert_to_active(alert: &Alert) -> balance_alerts::ActiveModel {
    use sea_orm::ActiveValue::Set;

    let metadata = if alert.metadata.is_null() {
        serde_json::json!({})
    } else {
        alert.metadata.clone()
    };

    balance_alerts::ActiveModel {
        id: Set(alert.id.into_inner()),
        user_id: Set(alert.user_id.into_inner()),
        kind: Set(alert.kind.as_str().to_string()),
        severity: Set(alert.severity.as_str().to_string()),
        title: Set(alert.title.clone()),
        body: Set(alert.body.clone()),
        related_amount: Set(alert.related_amount),
        related_correlation_id: Set(alert.related_correlation_id.clone()),
        client_address: Set(alert.client_address.clone()),
        status: Set(alert.status.as_str().to_string()),
        metadata: Set(metadata),
        acknowledged_at: Set(None),
        created_at: Set(alert.created_at.into()),
    }
}

pub(crate) fn alert_from_model(model: balance_alerts::Model) -> Result<Alert, StoreError> {
    let kind: AlertKind = model
        .kind
        .parse()
        .map_err(|e| corrupt("balance_alerts", e))?;
    let severity: AlertSeverity = model
        .severity
        .parse()
        .map_err(|e| corrupt("balance_alerts", e))?;
    let status: AlertStatus = model
        .status
        .parse()
        .map_err(|e| corrupt("balance_alerts", e))?;

    Ok(Alert {
        id: model.id.into(),
        user_id: model.user_id.into(),
        kind,
        severity,
        title: model.title,
        body: model.body,
        related_amount: model.related_amount,
        related_correlation_id: model.related_correlation_id,
        client_address: model.client_address,
        status,
        metadata: model.metadata,
        created_at: model.created_at.with_timezone(&Utc),
    })
}
