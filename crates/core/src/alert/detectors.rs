//! Fraud and integrity detectors.
//!
//! Each detector is a pure function of the committed entry or balance,
//! recent activity figures, and the limits snapshot. Callers persist
//! whatever they return.

use chrono::TimeDelta;
use rust_decimal::Decimal;
use serde_json::json;
use tally_shared::types::UserId;

use super::types::{Alert, AlertKind, AlertSeverity};
use crate::balance::{Balance, LedgerEntry, OperationKind};
use crate::limits::LimitsConfig;

/// Multiple of the admin adjust threshold at which the alert turns critical.
pub const CRITICAL_ADJUST_MULTIPLIER: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Trailing window for frequency detection.
#[must_use]
pub fn frequency_window() -> TimeDelta {
    TimeDelta::hours(1)
}

/// Fires when a single recharge reaches the large-recharge threshold.
#[must_use]
pub fn large_recharge(entry: &LedgerEntry, limits: &LimitsConfig) -> Option<Alert> {
    if entry.kind != OperationKind::Recharge || entry.amount < limits.large_recharge_threshold {
        return None;
    }
    Some(
        Alert::new(
            entry.user_id,
            AlertKind::LargeRecharge,
            AlertSeverity::Warning,
            "Large recharge",
            format!(
                "User {} recharged {}, at or above the threshold of {}",
                entry.user_id, entry.amount, limits.large_recharge_threshold
            ),
        )
        .with_amount(entry.amount)
        .with_correlation(entry.correlation_id.clone())
        .with_client_address(entry.client_address.clone())
        .with_metadata(json!({ "threshold": limits.large_recharge_threshold })),
    )
}

/// Fires when a single consume reaches the large-consume threshold.
#[must_use]
pub fn large_consume(entry: &LedgerEntry, limits: &LimitsConfig) -> Option<Alert> {
    let spent = entry.amount.abs();
    if entry.kind != OperationKind::Consume || spent < limits.large_consume_threshold {
        return None;
    }
    Some(
        Alert::new(
            entry.user_id,
            AlertKind::LargeConsume,
            AlertSeverity::Warning,
            "Large consumption",
            format!(
                "User {} spent {}, at or above the threshold of {}",
                entry.user_id, spent, limits.large_consume_threshold
            ),
        )
        .with_amount(spent)
        .with_correlation(entry.correlation_id.clone())
        .with_client_address(entry.client_address.clone())
        .with_metadata(json!({ "threshold": limits.large_consume_threshold })),
    )
}

/// Alert kind and configured count for a frequency-tracked operation.
#[must_use]
pub fn frequency_rule(kind: OperationKind, limits: &LimitsConfig) -> Option<(AlertKind, u32)> {
    match kind {
        OperationKind::Recharge => Some((AlertKind::FrequentRecharge, limits.frequent_recharge_count)),
        OperationKind::Consume => Some((AlertKind::FrequentConsume, limits.frequent_consume_count)),
        _ => None,
    }
}

/// Fires when the trailing-hour count reaches the configured count.
///
/// `recent_count` includes the triggering entry. `already_pending` is true
/// if a pending alert of the same kind exists for the user in the window;
/// one noisy hour yields a single alert.
#[must_use]
pub fn frequent_activity(
    entry: &LedgerEntry,
    recent_count: usize,
    already_pending: bool,
    limits: &LimitsConfig,
) -> Option<Alert> {
    let (kind, threshold) = frequency_rule(entry.kind, limits)?;
    if already_pending || threshold == 0 || recent_count < threshold as usize {
        return None;
    }
    let noun = if kind == AlertKind::FrequentRecharge {
        "recharges"
    } else {
        "consumptions"
    };
    Some(
        Alert::new(
            entry.user_id,
            kind,
            AlertSeverity::Warning,
            format!("Frequent {noun}"),
            format!(
                "User {} made {recent_count} {noun} in the last hour (threshold {threshold})",
                entry.user_id
            ),
        )
        .with_amount(entry.amount.abs())
        .with_correlation(entry.correlation_id.clone())
        .with_client_address(entry.client_address.clone())
        .with_metadata(json!({ "count": recent_count, "threshold": threshold, "window_secs": frequency_window().num_seconds() })),
    )
}

/// Fires when either pocket is below zero.
#[must_use]
pub fn negative_balance(balance: &Balance) -> Option<Alert> {
    if balance.is_non_negative() {
        return None;
    }
    Some(
        Alert::new(
            balance.user_id,
            AlertKind::NegativeBalance,
            AlertSeverity::Critical,
            "Negative balance",
            format!(
                "User {} has available {} and frozen {}; a write bypassed the ledger guards",
                balance.user_id, balance.available, balance.frozen
            ),
        )
        .with_amount(balance.available.min(balance.frozen))
        .with_metadata(json!({
            "available": balance.available,
            "frozen": balance.frozen,
            "version": balance.version,
        })),
    )
}

/// Fires when held funds differ from lifetime totals by more than `tolerance`.
#[must_use]
pub fn balance_mismatch(balance: &Balance, tolerance: Decimal) -> Option<Alert> {
    if balance.is_conserved(tolerance) {
        return None;
    }
    let gap = balance.conservation_gap();
    Some(
        Alert::new(
            balance.user_id,
            AlertKind::BalanceMismatch,
            AlertSeverity::Critical,
            "Balance mismatch",
            format!(
                "User {} holds {} but lifetime totals account for {} (gap {gap})",
                balance.user_id,
                balance.holdings(),
                balance.net_funding()
            ),
        )
        .with_amount(gap)
        .with_metadata(json!({
            "available": balance.available,
            "frozen": balance.frozen,
            "total_in": balance.total_in,
            "total_out": balance.total_out,
            "total_gifted": balance.total_gifted,
            "gap": gap,
            "tolerance": tolerance,
        })),
    )
}

/// Fires on adjustments and gifts at or above the admin threshold.
///
/// Escalates to critical at [`CRITICAL_ADJUST_MULTIPLIER`] times the threshold.
#[must_use]
pub fn large_admin_adjust(entry: &LedgerEntry, limits: &LimitsConfig) -> Option<Alert> {
    if !matches!(entry.kind, OperationKind::Adjust | OperationKind::Gift) {
        return None;
    }
    let threshold = limits.large_admin_adjust_threshold;
    let magnitude = entry.amount.abs();
    if magnitude < threshold {
        return None;
    }
    let severity = if magnitude >= threshold * CRITICAL_ADJUST_MULTIPLIER {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    };
    let operator = entry
        .operator_id
        .map_or_else(|| "unknown operator".to_string(), |id| format!("operator {id}"));
    Some(
        Alert::new(
            entry.user_id,
            AlertKind::LargeAdminAdjust,
            severity,
            format!("Large admin {}", entry.kind),
            format!(
                "{operator} applied {} of {} to user {} (threshold {threshold})",
                entry.kind, entry.amount, entry.user_id
            ),
        )
        .with_amount(entry.amount)
        .with_correlation(entry.correlation_id.clone())
        .with_client_address(entry.client_address.clone())
        .with_metadata(json!({ "threshold": threshold, "operator_id": entry.operator_id })),
    )
}

/// A compensating unfreeze or deduct-frozen that the caller expected to succeed.
#[derive(Debug, Clone)]
pub struct UnfreezeFailure {
    /// Affected user.
    pub user_id: UserId,
    /// Operation that failed.
    pub operation: OperationKind,
    /// Amount the caller tried to release or deduct.
    pub amount: Decimal,
    /// Order number the frozen funds belong to.
    pub correlation_id: Option<String>,
    /// Why it failed, usually the ledger error text.
    pub reason: String,
    /// Client address of the request, if known.
    pub client_address: Option<String>,
}

/// Always fires; frozen bookkeeping elsewhere has drifted from the ledger.
#[must_use]
pub fn unfreeze_failure(failure: &UnfreezeFailure) -> Alert {
    Alert::new(
        failure.user_id,
        AlertKind::UnfreezeFailure,
        AlertSeverity::Critical,
        format!("Expected {} failed", failure.operation),
        format!(
            "{} of {} for user {} failed: {}",
            failure.operation, failure.amount, failure.user_id, failure.reason
        ),
    )
    .with_amount(failure.amount)
    .with_correlation(failure.correlation_id.clone())
    .with_client_address(failure.client_address.clone())
    .with_metadata(json!({ "operation": failure.operation, "reason": failure.reason }))
}

/// A refund issued outside the order cancellation path.
#[derive(Debug, Clone)]
pub struct RefundAnomaly {
    /// Refunded user.
    pub user_id: UserId,
    /// Amount refunded.
    pub refund_amount: Decimal,
    /// Amount of the original order, if known.
    pub original_amount: Option<Decimal>,
    /// Order number.
    pub correlation_id: Option<String>,
    /// Why the refund was issued.
    pub reason: String,
    /// Client address of the request, if known.
    pub client_address: Option<String>,
}

/// Always fires; notes when the refund exceeds the original order.
#[must_use]
pub fn refund_anomaly(report: &RefundAnomaly) -> Alert {
    let exceeds = report
        .original_amount
        .is_some_and(|original| report.refund_amount > original);
    let detail = match report.original_amount {
        Some(original) if exceeds => {
            format!(" exceeding the original order amount of {original}")
        }
        Some(original) => format!(" against an original order amount of {original}"),
        None => String::new(),
    };
    Alert::new(
        report.user_id,
        AlertKind::RefundAnomaly,
        AlertSeverity::Warning,
        "Refund outside order cancellation",
        format!(
            "User {} was refunded {}{detail}: {}",
            report.user_id, report.refund_amount, report.reason
        ),
    )
    .with_amount(report.refund_amount)
    .with_correlation(report.correlation_id.clone())
    .with_client_address(report.client_address.clone())
    .with_metadata(json!({
        "original_amount": report.original_amount,
        "exceeds_original": exceeds,
        "reason": report.reason,
    }))
}
