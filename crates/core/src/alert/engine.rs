//! Fraud alert engine.
//!
//! Runs detectors against committed entries and balance rows and persists
//! whatever they raise. Nothing here can fail a ledger operation; the
//! engine runs after commit, on the dispatcher's worker.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tally_shared::types::{PageRequest, RECONCILE_TOLERANCE, UserId};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::detectors::{self, RefundAnomaly, UnfreezeFailure};
use super::types::Alert;
use crate::balance::{
    Balance, LedgerEntry, MAX_CLIENT_ADDRESS_LEN, MAX_CORRELATION_ID_LEN, fits_column,
};
use crate::limits::LimitsProvider;
use crate::store::{AlertStore, AuditLog, LedgerStore, StoreError};

/// Errors raised while evaluating or persisting alerts.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Reading activity or persisting the alert failed.
    #[error("Alert store error: {0}")]
    Store(#[from] StoreError),

    /// A reported string is longer than its stored column allows.
    #[error("{field} exceeds {max} characters")]
    FieldTooLong {
        /// Report field name.
        field: &'static str,
        /// Maximum accepted length in characters.
        max: usize,
    },
}

/// Outcome of a full reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows examined.
    pub scanned: u64,
    /// Rows whose holdings do not match their lifetime totals.
    pub mismatched: u64,
    /// Rows with a negative pocket.
    pub negative: u64,
    /// Alerts persisted during the pass.
    pub alerts_raised: u64,
}

impl ReconcileReport {
    /// Returns true if every scanned row was healthy.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatched == 0 && self.negative == 0
    }
}

/// Evaluates detectors and records alerts.
pub struct FraudAlertEngine {
    balances: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditLog>,
    alerts: Arc<dyn AlertStore>,
    limits: Arc<LimitsProvider>,
    tolerance: Decimal,
}

impl FraudAlertEngine {
    /// Creates an engine over the given stores.
    #[must_use]
    pub fn new(
        balances: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditLog>,
        alerts: Arc<dyn AlertStore>,
        limits: Arc<LimitsProvider>,
    ) -> Self {
        Self {
            balances,
            audit,
            alerts,
            limits,
            tolerance: RECONCILE_TOLERANCE,
        }
    }

    /// Runs every entry detector against a committed entry and its post-image.
    ///
    /// Returns the alerts that were persisted.
    #[instrument(skip_all, fields(user_id = %entry.user_id, kind = %entry.kind))]
    pub async fn on_entry_committed(
        &self,
        entry: &LedgerEntry,
        balance: &Balance,
    ) -> Result<Vec<Alert>, AlertError> {
        let limits = self.limits.current();
        let mut raised = Vec::new();

        raised.extend(detectors::large_recharge(entry, &limits));
        raised.extend(detectors::large_consume(entry, &limits));
        raised.extend(detectors::large_admin_adjust(entry, &limits));

        if let Some((kind, _)) = detectors::frequency_rule(entry.kind, &limits) {
            let since = Utc::now() - detectors::frequency_window();
            let recent = self.audit.query_recent(entry.user_id, entry.kind, since).await?;
            let already_pending = self.alerts.has_pending_since(entry.user_id, kind, since).await?;
            raised.extend(detectors::frequent_activity(
                entry,
                recent.len(),
                already_pending,
                &limits,
            ));
        }

        raised.extend(detectors::negative_balance(balance));
        raised.extend(detectors::balance_mismatch(balance, self.tolerance));

        self.persist(&raised).await?;
        Ok(raised)
    }

    /// Records a rolled-back write whose post-image broke an invariant.
    ///
    /// Always persists at least one critical alert.
    #[instrument(skip_all, fields(user_id = %balance.user_id))]
    pub async fn on_invariant_breach(&self, balance: &Balance) -> Result<Vec<Alert>, AlertError> {
        let mut raised: Vec<Alert> = detectors::negative_balance(balance)
            .into_iter()
            .chain(detectors::balance_mismatch(balance, self.tolerance))
            .collect();
        if raised.is_empty() {
            // Tolerance masked the gap; record it regardless.
            raised.extend(detectors::balance_mismatch(balance, Decimal::ZERO));
        }
        self.persist(&raised).await?;
        Ok(raised)
    }

    /// Checks one user's committed row.
    ///
    /// Returns the alerts raised; empty if the row is healthy or missing.
    pub async fn check_balance(&self, user_id: UserId) -> Result<Vec<Alert>, AlertError> {
        let Some(balance) = self.balances.find_balance(user_id).await? else {
            return Ok(Vec::new());
        };
        let raised = self.inspect(&balance);
        self.persist(&raised).await?;
        Ok(raised)
    }

    /// Scans every committed row and raises integrity alerts.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self, page_size: u32) -> Result<ReconcileReport, AlertError> {
        let mut report = ReconcileReport::default();
        let mut page = PageRequest::new(1, page_size);

        loop {
            let rows = self.balances.list_balances(page).await?;
            for balance in &rows {
                report.scanned += 1;
                if !balance.is_non_negative() {
                    report.negative += 1;
                }
                if !balance.is_conserved(self.tolerance) {
                    report.mismatched += 1;
                }
                let raised = self.inspect(balance);
                self.persist(&raised).await?;
                report.alerts_raised += raised.len() as u64;
            }
            if (rows.len() as u64) < page.limit() {
                break;
            }
            page = PageRequest::new(page.page + 1, page.per_page);
        }

        if report.is_clean() {
            info!(scanned = report.scanned, "Reconciliation clean");
        } else {
            warn!(
                scanned = report.scanned,
                mismatched = report.mismatched,
                negative = report.negative,
                "Reconciliation found unhealthy balances"
            );
        }
        Ok(report)
    }

    /// Records that an expected unfreeze or deduct-frozen failed.
    pub async fn report_unfreeze_failure(
        &self,
        failure: &UnfreezeFailure,
    ) -> Result<Alert, AlertError> {
        check_report_fields(
            failure.correlation_id.as_deref(),
            failure.client_address.as_deref(),
        )?;
        let alert = detectors::unfreeze_failure(failure);
        self.persist(std::slice::from_ref(&alert)).await?;
        Ok(alert)
    }

    /// Records a refund issued outside the order cancellation path.
    pub async fn report_refund_anomaly(&self, report: &RefundAnomaly) -> Result<Alert, AlertError> {
        check_report_fields(
            report.correlation_id.as_deref(),
            report.client_address.as_deref(),
        )?;
        let alert = detectors::refund_anomaly(report);
        self.persist(std::slice::from_ref(&alert)).await?;
        Ok(alert)
    }

    fn inspect(&self, balance: &Balance) -> Vec<Alert> {
        detectors::negative_balance(balance)
            .into_iter()
            .chain(detectors::balance_mismatch(balance, self.tolerance))
            .collect()
    }

    async fn persist(&self, alerts: &[Alert]) -> Result<(), AlertError> {
        for alert in alerts {
            self.alerts.insert_alert(alert).await?;
            warn!(
                alert_id = %alert.id,
                user_id = %alert.user_id,
                kind = %alert.kind,
                severity = ?alert.severity,
                "{}",
                alert.title
            );
        }
        if alerts.is_empty() {
            debug!("No alerts raised");
        }
        Ok(())
    }
}

impl std::fmt::Debug for FraudAlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FraudAlertEngine")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

fn check_report_fields(
    correlation_id: Option<&str>,
    client_address: Option<&str>,
) -> Result<(), AlertError> {
    if !fits_column(correlation_id, MAX_CORRELATION_ID_LEN) {
        return Err(AlertError::FieldTooLong {
            field: "correlation_id",
            max: MAX_CORRELATION_ID_LEN,
        });
    }
    if !fits_column(client_address, MAX_CLIENT_ADDRESS_LEN) {
        return Err(AlertError::FieldTooLong {
            field: "client_address",
            max: MAX_CLIENT_ADDRESS_LEN,
        });
    }
    Ok(())
}
