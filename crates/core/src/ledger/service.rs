use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tally_shared::types::{PageRequest, PageResponse, RECONCILE_TOLERANCE, UserId};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::alert::{AlertDispatcher, AlertJob};
use crate::balance::{
    Balance, BalanceError, LedgerEntry, OperationKind, OperationRequest, plan, validate_amount,
};
use crate::limits::{LimitsConfig, LimitsProvider};
use crate::store::{AuditLog, LedgerStore, LedgerTransaction, StoreError};

/// Why a transaction was rolled back.
struct Rejection {
    error: BalanceError,
    /// Post-image that broke an invariant, if that was the cause.
    breached: Option<Balance>,
}

impl From<BalanceError> for Rejection {
    fn from(error: BalanceError) -> Self {
        Self {
            error,
            breached: None,
        }
    }
}

impl From<StoreError> for Rejection {
    fn from(error: StoreError) -> Self {
        BalanceError::from(error).into()
    }
}

/// Per-user balance ledger.
///
/// Cheap to share behind an `Arc`; all state lives in the store.
pub struct BalanceLedger {
    store: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditLog>,
    limits: Arc<LimitsProvider>,
    alerts: Option<AlertDispatcher>,
}

impl BalanceLedger {
    /// Creates a ledger without alerting.
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        audit: Arc<dyn AuditLog>,
        limits: Arc<LimitsProvider>,
    ) -> Self {
        Self {
            store,
            audit,
            limits,
            alerts: None,
        }
    }

    /// Submits committed entries and invariant breaches to `dispatcher`.
    #[must_use]
    pub fn with_alerts(mut self, dispatcher: AlertDispatcher) -> Self {
        self.alerts = Some(dispatcher);
        self
    }

    /// Credits a paid recharge.
    ///
    /// Subject to the per-recharge bounds, the daily cap, and the balance ceiling.
    pub async fn recharge(&self, request: OperationRequest) -> Result<LedgerEntry, BalanceError> {
        self.execute(OperationKind::Recharge, request).await
    }

    /// Spends from the available pocket.
    pub async fn consume(&self, request: OperationRequest) -> Result<LedgerEntry, BalanceError> {
        self.execute(OperationKind::Consume, request).await
    }

    /// Returns previously consumed funds to the available pocket.
    pub async fn refund(&self, request: OperationRequest) -> Result<LedgerEntry, BalanceError> {
        self.execute(OperationKind::Refund, request).await
    }

    /// Moves funds from available to frozen.
    pub async fn freeze(&self, request: OperationRequest) -> Result<LedgerEntry, BalanceError> {
        self.execute(OperationKind::Freeze, request).await
    }

    /// Moves funds from frozen back to available.
    pub async fn unfreeze(&self, request: OperationRequest) -> Result<LedgerEntry, BalanceError> {
        self.execute(OperationKind::Unfreeze, request).await
    }

    /// Spends frozen funds; available is untouched.
    pub async fn deduct_frozen(
        &self,
        request: OperationRequest,
    ) -> Result<LedgerEntry, BalanceError> {
        self.execute(OperationKind::DeductFrozen, request).await
    }

    /// Staff correction of either sign.
    pub async fn adjust_balance(
        &self,
        request: OperationRequest,
    ) -> Result<LedgerEntry, BalanceError> {
        self.execute(OperationKind::Adjust, request).await
    }

    /// Promotional credit, tracked apart from paid funding.
    pub async fn gift_balance(
        &self,
        request: OperationRequest,
    ) -> Result<LedgerEntry, BalanceError> {
        self.execute(OperationKind::Gift, request).await
    }

    /// Committed balance for the user; a zero row if the user has none.
    ///
    /// Does not create a row.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Balance, BalanceError> {
        Ok(self
            .store
            .find_balance(user_id)
            .await?
            .unwrap_or_else(|| Balance::zero(user_id)))
    }

    /// Audit history for the user, newest first.
    pub async fn get_audit_history(
        &self,
        user_id: UserId,
        page: PageRequest,
        kind: Option<OperationKind>,
    ) -> Result<PageResponse<LedgerEntry>, BalanceError> {
        Ok(self.audit.history(user_id, page, kind).await?)
    }

    async fn execute(
        &self,
        kind: OperationKind,
        request: OperationRequest,
    ) -> Result<LedgerEntry, BalanceError> {
        let span = info_span!(
            "ledger_operation",
            kind = %kind,
            user_id = %request.user_id,
            amount = %request.amount,
            correlation_id = request.correlation_id.as_deref(),
        );
        async move {
            validate_amount(kind, request.amount)?;
            request.validate()?;
            let limits = self.limits.current();

            let mut tx = self.store.begin().await?;
            let outcome = Self::apply(tx.as_mut(), kind, &request, &limits).await;
            match outcome {
                Ok((entry, after)) => {
                    tx.commit().await?;
                    info!(
                        entry_id = %entry.id,
                        available = %after.available,
                        frozen = %after.frozen,
                        version = after.version,
                        "Balance updated"
                    );
                    self.notify(AlertJob::EntryCommitted {
                        entry: entry.clone(),
                        balance: after,
                    });
                    Ok(entry)
                }
                Err(rejection) => {
                    if let Err(e) = tx.rollback().await {
                        warn!(error = %e, "Rollback failed");
                    }
                    match rejection.breached {
                        Some(balance) => {
                            self.notify(AlertJob::InvariantBreach { balance, kind });
                        }
                        None => debug!(
                            code = rejection.error.error_code(),
                            error = %rejection.error,
                            "Operation rejected"
                        ),
                    }
                    Err(rejection.error)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn apply(
        tx: &mut dyn LedgerTransaction,
        kind: OperationKind,
        request: &OperationRequest,
        limits: &LimitsConfig,
    ) -> Result<(LedgerEntry, Balance), Rejection> {
        let user_id = request.user_id;
        let before = tx.locked_read(user_id).await?;

        let recharged_today = if kind == OperationKind::Recharge {
            tx.recharged_since(user_id, start_of_utc_day(Utc::now()))
                .await?
        } else {
            Decimal::ZERO
        };

        let mutation = plan(kind, request.amount, &before, limits, recharged_today)?;

        let updated = tx
            .conditional_update(user_id, &mutation.guard, &mutation.delta)
            .await?;
        if updated == 0 {
            // The row changed between the locked read and the write.
            return Err(BalanceError::ConcurrentModification(user_id).into());
        }

        let after = mutation
            .delta
            .apply(&before)
            .ok_or(BalanceError::BalanceOutOfRange(user_id))?;
        if let Some(detail) = invariant_breach(&after) {
            error!(
                available = %after.available,
                frozen = %after.frozen,
                gap = %after.conservation_gap(),
                "{detail}"
            );
            return Err(Rejection {
                error: BalanceError::InvariantViolation { user_id, detail },
                breached: Some(after),
            });
        }

        let entry = LedgerEntry::record(
            kind,
            mutation.amount,
            &before,
            &after,
            request,
            request.operator_for(kind),
        );
        tx.append_entry(&entry).await?;
        Ok((entry, after))
    }

    fn notify(&self, job: AlertJob) {
        if let Some(alerts) = &self.alerts {
            alerts.submit(job);
        }
    }
}

impl std::fmt::Debug for BalanceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceLedger")
            .field("limits", &self.limits)
            .field("alerting", &self.alerts.is_some())
            .finish_non_exhaustive()
    }
}

/// Describes the broken invariant, if any.
fn invariant_breach(after: &Balance) -> Option<String> {
    if !after.is_non_negative() {
        return Some("Balance would go negative".to_string());
    }
    if !after.is_conserved(RECONCILE_TOLERANCE) {
        return Some(format!(
            "Holdings differ from lifetime totals by {}",
            after.conservation_gap()
        ));
    }
    None
}

/// Midnight UTC of the day containing `now`.
fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
