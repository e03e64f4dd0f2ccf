//! Audit entry and request types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{LedgerEntryId, UserId};
use uuid::Uuid;

use super::error::BalanceError;
use super::types::{Balance, OperationKind, OperatorInfo, OperatorKind};

/// Longest accepted correlation id, in characters.
pub const MAX_CORRELATION_ID_LEN: usize = 128;

/// Longest accepted client address, in characters (an IPv6 text form).
pub const MAX_CLIENT_ADDRESS_LEN: usize = 45;

/// Returns true if `value` is absent or at most `max` characters long.
#[must_use]
pub fn fits_column(value: Option<&str>, max: usize) -> bool {
    value.is_none_or(|v| v.chars().count() <= max)
}

/// Immutable record of one committed balance mutation.
///
/// `balance_before`/`balance_after` track the available pocket and
/// `frozen_before`/`frozen_after` the frozen pocket. `amount` is signed:
/// positive credits the pocket the operation moves, negative debits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier for this entry.
    pub id: LedgerEntryId,
    /// Owner of the mutated balance.
    pub user_id: UserId,
    /// What happened.
    pub kind: OperationKind,
    /// Signed amount moved.
    pub amount: Decimal,
    /// Available before the mutation.
    pub balance_before: Decimal,
    /// Available after the mutation.
    pub balance_after: Decimal,
    /// Frozen before the mutation.
    pub frozen_before: Decimal,
    /// Frozen after the mutation.
    pub frozen_after: Decimal,
    /// Order or recharge number supplied by the caller.
    pub correlation_id: Option<String>,
    /// Acting user or staff member.
    pub operator_id: Option<Uuid>,
    /// Kind of actor.
    pub operator_kind: OperatorKind,
    /// Network address of the request.
    pub client_address: Option<String>,
    /// Free-form note.
    pub remark: Option<String>,
    /// Commit time.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Builds the entry for a mutation from its before and after rows.
    #[must_use]
    pub fn record(
        kind: OperationKind,
        amount: Decimal,
        before: &Balance,
        after: &Balance,
        request: &OperationRequest,
        operator: OperatorInfo,
    ) -> Self {
        Self {
            id: LedgerEntryId::new(),
            user_id: after.user_id,
            kind,
            amount,
            balance_before: before.available,
            balance_after: after.available,
            frozen_before: before.frozen,
            frozen_after: after.frozen,
            correlation_id: request.correlation_id.clone(),
            operator_id: operator.operator_id,
            operator_kind: operator.operator_kind,
            client_address: operator.client_address,
            remark: request.remark.clone(),
            created_at: Utc::now(),
        }
    }

    /// Returns true if the recorded pocket moved by exactly `amount`.
    ///
    /// Deduct-frozen spends from the frozen pocket; every other kind
    /// moves the available pocket.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.kind {
            OperationKind::DeductFrozen => {
                self.frozen_after - self.frozen_before == self.amount
                    && self.balance_after == self.balance_before
            }
            _ => self.balance_after - self.balance_before == self.amount,
        }
    }

    /// Returns true if the entry increased the recorded pocket.
    #[must_use]
    pub fn is_credit(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

/// Caller input shared by every ledger operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Balance to mutate.
    pub user_id: UserId,
    /// Amount; positive except for adjustments, which may be negative.
    pub amount: Decimal,
    /// Order or recharge number for external dedup.
    pub correlation_id: Option<String>,
    /// Attribution; defaults per operation kind when absent.
    pub operator: Option<OperatorInfo>,
    /// Free-form note.
    pub remark: Option<String>,
}

impl OperationRequest {
    /// Creates a request with no correlation, operator, or remark.
    #[must_use]
    pub fn new(user_id: UserId, amount: Decimal) -> Self {
        Self {
            user_id,
            amount,
            correlation_id: None,
            operator: None,
            remark: None,
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the operator.
    #[must_use]
    pub fn with_operator(mut self, operator: OperatorInfo) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Sets the remark.
    #[must_use]
    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    /// Checks caller strings against their stored column widths.
    ///
    /// # Errors
    ///
    /// Returns `FieldTooLong` naming the first oversized field.
    pub fn validate(&self) -> Result<(), BalanceError> {
        if !fits_column(self.correlation_id.as_deref(), MAX_CORRELATION_ID_LEN) {
            return Err(BalanceError::FieldTooLong {
                field: "correlation_id",
                max: MAX_CORRELATION_ID_LEN,
            });
        }
        let client_address = self
            .operator
            .as_ref()
            .and_then(|op| op.client_address.as_deref());
        if !fits_column(client_address, MAX_CLIENT_ADDRESS_LEN) {
            return Err(BalanceError::FieldTooLong {
                field: "client_address",
                max: MAX_CLIENT_ADDRESS_LEN,
            });
        }
        Ok(())
    }

    /// Attribution to record for `kind`.
    #[must_use]
    pub fn operator_for(&self, kind: OperationKind) -> OperatorInfo {
        self.operator
            .clone()
            .unwrap_or_else(|| OperatorInfo::default_for(kind, self.user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rows(available: (Decimal, Decimal), frozen: (Decimal, Decimal)) -> (Balance, Balance) {
        let user = UserId::new();
        let before = Balance {
            available: available.0,
            frozen: frozen.0,
            ..Balance::zero(user)
        };
        let after = Balance {
            available: available.1,
            frozen: frozen.1,
            ..Balance::zero(user)
        };
        (before, after)
    }

    #[test]
    fn test_validate_column_widths() {
        let user = UserId::new();
        let fits = OperationRequest::new(user, dec!(1))
            .with_correlation("x".repeat(MAX_CORRELATION_ID_LEN))
            .with_operator(
                OperatorInfo::new(Uuid::nil(), OperatorKind::Admin)
                    .with_client_address("ffff:ffff:ffff:ffff:ffff:ffff:255.255.255.255"),
            );
        assert!(fits.validate().is_ok());

        let long_order = OperationRequest::new(user, dec!(1))
            .with_correlation("x".repeat(MAX_CORRELATION_ID_LEN + 1));
        assert!(matches!(
            long_order.validate(),
            Err(BalanceError::FieldTooLong { field: "correlation_id", max: 128 })
        ));

        let long_address = OperationRequest::new(user, dec!(1)).with_operator(
            OperatorInfo::new(Uuid::nil(), OperatorKind::User)
                .with_client_address("1".repeat(MAX_CLIENT_ADDRESS_LEN + 1)),
        );
        assert!(matches!(
            long_address.validate(),
            Err(BalanceError::FieldTooLong { field: "client_address", .. })
        ));

        // Width is counted in characters, as Postgres VARCHAR does.
        let multibyte = OperationRequest::new(user, dec!(1))
            .with_correlation("é".repeat(MAX_CORRELATION_ID_LEN));
        assert!(multibyte.validate().is_ok());
    }

    #[test]
    fn test_record_copies_request_fields() {
        let (before, after) = rows((dec!(0), dec!(100)), (dec!(0), dec!(0)));
        let request = OperationRequest::new(after.user_id, dec!(100))
            .with_correlation("R-1")
            .with_remark("top up");
        let operator = request.operator_for(OperationKind::Recharge);
        let entry = LedgerEntry::record(
            OperationKind::Recharge,
            dec!(100),
            &before,
            &after,
            &request,
            operator,
        );

        assert_eq!(entry.correlation_id.as_deref(), Some("R-1"));
        assert_eq!(entry.remark.as_deref(), Some("top up"));
        assert_eq!(entry.operator_kind, OperatorKind::System);
        assert!(entry.is_consistent());
        assert!(entry.is_credit());
    }

    #[test]
    fn test_deduct_frozen_consistency_uses_frozen_pocket() {
        let (before, after) = rows((dec!(50), dec!(50)), (dec!(20), dec!(0)));
        let request = OperationRequest::new(after.user_id, dec!(20));
        let entry = LedgerEntry::record(
            OperationKind::DeductFrozen,
            dec!(-20),
            &before,
            &after,
            &request,
            request.operator_for(OperationKind::DeductFrozen),
        );
        assert!(entry.is_consistent());

        let wrong = LedgerEntry {
            kind: OperationKind::Consume,
            ..entry
        };
        assert!(!wrong.is_consistent());
    }

    #[test]
    fn test_explicit_operator_wins() {
        let user = UserId::new();
        let staff = Uuid::new_v4();
        let request = OperationRequest::new(user, dec!(5)).with_operator(
            OperatorInfo::new(staff, OperatorKind::Admin).with_client_address("10.0.0.7"),
        );
        let operator = request.operator_for(OperationKind::Consume);
        assert_eq!(operator.operator_id, Some(staff));
        assert_eq!(operator.operator_kind, OperatorKind::Admin);
        assert_eq!(operator.client_address.as_deref(), Some("10.0.0.7"));
    }
}
