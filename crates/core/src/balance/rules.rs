//! Planning rules for balance operations.
//!
//! `plan` turns an operation and the locked row into the guard and delta
//! for a conditional write. The guard repeats the sufficiency and ceiling
//! checks so the write still fails if the row changed underneath.

use rust_decimal::Decimal;
use tally_shared::types::{has_money_scale, is_storable};

use super::error::BalanceError;
use super::types::{Balance, BalanceDelta, BalanceGuard, OperationKind};
use crate::limits::LimitsConfig;

/// A planned conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mutation {
    /// Operation being performed.
    pub kind: OperationKind,
    /// Signed amount recorded in the audit entry.
    pub amount: Decimal,
    /// Predicate the stored row must satisfy at write time.
    pub guard: BalanceGuard,
    /// Field increments.
    pub delta: BalanceDelta,
}

/// Checks amount sign and scale for an operation kind.
///
/// Adjustments accept either sign; every other kind requires a positive amount.
///
/// # Errors
///
/// Returns `InvalidAmount` for zero, wrongly signed, over-precise, or
/// unstorably large amounts.
pub fn validate_amount(kind: OperationKind, amount: Decimal) -> Result<(), BalanceError> {
    let sign_ok = match kind {
        OperationKind::Adjust => !amount.is_zero(),
        _ => amount > Decimal::ZERO,
    };
    if !sign_ok || !has_money_scale(amount) || !is_storable(amount) {
        return Err(BalanceError::InvalidAmount(amount));
    }
    Ok(())
}

/// Plans an operation against the locked row.
///
/// `recharged_today` is the sum of the user's recharges since the start of
/// the current UTC day and is only consulted for recharges.
///
/// # Errors
///
/// Returns the business error describing why the operation is rejected.
pub fn plan(
    kind: OperationKind,
    amount: Decimal,
    current: &Balance,
    limits: &LimitsConfig,
    recharged_today: Decimal,
) -> Result<Mutation, BalanceError> {
    validate_amount(kind, amount)?;

    let mutation = match kind {
        OperationKind::Recharge => {
            if amount < limits.min_recharge {
                return Err(BalanceError::RechargeBelowMinimum {
                    amount,
                    minimum: limits.min_recharge,
                });
            }
            if amount > limits.max_recharge {
                return Err(BalanceError::RechargeAboveMaximum {
                    amount,
                    maximum: limits.max_recharge,
                });
            }
            let daily_total = recharged_today.checked_add(amount);
            if daily_total.is_none_or(|total| total > limits.max_daily_recharge) {
                return Err(BalanceError::DailyRechargeLimitExceeded {
                    limit: limits.max_daily_recharge,
                    recharged: recharged_today,
                    requested: amount,
                });
            }
            credit(kind, amount, current, limits)?.with_delta(BalanceDelta {
                available: amount,
                total_in: amount,
                ..BalanceDelta::default()
            })
        }
        OperationKind::Gift => credit(kind, amount, current, limits)?.with_delta(BalanceDelta {
            available: amount,
            total_gifted: amount,
            ..BalanceDelta::default()
        }),
        OperationKind::Consume => {
            require_available(current, amount)?;
            Mutation {
                kind,
                amount: -amount,
                guard: BalanceGuard::available_at_least(amount),
                delta: BalanceDelta {
                    available: -amount,
                    total_out: amount,
                    ..BalanceDelta::default()
                },
            }
        }
        OperationKind::Refund => Mutation {
            kind,
            amount,
            guard: BalanceGuard::NONE,
            delta: BalanceDelta {
                available: amount,
                total_out: -amount,
                ..BalanceDelta::default()
            },
        },
        OperationKind::Freeze => {
            require_available(current, amount)?;
            Mutation {
                kind,
                amount: -amount,
                guard: BalanceGuard::available_at_least(amount),
                delta: BalanceDelta {
                    available: -amount,
                    frozen: amount,
                    ..BalanceDelta::default()
                },
            }
        }
        OperationKind::Unfreeze => {
            require_frozen(current, amount)?;
            Mutation {
                kind,
                amount,
                guard: BalanceGuard::frozen_at_least(amount),
                delta: BalanceDelta {
                    available: amount,
                    frozen: -amount,
                    ..BalanceDelta::default()
                },
            }
        }
        OperationKind::DeductFrozen => {
            require_frozen(current, amount)?;
            Mutation {
                kind,
                amount: -amount,
                guard: BalanceGuard::frozen_at_least(amount),
                delta: BalanceDelta {
                    frozen: -amount,
                    total_out: amount,
                    ..BalanceDelta::default()
                },
            }
        }
        OperationKind::Adjust if amount > Decimal::ZERO => credit(kind, amount, current, limits)?
            .with_delta(BalanceDelta {
                available: amount,
                total_in: amount,
                ..BalanceDelta::default()
            }),
        OperationKind::Adjust => {
            let debit = amount.abs();
            if current.available < debit {
                return Err(BalanceError::NegativeResult {
                    available: current.available,
                    adjustment: amount,
                });
            }
            Mutation {
                kind,
                amount,
                guard: BalanceGuard::available_at_least(debit),
                delta: BalanceDelta {
                    available: amount,
                    total_out: debit,
                    ..BalanceDelta::default()
                },
            }
        }
    };

    if mutation.delta.apply(current).is_none() {
        return Err(BalanceError::BalanceOutOfRange(current.user_id));
    }
    Ok(mutation)
}

/// Ceiling-checked credit to available; the delta is filled in by the caller.
fn credit(
    kind: OperationKind,
    amount: Decimal,
    current: &Balance,
    limits: &LimitsConfig,
) -> Result<Mutation, BalanceError> {
    let resulting = current
        .available
        .checked_add(amount)
        .ok_or(BalanceError::BalanceOutOfRange(current.user_id))?;
    if resulting > limits.max_balance {
        return Err(BalanceError::OverCeiling {
            ceiling: limits.max_balance,
            resulting,
        });
    }
    Ok(Mutation {
        kind,
        amount,
        guard: BalanceGuard::available_at_most(limits.max_balance - amount),
        delta: BalanceDelta::default(),
    })
}

fn require_available(current: &Balance, amount: Decimal) -> Result<(), BalanceError> {
    if current.available < amount {
        return Err(BalanceError::InsufficientBalance {
            available: current.available,
            requested: amount,
        });
    }
    Ok(())
}

fn require_frozen(current: &Balance, amount: Decimal) -> Result<(), BalanceError> {
    if current.frozen < amount {
        return Err(BalanceError::InsufficientFrozen {
            frozen: current.frozen,
            requested: amount,
        });
    }
    Ok(())
}

impl Mutation {
    const fn with_delta(self, delta: BalanceDelta) -> Self {
        Self { delta, ..self }
    }
}
