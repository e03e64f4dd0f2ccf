//! Money helpers with decimal precision.
//!
//! CRITICAL: Never use floating-point for money calculations.
//! Balances are single-currency `rust_decimal::Decimal` values with at most
//! two fractional digits (minor units).

use rust_decimal::Decimal;

/// Number of fractional digits a monetary amount may carry.
pub const MONEY_SCALE: u32 = 2;

/// Tolerance applied when reconciling stored balance rows (0.01).
///
/// Rows written through the ledger reconcile exactly; the tolerance only
/// absorbs rounding carried by rows imported from older systems.
pub const RECONCILE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Largest magnitude a stored money column holds (`NUMERIC(20, 2)`).
pub const MAX_STORABLE_AMOUNT: Decimal =
    Decimal::from_parts(1_661_992_959, 1_808_227_885, 5, false, 2);

/// Returns true if the amount fits a stored money column.
#[must_use]
pub fn is_storable(amount: Decimal) -> bool {
    amount.abs() <= MAX_STORABLE_AMOUNT
}

/// Returns true if the amount fits in minor units without rounding.
#[must_use]
pub fn has_money_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= MONEY_SCALE
}
