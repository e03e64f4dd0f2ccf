//! Property-based tests for balance planning rules.
//!
//! - Conservation: held funds always equal lifetime funding
//! - Non-negativity: no accepted plan leaves a pocket negative
//! - Guard agreement: a plan's guard holds on the row it was planned against
//! - Freeze/unfreeze round trip restores both pockets

use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::types::UserId;

use super::error::BalanceError;
use super::rules::plan;
use super::types::{Balance, OperationKind};
use crate::limits::LimitsConfig;

/// Strategy to generate positive decimal amounts (0.01 to 2,000.00).
fn positive_amount() -> impl Strategy<Value = Decimal> {
    (1i64..200_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy to generate signed adjustment amounts, excluding zero.
fn adjustment_amount() -> impl Strategy<Value = Decimal> {
    prop_oneof![
        positive_amount(),
        positive_amount().prop_map(|amount| -amount),
    ]
}

/// Strategy to generate an operation with a suitable amount.
fn operation() -> impl Strategy<Value = (OperationKind, Decimal)> {
    prop_oneof![
        positive_amount().prop_map(|a| (OperationKind::Recharge, a)),
        positive_amount().prop_map(|a| (OperationKind::Consume, a)),
        positive_amount().prop_map(|a| (OperationKind::Refund, a)),
        positive_amount().prop_map(|a| (OperationKind::Freeze, a)),
        positive_amount().prop_map(|a| (OperationKind::Unfreeze, a)),
        positive_amount().prop_map(|a| (OperationKind::DeductFrozen, a)),
        adjustment_amount().prop_map(|a| (OperationKind::Adjust, a)),
        positive_amount().prop_map(|a| (OperationKind::Gift, a)),
    ]
}

/// Applies a sequence of operations, skipping business rejections.
fn run(operations: &[(OperationKind, Decimal)]) -> Vec<Balance> {
    let limits = LimitsConfig::default();
    let mut current = Balance::zero(UserId::new());
    let mut recharged = Decimal::ZERO;
    let mut history = vec![current.clone()];

    for &(kind, amount) in operations {
        match plan(kind, amount, &current, &limits, recharged) {
            Ok(mutation) => {
                assert!(mutation.guard.holds(&current), "guard must hold on planned row");
                if kind == OperationKind::Recharge {
                    recharged += amount;
                }
                current = mutation.delta.apply(&current).expect("planned delta is storable");
                history.push(current.clone());
            }
            Err(err) => {
                assert_eq!(
                    err.category(),
                    super::error::ErrorCategory::Business,
                    "pure planning only rejects on business rules: {err}"
                );
            }
        }
    }

    history
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// *For any* operation sequence, every resulting row conserves funds exactly.
    #[test]
    fn prop_conservation_holds(operations in prop::collection::vec(operation(), 1..40)) {
        for row in run(&operations) {
            prop_assert_eq!(row.conservation_gap(), Decimal::ZERO);
        }
    }

    /// *For any* operation sequence, no resulting row has a negative pocket.
    #[test]
    fn prop_non_negative(operations in prop::collection::vec(operation(), 1..40)) {
        for row in run(&operations) {
            prop_assert!(row.is_non_negative(), "negative row: {:?}", row);
        }
    }

    /// *For any* funded row, freeze then unfreeze restores both pockets.
    #[test]
    fn prop_freeze_unfreeze_round_trip(
        funded in positive_amount(),
        fraction in 1u32..=100u32,
    ) {
        let limits = LimitsConfig::default();
        let start = Balance {
            available: funded,
            total_in: funded,
            ..Balance::zero(UserId::new())
        };
        let amount = (funded * Decimal::from(fraction) / Decimal::from(100)).round_dp(2);
        prop_assume!(amount > Decimal::ZERO);

        let freeze = plan(OperationKind::Freeze, amount, &start, &limits, Decimal::ZERO).unwrap();
        let frozen = freeze.delta.apply(&start).unwrap();
        let unfreeze = plan(OperationKind::Unfreeze, amount, &frozen, &limits, Decimal::ZERO).unwrap();
        let restored = unfreeze.delta.apply(&frozen).unwrap();

        prop_assert_eq!(restored.available, start.available);
        prop_assert_eq!(restored.frozen, start.frozen);
    }

    /// *For any* debit larger than available, consume is rejected.
    #[test]
    fn prop_overdraw_rejected(available in positive_amount(), extra in positive_amount()) {
        let limits = LimitsConfig::default();
        let current = Balance {
            available,
            total_in: available,
            ..Balance::zero(UserId::new())
        };
        let result = plan(OperationKind::Consume, available + extra, &current, &limits, Decimal::ZERO);
        let rejected = matches!(result, Err(BalanceError::InsufficientBalance { .. }));
        prop_assert!(rejected);
    }
}
