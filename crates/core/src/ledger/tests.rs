use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tally_shared::types::{MAX_STORABLE_AMOUNT, PageRequest, UserId};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::BalanceLedger;
use crate::alert::{AlertDispatcher, AlertKind, AlertSeverity, FraudAlertEngine};
use crate::balance::{Balance, BalanceError, OperationKind, OperationRequest, OperatorInfo, OperatorKind};
use crate::limits::{LimitsConfig, LimitsProvider, LimitsSource, LimitsUnavailable};
use crate::store::{AuditLog, LedgerStore, LedgerTransaction, MemoryStore};

fn plain_ledger(store: &MemoryStore) -> BalanceLedger {
    plain_ledger_with(store, LimitsConfig::default())
}

fn plain_ledger_with(store: &MemoryStore, limits: LimitsConfig) -> BalanceLedger {
    let shared = Arc::new(store.clone());
    BalanceLedger::new(shared.clone(), shared, Arc::new(LimitsProvider::fixed(limits)))
}

/// Ledger wired to an alert worker; `finish` waits for every queued job.
struct Harness {
    store: MemoryStore,
    ledger: BalanceLedger,
    worker: JoinHandle<()>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    fn with_store(store: MemoryStore) -> Self {
        let shared = Arc::new(store.clone());
        let limits = Arc::new(LimitsProvider::fixed(LimitsConfig::default()));
        let engine = Arc::new(FraudAlertEngine::new(
            shared.clone(),
            shared.clone(),
            shared.clone(),
            Arc::clone(&limits),
        ));
        let (dispatcher, worker) = AlertDispatcher::spawn(engine, 64);
        let ledger = BalanceLedger::new(shared.clone(), shared, limits).with_alerts(dispatcher);
        Self {
            store,
            ledger,
            worker,
        }
    }

    async fn finish(self) -> MemoryStore {
        drop(self.ledger);
        self.worker.await.unwrap();
        self.store
    }
}

fn req(user: UserId, amount: Decimal) -> OperationRequest {
    OperationRequest::new(user, amount)
}

async fn assert_conserved(ledger: &BalanceLedger, user: UserId) -> Balance {
    let balance = ledger.get_balance(user).await.unwrap();
    assert!(balance.is_non_negative(), "negative balance: {balance:?}");
    assert_eq!(balance.conservation_gap(), Decimal::ZERO, "{balance:?}");
    balance
}

#[tokio::test]
async fn test_order_flow_recharge_consume_freeze_deduct() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();

    ledger.recharge(req(user, dec!(100))).await.unwrap();
    ledger.consume(req(user, dec!(30))).await.unwrap();
    ledger
        .freeze(req(user, dec!(20)).with_correlation("ORD-1"))
        .await
        .unwrap();
    let deducted = ledger
        .deduct_frozen(req(user, dec!(20)).with_correlation("ORD-1"))
        .await
        .unwrap();

    assert_eq!(deducted.amount, dec!(-20));
    assert_eq!(deducted.frozen_before, dec!(20));
    assert_eq!(deducted.frozen_after, Decimal::ZERO);
    assert_eq!(deducted.balance_before, deducted.balance_after);

    let balance = assert_conserved(&ledger, user).await;
    assert_eq!(balance.available, dec!(50));
    assert_eq!(balance.frozen, Decimal::ZERO);
    assert_eq!(balance.total_in, dec!(100));
    assert_eq!(balance.total_out, dec!(50));
    assert_eq!(balance.version, 4);

    let history = ledger
        .get_audit_history(user, PageRequest::default(), None)
        .await
        .unwrap();
    assert_eq!(history.meta.total, 4);
    assert!(history.data.iter().all(|e| e.is_consistent()));
    let kinds: Vec<OperationKind> = history.data.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::DeductFrozen,
            OperationKind::Freeze,
            OperationKind::Consume,
            OperationKind::Recharge,
        ]
    );

    let order = store.find_by_correlation("ORD-1").await.unwrap();
    assert_eq!(order.len(), 2);
}

#[tokio::test]
async fn test_freeze_unfreeze_round_trip() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();
    ledger.recharge(req(user, dec!(80.55))).await.unwrap();
    let before = ledger.get_balance(user).await.unwrap();

    ledger.freeze(req(user, dec!(33.33))).await.unwrap();
    let during = ledger.get_balance(user).await.unwrap();
    assert_eq!(during.available, dec!(47.22));
    assert_eq!(during.frozen, dec!(33.33));

    ledger.unfreeze(req(user, dec!(33.33))).await.unwrap();
    let after = assert_conserved(&ledger, user).await;
    assert_eq!(after.available, before.available);
    assert_eq!(after.frozen, before.frozen);
}

#[rstest]
#[case::consume(OperationKind::Consume, dec!(10.01))]
#[case::freeze(OperationKind::Freeze, dec!(10.01))]
#[case::unfreeze(OperationKind::Unfreeze, dec!(0.01))]
#[case::deduct_frozen(OperationKind::DeductFrozen, dec!(0.01))]
#[case::adjust_down(OperationKind::Adjust, dec!(-10.01))]
#[tokio::test]
async fn test_overdraw_writes_nothing(#[case] kind: OperationKind, #[case] amount: Decimal) {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();
    ledger.recharge(req(user, dec!(10))).await.unwrap();
    let before = ledger.get_balance(user).await.unwrap();

    let request = req(user, amount);
    let result = match kind {
        OperationKind::Consume => ledger.consume(request).await,
        OperationKind::Freeze => ledger.freeze(request).await,
        OperationKind::Unfreeze => ledger.unfreeze(request).await,
        OperationKind::DeductFrozen => ledger.deduct_frozen(request).await,
        _ => ledger.adjust_balance(request).await,
    };

    let err = result.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(ledger.get_balance(user).await.unwrap(), before);
    assert_eq!(store.entry_count().unwrap(), 1);
}

#[tokio::test]
async fn test_business_errors_are_typed() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();
    ledger.recharge(req(user, dec!(30))).await.unwrap();

    assert!(matches!(
        ledger.consume(req(user, dec!(31))).await,
        Err(BalanceError::InsufficientBalance { available, requested })
            if available == dec!(30) && requested == dec!(31)
    ));
    assert!(matches!(
        ledger.unfreeze(req(user, dec!(1))).await,
        Err(BalanceError::InsufficientFrozen { .. })
    ));
    assert!(matches!(
        ledger.adjust_balance(req(user, dec!(-50))).await,
        Err(BalanceError::NegativeResult { .. })
    ));
    assert!(matches!(
        ledger.gift_balance(req(user, dec!(100000))).await,
        Err(BalanceError::OverCeiling { .. })
    ));
    assert!(matches!(
        ledger.consume(req(user, dec!(-5))).await,
        Err(BalanceError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.refund(req(user, dec!(1.005))).await,
        Err(BalanceError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.adjust_balance(req(user, Decimal::ZERO)).await,
        Err(BalanceError::InvalidAmount(_))
    ));
    assert_eq!(store.entry_count().unwrap(), 1);
}

#[tokio::test]
async fn test_recharge_bounds_and_daily_cap() {
    let store = MemoryStore::new();
    let limits = LimitsConfig {
        max_recharge: dec!(600),
        max_daily_recharge: dec!(1000),
        ..LimitsConfig::default()
    };
    let ledger = plain_ledger_with(&store, limits);
    let user = UserId::new();

    assert!(matches!(
        ledger.recharge(req(user, dec!(0.5))).await,
        Err(BalanceError::RechargeBelowMinimum { .. })
    ));
    assert!(matches!(
        ledger.recharge(req(user, dec!(600.01))).await,
        Err(BalanceError::RechargeAboveMaximum { .. })
    ));

    ledger.recharge(req(user, dec!(600))).await.unwrap();
    ledger.recharge(req(user, dec!(400))).await.unwrap();
    let err = ledger.recharge(req(user, dec!(1))).await.unwrap_err();
    assert!(matches!(
        err,
        BalanceError::DailyRechargeLimitExceeded { recharged, .. } if recharged == dec!(1000)
    ));

    // Gifts and adjustments do not count toward the recharge cap.
    ledger.gift_balance(req(user, dec!(50))).await.unwrap();
    ledger.adjust_balance(req(user, dec!(25))).await.unwrap();
    assert_eq!(ledger.get_balance(user).await.unwrap().available, dec!(1075));
}

#[tokio::test]
async fn test_ceiling_applies_to_credits() {
    let store = MemoryStore::new();
    let limits = LimitsConfig {
        max_balance: dec!(100),
        ..LimitsConfig::default()
    };
    let ledger = plain_ledger_with(&store, limits);
    let user = UserId::new();

    ledger.recharge(req(user, dec!(90))).await.unwrap();
    assert!(matches!(
        ledger.recharge(req(user, dec!(10.01))).await,
        Err(BalanceError::OverCeiling { resulting, .. }) if resulting == dec!(100.01)
    ));
    assert!(matches!(
        ledger.adjust_balance(req(user, dec!(11))).await,
        Err(BalanceError::OverCeiling { .. })
    ));
    ledger.recharge(req(user, dec!(10))).await.unwrap();
    assert_eq!(ledger.get_balance(user).await.unwrap().available, dec!(100));
}

#[tokio::test]
async fn test_gift_and_refund_totals() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();

    ledger.recharge(req(user, dec!(50))).await.unwrap();
    ledger.gift_balance(req(user, dec!(20))).await.unwrap();
    ledger.consume(req(user, dec!(40))).await.unwrap();
    ledger.refund(req(user, dec!(15))).await.unwrap();

    let balance = assert_conserved(&ledger, user).await;
    assert_eq!(balance.available, dec!(45));
    assert_eq!(balance.total_in, dec!(50));
    assert_eq!(balance.total_gifted, dec!(20));
    assert_eq!(balance.total_out, dec!(25));
}

#[tokio::test]
async fn test_refund_creates_missing_row() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();

    assert_eq!(ledger.get_balance(user).await.unwrap().version, 0);
    assert!(store.find_balance(user).await.unwrap().is_none());

    let entry = ledger.refund(req(user, dec!(12))).await.unwrap();
    assert_eq!(entry.balance_before, Decimal::ZERO);
    assert_eq!(entry.balance_after, dec!(12));
    let balance = ledger.get_balance(user).await.unwrap();
    assert_eq!(balance.total_out, dec!(-12));
    assert!(balance.is_conserved(Decimal::ZERO));
}

#[tokio::test]
async fn test_huge_amounts_are_rejected_not_panicking() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();
    ledger.recharge(req(user, dec!(1))).await.unwrap();

    for amount in [Decimal::MAX, MAX_STORABLE_AMOUNT + dec!(0.01)] {
        assert!(matches!(
            ledger.gift_balance(req(user, amount)).await,
            Err(BalanceError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.adjust_balance(req(user, amount)).await,
            Err(BalanceError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.refund(req(user, amount)).await,
            Err(BalanceError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.recharge(req(user, amount)).await,
            Err(BalanceError::InvalidAmount(_))
        ));
    }
    assert!(matches!(
        ledger.adjust_balance(req(user, Decimal::MIN)).await,
        Err(BalanceError::InvalidAmount(_))
    ));

    let balance = assert_conserved(&ledger, user).await;
    assert_eq!(balance.available, dec!(1));
    assert_eq!(store.entry_count().unwrap(), 1);
}

#[tokio::test]
async fn test_oversized_request_strings_rejected_before_locking() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();

    let long_order = req(user, dec!(10)).with_correlation("O".repeat(200));
    let err = ledger.recharge(long_order).await.unwrap_err();
    assert!(matches!(err, BalanceError::FieldTooLong { field: "correlation_id", max: 128 }));
    assert_eq!(err.http_status_code(), 400);

    let long_address = req(user, dec!(10)).with_operator(
        OperatorInfo::new(Uuid::new_v4(), OperatorKind::Admin).with_client_address("a".repeat(64)),
    );
    assert!(matches!(
        ledger.gift_balance(long_address).await,
        Err(BalanceError::FieldTooLong { field: "client_address", .. })
    ));

    assert!(store.find_balance(user).await.unwrap().is_none());
    assert_eq!(store.entry_count().unwrap(), 0);
}

#[tokio::test]
async fn test_refund_at_storage_limit_keeps_row_usable() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();

    ledger.refund(req(user, MAX_STORABLE_AMOUNT)).await.unwrap();
    let err = ledger.refund(req(user, dec!(1))).await.unwrap_err();
    assert!(matches!(err, BalanceError::BalanceOutOfRange(u) if u == user));
    assert!(!err.is_retryable());
    assert!(matches!(
        ledger.gift_balance(req(user, dec!(1))).await,
        Err(BalanceError::OverCeiling { .. })
    ));

    ledger.consume(req(user, dec!(1))).await.unwrap();
    let balance = assert_conserved(&ledger, user).await;
    assert_eq!(balance.available, MAX_STORABLE_AMOUNT - dec!(1));
}

#[tokio::test]
async fn test_adjust_both_directions() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();

    ledger.adjust_balance(req(user, dec!(70))).await.unwrap();
    let down = ledger.adjust_balance(req(user, dec!(-70))).await.unwrap();
    assert_eq!(down.amount, dec!(-70));

    let balance = assert_conserved(&ledger, user).await;
    assert_eq!(balance.available, Decimal::ZERO);
    assert_eq!(balance.total_in, dec!(70));
    assert_eq!(balance.total_out, dec!(70));
}

#[tokio::test]
async fn test_default_operator_attribution() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();

    let recharge = ledger.recharge(req(user, dec!(100))).await.unwrap();
    assert_eq!(recharge.operator_kind, OperatorKind::System);
    assert_eq!(recharge.operator_id, None);

    let consume = ledger.consume(req(user, dec!(1))).await.unwrap();
    assert_eq!(consume.operator_kind, OperatorKind::User);
    assert_eq!(consume.operator_id, Some(user.into_inner()));

    let gift = ledger.gift_balance(req(user, dec!(1))).await.unwrap();
    assert_eq!(gift.operator_kind, OperatorKind::Admin);

    let staff = Uuid::new_v4();
    let adjust = ledger
        .adjust_balance(
            req(user, dec!(-2))
                .with_operator(OperatorInfo::new(staff, OperatorKind::Admin).with_client_address("10.0.0.8"))
                .with_remark("duplicate order"),
        )
        .await
        .unwrap();
    assert_eq!(adjust.operator_id, Some(staff));
    assert_eq!(adjust.client_address.as_deref(), Some("10.0.0.8"));
    assert_eq!(adjust.remark.as_deref(), Some("duplicate order"));
}

#[tokio::test]
async fn test_history_pagination_and_filter() {
    let store = MemoryStore::new();
    let ledger = plain_ledger(&store);
    let user = UserId::new();
    let other = UserId::new();

    for _ in 0..5 {
        ledger.recharge(req(user, dec!(10))).await.unwrap();
    }
    for _ in 0..3 {
        ledger.consume(req(user, dec!(1))).await.unwrap();
    }
    ledger.recharge(req(other, dec!(10))).await.unwrap();

    let first = ledger
        .get_audit_history(user, PageRequest::new(1, 3), None)
        .await
        .unwrap();
    assert_eq!(first.meta.total, 8);
    assert_eq!(first.meta.total_pages, 3);
    assert_eq!(first.data.len(), 3);
    assert!(first.data.iter().all(|e| e.kind == OperationKind::Consume));

    let last = ledger
        .get_audit_history(user, PageRequest::new(3, 3), None)
        .await
        .unwrap();
    assert_eq!(last.data.len(), 2);

    let recharges = ledger
        .get_audit_history(user, PageRequest::default(), Some(OperationKind::Recharge))
        .await
        .unwrap();
    assert_eq!(recharges.meta.total, 5);
    assert!(recharges.data.iter().all(|e| e.user_id == user));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumes_never_overdraw() {
    const CALLERS: usize = 16;
    let store = MemoryStore::new();
    let ledger = Arc::new(plain_ledger(&store));
    let user = UserId::new();
    let stake = dec!(12.5);

    let funding = stake * Decimal::from(CALLERS - 1);
    ledger.recharge(req(user, funding)).await.unwrap();

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.consume(req(user, stake)).await })
        })
        .collect();
    let results = futures::future::join_all(handles).await;

    let mut succeeded = 0;
    let mut insufficient = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => succeeded += 1,
            Err(BalanceError::InsufficientBalance { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, CALLERS - 1);
    assert_eq!(insufficient, 1);

    let balance = assert_conserved(&ledger, user).await;
    assert_eq!(balance.available, Decimal::ZERO);
    assert_eq!(store.entry_count().unwrap(), CALLERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_users_do_not_contend() {
    let store = MemoryStore::with_lock_timeout(Duration::from_millis(200));
    let ledger = Arc::new(plain_ledger(&store));
    let blocked = UserId::new();
    let free = UserId::new();

    let mut holder = store.begin().await.unwrap();
    holder.locked_read(blocked).await.unwrap();

    ledger.recharge(req(free, dec!(5))).await.unwrap();
    holder.rollback().await.unwrap();
    assert_eq!(ledger.get_balance(free).await.unwrap().available, dec!(5));
}

#[tokio::test]
async fn test_lock_timeout_is_retryable() {
    let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
    let ledger = plain_ledger(&store);
    let user = UserId::new();
    ledger.recharge(req(user, dec!(40))).await.unwrap();

    let mut holder = store.begin().await.unwrap();
    holder.locked_read(user).await.unwrap();

    let err = ledger.consume(req(user, dec!(10))).await.unwrap_err();
    assert!(matches!(err, BalanceError::LockTimeout(u) if u == user));
    assert!(err.is_retryable());

    holder.rollback().await.unwrap();
    ledger.consume(req(user, dec!(10))).await.unwrap();
    assert_eq!(ledger.get_balance(user).await.unwrap().available, dec!(30));
}

#[tokio::test]
async fn test_limits_fall_back_when_source_fails() {
    struct Offline;

    impl LimitsSource for Offline {
        fn load(&self) -> Result<LimitsConfig, LimitsUnavailable> {
            Err(LimitsUnavailable("settings table missing".into()))
        }
    }

    let store = MemoryStore::new();
    let shared = Arc::new(store.clone());
    let ledger = BalanceLedger::new(
        shared.clone(),
        shared,
        Arc::new(LimitsProvider::new(Offline, Duration::from_secs(60))),
    );
    let user = UserId::new();

    ledger.recharge(req(user, dec!(50000))).await.unwrap();
    assert!(matches!(
        ledger.recharge(req(user, dec!(50000.01))).await,
        Err(BalanceError::RechargeAboveMaximum { maximum, .. }) if maximum == dec!(50000)
    ));
}

#[tokio::test]
async fn test_large_recharge_raises_one_alert() {
    let harness = Harness::new();
    let user = UserId::new();
    harness
        .ledger
        .recharge(req(user, dec!(1200)).with_correlation("R-1"))
        .await
        .unwrap();

    let store = harness.finish().await;
    let alerts = store.alerts().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::LargeRecharge);
    assert_eq!(alerts[0].related_amount, Some(dec!(1200)));
    assert_eq!(alerts[0].related_correlation_id.as_deref(), Some("R-1"));
}

#[tokio::test]
async fn test_rejected_operation_raises_no_alert() {
    let harness = Harness::new();
    let user = UserId::new();
    harness.ledger.recharge(req(user, dec!(30))).await.unwrap();

    let err = harness
        .ledger
        .adjust_balance(req(user, dec!(-50)))
        .await
        .unwrap_err();
    assert!(matches!(err, BalanceError::NegativeResult { .. }));

    let store = harness.finish().await;
    assert_eq!(store.entry_count().unwrap(), 1);
    assert!(store.alerts().unwrap().is_empty());
}

#[tokio::test]
async fn test_frequent_small_recharges_alert_once() {
    let harness = Harness::new();
    let user = UserId::new();
    for _ in 0..5 {
        harness.ledger.recharge(req(user, dec!(5))).await.unwrap();
    }

    let store = harness.finish().await;
    let alerts = store.alerts().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::FrequentRecharge);
}

#[tokio::test]
async fn test_large_admin_gift_is_critical() {
    let harness = Harness::new();
    let user = UserId::new();
    harness.ledger.gift_balance(req(user, dec!(6000))).await.unwrap();

    let store = harness.finish().await;
    let alerts = store.alerts().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::LargeAdminAdjust);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
}

#[tokio::test]
async fn test_corrupted_row_rolls_back_and_alerts() {
    let store = MemoryStore::new();
    let user = UserId::new();
    // Imported row whose totals were never migrated.
    store
        .put_balance(Balance {
            available: dec!(100),
            total_in: dec!(40),
            ..Balance::zero(user)
        })
        .await
        .unwrap();

    let harness = Harness::with_store(store);
    let err = harness.ledger.consume(req(user, dec!(10))).await.unwrap_err();
    assert!(matches!(err, BalanceError::InvariantViolation { user_id, .. } if user_id == user));
    assert!(!err.is_retryable());

    let untouched = harness.ledger.get_balance(user).await.unwrap();
    assert_eq!(untouched.available, dec!(100));
    assert_eq!(untouched.version, 0);

    let store = harness.finish().await;
    assert_eq!(store.entry_count().unwrap(), 0);
    let alerts = store.alerts().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::BalanceMismatch);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
}
