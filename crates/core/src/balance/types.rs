//! Balance row, guard, and delta types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{UserId, is_storable};
use uuid::Uuid;

/// One user's balance row, the only mutable aggregate in the ledger.
///
/// Invariants after every successful operation:
/// - `available >= 0` and `frozen >= 0`
/// - `available + frozen == total_in + total_gifted - total_out`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// The owning user.
    pub user_id: UserId,
    /// Immediately spendable amount.
    pub available: Decimal,
    /// Amount reserved against a pending transaction.
    pub frozen: Decimal,
    /// Lifetime paid credits (recharges, positive admin adjustments).
    pub total_in: Decimal,
    /// Lifetime debits net of refunds.
    pub total_out: Decimal,
    /// Lifetime promotional credits, kept apart from `total_in`.
    pub total_gifted: Decimal,
    /// Incremented on every write.
    pub version: i64,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Creates the zero-valued row used for a user seen for the first time.
    #[must_use]
    pub fn zero(user_id: UserId) -> Self {
        Self {
            user_id,
            available: Decimal::ZERO,
            frozen: Decimal::ZERO,
            total_in: Decimal::ZERO,
            total_out: Decimal::ZERO,
            total_gifted: Decimal::ZERO,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Funds the user holds in either pocket.
    #[must_use]
    pub fn holdings(&self) -> Decimal {
        self.available + self.frozen
    }

    /// Funds the lifetime totals say the user should hold.
    #[must_use]
    pub fn net_funding(&self) -> Decimal {
        self.total_in + self.total_gifted - self.total_out
    }

    /// Difference between held funds and lifetime totals; zero when conserved.
    #[must_use]
    pub fn conservation_gap(&self) -> Decimal {
        self.holdings() - self.net_funding()
    }

    /// Returns true if the conservation gap is within `tolerance`.
    #[must_use]
    pub fn is_conserved(&self, tolerance: Decimal) -> bool {
        self.conservation_gap().abs() <= tolerance
    }

    /// Returns true if neither pocket is negative.
    #[must_use]
    pub fn is_non_negative(&self) -> bool {
        self.available >= Decimal::ZERO && self.frozen >= Decimal::ZERO
    }
}

/// Predicate evaluated against the stored row at the instant of a write.
///
/// Every bound is optional; an empty guard always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceGuard {
    /// Row must have at least this much available.
    pub min_available: Option<Decimal>,
    /// Row must have at most this much available.
    pub max_available: Option<Decimal>,
    /// Row must have at least this much frozen.
    pub min_frozen: Option<Decimal>,
}

impl BalanceGuard {
    /// Guard that always holds.
    pub const NONE: Self = Self {
        min_available: None,
        max_available: None,
        min_frozen: None,
    };

    /// Requires `available >= amount`.
    #[must_use]
    pub const fn available_at_least(amount: Decimal) -> Self {
        Self {
            min_available: Some(amount),
            max_available: None,
            min_frozen: None,
        }
    }

    /// Requires `available <= amount`.
    #[must_use]
    pub const fn available_at_most(amount: Decimal) -> Self {
        Self {
            min_available: None,
            max_available: Some(amount),
            min_frozen: None,
        }
    }

    /// Requires `frozen >= amount`.
    #[must_use]
    pub const fn frozen_at_least(amount: Decimal) -> Self {
        Self {
            min_available: None,
            max_available: None,
            min_frozen: Some(amount),
        }
    }

    /// Evaluates the guard against a row.
    #[must_use]
    pub fn holds(&self, balance: &Balance) -> bool {
        self.min_available.is_none_or(|min| balance.available >= min)
            && self.max_available.is_none_or(|max| balance.available <= max)
            && self.min_frozen.is_none_or(|min| balance.frozen >= min)
    }
}

/// Signed field increments applied by a conditional write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    /// Change to `available`.
    pub available: Decimal,
    /// Change to `frozen`.
    pub frozen: Decimal,
    /// Change to `total_in`.
    pub total_in: Decimal,
    /// Change to `total_out`.
    pub total_out: Decimal,
    /// Change to `total_gifted`.
    pub total_gifted: Decimal,
}

impl BalanceDelta {
    /// Returns the row after applying this delta, with the version bumped.
    ///
    /// `None` when any field would leave the storable money range.
    #[must_use]
    pub fn apply(&self, balance: &Balance) -> Option<Balance> {
        let add = |field: Decimal, change: Decimal| {
            field.checked_add(change).filter(|sum| is_storable(*sum))
        };
        Some(Balance {
            user_id: balance.user_id,
            available: add(balance.available, self.available)?,
            frozen: add(balance.frozen, self.frozen)?,
            total_in: add(balance.total_in, self.total_in)?,
            total_out: add(balance.total_out, self.total_out)?,
            total_gifted: add(balance.total_gifted, self.total_gifted)?,
            version: balance.version + 1,
            updated_at: balance.updated_at,
        })
    }

    /// Net change to held funds. Conservation requires this to equal the net change in totals.
    #[must_use]
    pub fn holdings_change(&self) -> Decimal {
        self.available + self.frozen
    }

    /// Net change to lifetime funding.
    #[must_use]
    pub fn funding_change(&self) -> Decimal {
        self.total_in + self.total_gifted - self.total_out
    }
}

/// Kind of balance mutation recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Paid credit.
    Recharge,
    /// Spend from available.
    Consume,
    /// Return of previously consumed funds.
    Refund,
    /// Move from available to frozen.
    Freeze,
    /// Move from frozen back to available.
    Unfreeze,
    /// Spend from frozen.
    DeductFrozen,
    /// Staff correction of either sign.
    Adjust,
    /// Promotional credit.
    Gift,
}

impl OperationKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Recharge,
        Self::Consume,
        Self::Refund,
        Self::Freeze,
        Self::Unfreeze,
        Self::DeductFrozen,
        Self::Adjust,
        Self::Gift,
    ];

    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recharge => "recharge",
            Self::Consume => "consume",
            Self::Refund => "refund",
            Self::Freeze => "freeze",
            Self::Unfreeze => "unfreeze",
            Self::DeductFrozen => "deduct_frozen",
            Self::Adjust => "adjust",
            Self::Gift => "gift",
        }
    }

    /// Operator kind recorded when the caller does not supply one.
    #[must_use]
    pub const fn default_operator(self) -> OperatorKind {
        match self {
            Self::Consume | Self::Freeze => OperatorKind::User,
            Self::Adjust | Self::Gift => OperatorKind::Admin,
            Self::Recharge | Self::Refund | Self::Unfreeze | Self::DeductFrozen => {
                OperatorKind::System
            }
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown operation kind: {s}"))
    }
}

/// Who initiated a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// The balance holder, self-service.
    User,
    /// Staff member.
    Admin,
    /// Automated pipeline.
    System,
}

impl OperatorKind {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "system" => Ok(Self::System),
            _ => Err(format!("Unknown operator kind: {s}")),
        }
    }
}

/// Attribution attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorInfo {
    /// Acting user or staff member, if known.
    pub operator_id: Option<Uuid>,
    /// Kind of actor.
    pub operator_kind: OperatorKind,
    /// Network address of the request, if known.
    pub client_address: Option<String>,
}

impl OperatorInfo {
    /// Creates attribution for a specific actor.
    #[must_use]
    pub fn new(operator_id: Uuid, operator_kind: OperatorKind) -> Self {
        Self {
            operator_id: Some(operator_id),
            operator_kind,
            client_address: None,
        }
    }

    /// Sets the client address.
    #[must_use]
    pub fn with_client_address(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }

    /// Attribution used when the caller supplied none.
    ///
    /// User-initiated kinds are attributed to the balance holder.
    #[must_use]
    pub fn default_for(kind: OperationKind, user_id: UserId) -> Self {
        let operator_kind = kind.default_operator();
        let operator_id = match operator_kind {
            OperatorKind::User => Some(user_id.into_inner()),
            OperatorKind::Admin | OperatorKind::System => None,
        };
        Self {
            operator_id,
            operator_kind,
            client_address: None,
        }
    }
}
