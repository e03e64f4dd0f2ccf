//! Alert domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{AlertId, UserId};

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Single recharge at or above the threshold.
    LargeRecharge,
    /// Single consume at or above the threshold.
    LargeConsume,
    /// Too many recharges in the trailing hour.
    FrequentRecharge,
    /// Too many consumes in the trailing hour.
    FrequentConsume,
    /// A pocket was observed below zero.
    NegativeBalance,
    /// Held funds do not reconcile with lifetime totals.
    BalanceMismatch,
    /// Large staff adjustment or gift.
    LargeAdminAdjust,
    /// An expected unfreeze or deduct-frozen failed.
    UnfreezeFailure,
    /// Refund issued outside the order cancellation path.
    RefundAnomaly,
}

impl AlertKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::LargeRecharge,
        Self::LargeConsume,
        Self::FrequentRecharge,
        Self::FrequentConsume,
        Self::NegativeBalance,
        Self::BalanceMismatch,
        Self::LargeAdminAdjust,
        Self::UnfreezeFailure,
        Self::RefundAnomaly,
    ];

    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LargeRecharge => "large_recharge",
            Self::LargeConsume => "large_consume",
            Self::FrequentRecharge => "frequent_recharge",
            Self::FrequentConsume => "frequent_consume",
            Self::NegativeBalance => "negative_balance",
            Self::BalanceMismatch => "balance_mismatch",
            Self::LargeAdminAdjust => "large_admin_adjust",
            Self::UnfreezeFailure => "unfreeze_failure",
            Self::RefundAnomaly => "refund_anomaly",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown alert kind: {s}"))
    }
}

/// How urgently an alert needs triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Suspicious but possibly legitimate.
    Warning,
    /// Data corruption or bookkeeping drift.
    Critical,
}

impl AlertSeverity {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown alert severity: {s}")),
        }
    }
}

/// Triage state of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Not yet looked at.
    Pending,
    /// Seen by staff.
    Acknowledged,
}

impl AlertStatus {
    /// Returns the storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "acknowledged" => Ok(Self::Acknowledged),
            _ => Err(format!("Unknown alert status: {s}")),
        }
    }
}

/// A fraud or integrity alert raised by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier.
    pub id: AlertId,
    /// User the alert concerns.
    pub user_id: UserId,
    /// Detector that raised it.
    pub kind: AlertKind,
    /// Urgency.
    pub severity: AlertSeverity,
    /// One-line summary.
    pub title: String,
    /// Human-readable detail.
    pub body: String,
    /// Amount that triggered the alert, if any.
    pub related_amount: Option<Decimal>,
    /// Order or recharge number, if any.
    pub related_correlation_id: Option<String>,
    /// Client address of the triggering request, if known.
    pub client_address: Option<String>,
    /// Triage state.
    pub status: AlertStatus,
    /// Detector-specific figures (thresholds, counts, gaps).
    pub metadata: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Creates a pending alert.
    #[must_use]
    pub fn new(
        user_id: UserId,
        kind: AlertKind,
        severity: AlertSeverity,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: AlertId::new(),
            user_id,
            kind,
            severity,
            title: title.into(),
            body: body.into(),
            related_amount: None,
            related_correlation_id: None,
            client_address: None,
            status: AlertStatus::Pending,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Sets the related amount.
    #[must_use]
    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.related_amount = Some(amount);
        self
    }

    /// Sets the related correlation id.
    #[must_use]
    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.related_correlation_id = correlation_id;
        self
    }

    /// Sets the client address.
    #[must_use]
    pub fn with_client_address(mut self, address: Option<String>) -> Self {
        self.client_address = address;
        self
    }

    /// Sets detector metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns true if nobody has acknowledged the alert.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == AlertStatus::Pending
    }
}
