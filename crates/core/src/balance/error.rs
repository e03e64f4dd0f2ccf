//! Balance operation error types.
//!
//! Errors fall into four categories that callers branch on:
//! business-rule rejections, retryable contention, invariant violations
//! (data corruption), and system failures.

use rust_decimal::Decimal;
use tally_shared::{AppError, types::UserId};
use thiserror::Error;

use crate::store::StoreError;

/// Broad class of a [`BalanceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Expected rejection; never retried automatically.
    Business,
    /// Lost a race or timed out on a lock; safe to retry.
    Contention,
    /// Stored data breaks a ledger invariant.
    Invariant,
    /// Storage or internal failure.
    System,
}

/// Errors that can occur during balance operations.
#[derive(Debug, Error)]
pub enum BalanceError {
    // ========== Input Errors ==========
    /// Amount is zero, has the wrong sign, has more than two decimal places,
    /// or exceeds the storable magnitude.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// A request string is longer than its stored column allows.
    #[error("{field} exceeds {max} characters")]
    FieldTooLong {
        /// Request field name.
        field: &'static str,
        /// Maximum accepted length in characters.
        max: usize,
    },

    // ========== Limit Errors ==========
    /// Recharge below the configured minimum.
    #[error("Recharge amount {amount} is below the minimum of {minimum}")]
    RechargeBelowMinimum {
        /// Requested amount.
        amount: Decimal,
        /// Configured minimum.
        minimum: Decimal,
    },

    /// Recharge above the configured single-recharge maximum.
    #[error("Recharge amount {amount} exceeds the maximum of {maximum}")]
    RechargeAboveMaximum {
        /// Requested amount.
        amount: Decimal,
        /// Configured maximum.
        maximum: Decimal,
    },

    /// Recharge would exceed the per-day total.
    #[error("Daily recharge limit of {limit} exceeded: {recharged} already recharged today, {requested} requested")]
    DailyRechargeLimitExceeded {
        /// Configured daily cap.
        limit: Decimal,
        /// Already recharged today.
        recharged: Decimal,
        /// Requested amount.
        requested: Decimal,
    },

    /// Credit would push available above the balance ceiling.
    #[error("Balance would reach {resulting}, exceeding the ceiling of {ceiling}")]
    OverCeiling {
        /// Configured ceiling.
        ceiling: Decimal,
        /// Available after the credit.
        resulting: Decimal,
    },

    /// A resulting field would exceed the storable money range.
    #[error("Balance for user {0} would leave the storable range")]
    BalanceOutOfRange(UserId),

    // ========== Sufficiency Errors ==========
    /// Not enough available funds.
    #[error("Insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance {
        /// Available funds.
        available: Decimal,
        /// Requested amount.
        requested: Decimal,
    },

    /// Not enough frozen funds.
    #[error("Insufficient frozen balance: {frozen} frozen, {requested} requested")]
    InsufficientFrozen {
        /// Frozen funds.
        frozen: Decimal,
        /// Requested amount.
        requested: Decimal,
    },

    /// Adjustment would make available negative.
    #[error("Adjustment of {adjustment} would make available balance {available} negative")]
    NegativeResult {
        /// Available funds.
        available: Decimal,
        /// Requested adjustment.
        adjustment: Decimal,
    },

    // ========== Concurrency Errors ==========
    /// Guard failed at write time after passing on the locked read.
    #[error("Concurrent modification of balance for user {0}, please retry")]
    ConcurrentModification(UserId),

    /// Row lock could not be acquired in time.
    #[error("Balance for user {0} is locked, please retry")]
    LockTimeout(UserId),

    // ========== Invariant Errors ==========
    /// Resulting row is negative or does not reconcile.
    #[error("Balance invariant violated for user {user_id}: {detail}")]
    InvariantViolation {
        /// Affected user.
        user_id: UserId,
        /// What was observed.
        detail: String,
    },

    // ========== System Errors ==========
    /// Storage failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BalanceError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::FieldTooLong { .. } => "FIELD_TOO_LONG",
            Self::RechargeBelowMinimum { .. } => "RECHARGE_BELOW_MINIMUM",
            Self::RechargeAboveMaximum { .. } => "RECHARGE_ABOVE_MAXIMUM",
            Self::DailyRechargeLimitExceeded { .. } => "DAILY_RECHARGE_LIMIT_EXCEEDED",
            Self::OverCeiling { .. } => "OVER_CEILING",
            Self::BalanceOutOfRange(_) => "BALANCE_OUT_OF_RANGE",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InsufficientFrozen { .. } => "INSUFFICIENT_FROZEN",
            Self::NegativeResult { .. } => "NEGATIVE_RESULT",
            Self::ConcurrentModification(_) => "CONCURRENT_MODIFICATION",
            Self::LockTimeout(_) => "LOCK_TIMEOUT",
            Self::InvariantViolation { .. } => "INVARIANT_VIOLATION",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the category callers branch on.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidAmount(_)
            | Self::FieldTooLong { .. }
            | Self::RechargeBelowMinimum { .. }
            | Self::RechargeAboveMaximum { .. }
            | Self::DailyRechargeLimitExceeded { .. }
            | Self::OverCeiling { .. }
            | Self::BalanceOutOfRange(_)
            | Self::InsufficientBalance { .. }
            | Self::InsufficientFrozen { .. }
            | Self::NegativeResult { .. } => ErrorCategory::Business,
            Self::ConcurrentModification(_) | Self::LockTimeout(_) => ErrorCategory::Contention,
            Self::InvariantViolation { .. } => ErrorCategory::Invariant,
            Self::Database(_) | Self::Internal(_) => ErrorCategory::System,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::Business => match self {
                Self::InvalidAmount(_) | Self::FieldTooLong { .. } => 400,
                _ => 422,
            },
            ErrorCategory::Contention => 409,
            ErrorCategory::Invariant | ErrorCategory::System => 500,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Contention
    }
}

impl From<StoreError> for BalanceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout(user_id) => Self::LockTimeout(user_id),
            StoreError::Conflict(user_id) => Self::ConcurrentModification(user_id),
            StoreError::Database(msg) => Self::Database(msg),
            StoreError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<BalanceError> for AppError {
    fn from(err: BalanceError) -> Self {
        let message = err.to_string();
        match err {
            BalanceError::InvalidAmount(_) | BalanceError::FieldTooLong { .. } => {
                Self::Validation(message)
            }
            BalanceError::ConcurrentModification(_) | BalanceError::LockTimeout(_) => {
                Self::Conflict(message)
            }
            BalanceError::InvariantViolation { .. } => Self::Integrity(message),
            BalanceError::Database(_) => Self::Database(message),
            BalanceError::Internal(_) => Self::Internal(message),
            _ => Self::BusinessRule(message),
        }
    }
}
