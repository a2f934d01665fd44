//! Payment error types
//!
//! Every remote or storage failure is classified into [`FailureKind`] before it
//! reaches a caller. Raw transport errors never leave this module's users.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::store::StoreError;
use super::types::{Payment, PaymentId};

/// Root-cause classification of a failed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Bad input, never touches remote state
    InvalidRequest,
    /// Unknown participant or account
    NotFound,
    /// Business rule: sender balance below amount
    InsufficientFunds,
    /// Transient remote failure, caller may retry
    RemoteUnavailable,
    /// Stale ledger state; retry the whole transfer
    ConflictOrRace,
    /// Compensation or outcome could not be confirmed; needs an operator
    ReconciliationRequired,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidRequest => "INVALID_REQUEST",
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            FailureKind::RemoteUnavailable => "REMOTE_UNAVAILABLE",
            FailureKind::ConflictOrRace => "CONFLICT_OR_RACE",
            FailureKind::ReconciliationRequired => "RECONCILIATION_REQUIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INVALID_REQUEST" => Some(FailureKind::InvalidRequest),
            "NOT_FOUND" => Some(FailureKind::NotFound),
            "INSUFFICIENT_FUNDS" => Some(FailureKind::InsufficientFunds),
            "REMOTE_UNAVAILABLE" => Some(FailureKind::RemoteUnavailable),
            "CONFLICT_OR_RACE" => Some(FailureKind::ConflictOrRace),
            "RECONCILIATION_REQUIRED" => Some(FailureKind::ReconciliationRequired),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted failure cause of a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Escalate a failure to the manual-reconciliation marker, keeping the cause
    pub fn escalate(self, reason: impl fmt::Display) -> Self {
        Self {
            kind: FailureKind::ReconciliationRequired,
            detail: format!("{} (original cause: {}: {})", reason, self.kind, self.detail),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

/// Errors returned by the payment orchestrator
#[derive(Error, Debug, Clone)]
pub enum PaymentError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient funds")]
    InsufficientFunds { payment_id: Option<PaymentId> },

    #[error("Payment failed ({cause}): {detail}")]
    PaymentFailed {
        payment_id: Option<PaymentId>,
        cause: FailureKind,
        detail: String,
    },

    #[error("Idempotency key reused with different parameters: {0}")]
    IdempotencyKeyReused(String),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    pub fn failed(payment_id: Option<PaymentId>, failure: Failure) -> Self {
        match failure.kind {
            FailureKind::InsufficientFunds => PaymentError::InsufficientFunds { payment_id },
            FailureKind::InvalidRequest => PaymentError::InvalidRequest(failure.detail),
            cause => PaymentError::PaymentFailed {
                payment_id,
                cause,
                detail: failure.detail,
            },
        }
    }

    /// Rebuild the caller-visible error of a FAILED payment
    pub fn from_failed_payment(payment: &Payment) -> Self {
        let failure = payment.failure.clone().unwrap_or_else(|| {
            Failure::new(FailureKind::RemoteUnavailable, "payment failed")
        });
        Self::failed(Some(payment.payment_id), failure)
    }

    /// Taxonomy kind of this error, if it maps to one
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            PaymentError::InvalidRequest(_) => Some(FailureKind::InvalidRequest),
            PaymentError::InsufficientFunds { .. } => Some(FailureKind::InsufficientFunds),
            PaymentError::PaymentFailed { cause, .. } => Some(*cause),
            PaymentError::IdempotencyKeyReused(_) => Some(FailureKind::InvalidRequest),
            PaymentError::PaymentNotFound(_) | PaymentError::Storage(_) => None,
        }
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        match self {
            PaymentError::InsufficientFunds { payment_id }
            | PaymentError::PaymentFailed { payment_id, .. } => *payment_id,
            _ => None,
        }
    }

    /// Error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            PaymentError::InvalidRequest(_) => "INVALID_REQUEST",
            PaymentError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            PaymentError::PaymentFailed { cause, .. } => cause.as_str(),
            PaymentError::IdempotencyKeyReused(_) => "IDEMPOTENCY_KEY_REUSED",
            PaymentError::PaymentNotFound(_) => "PAYMENT_NOT_FOUND",
            PaymentError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            PaymentError::InvalidRequest(_) => 400,
            PaymentError::InsufficientFunds { .. } => 422,
            PaymentError::PaymentNotFound(_) => 404,
            PaymentError::IdempotencyKeyReused(_) => 409,
            PaymentError::PaymentFailed { cause, .. } => match cause {
                FailureKind::InvalidRequest => 400,
                FailureKind::NotFound => 404,
                FailureKind::InsufficientFunds => 422,
                FailureKind::ConflictOrRace => 409,
                FailureKind::RemoteUnavailable => 503,
                FailureKind::ReconciliationRequired => 500,
            },
            PaymentError::Storage(_) => 500,
        }
    }
}

impl From<StoreError> for PaymentError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::IdempotencyConflict(key) => PaymentError::IdempotencyKeyReused(key),
            StoreError::NotFound(id) => PaymentError::PaymentNotFound(id),
            other => PaymentError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_maps_insufficient_funds_distinctly() {
        let err = PaymentError::failed(
            None,
            Failure::new(FailureKind::InsufficientFunds, "balance 100 < 500"),
        );
        assert!(matches!(err, PaymentError::InsufficientFunds { .. }));
        assert_eq!(err.http_status(), 422);
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_http_status_by_cause() {
        let unavailable = PaymentError::failed(
            None,
            Failure::new(FailureKind::RemoteUnavailable, "ledger down"),
        );
        assert_eq!(unavailable.http_status(), 503);

        let race = PaymentError::failed(None, Failure::new(FailureKind::ConflictOrRace, "stale"));
        assert_eq!(race.http_status(), 409);

        assert_eq!(PaymentError::InvalidRequest("x".into()).http_status(), 400);
    }

    #[test]
    fn test_escalate_keeps_cause() {
        let escalated = Failure::new(FailureKind::RemoteUnavailable, "credit rejected")
            .escalate("refund unconfirmed");
        assert_eq!(escalated.kind, FailureKind::ReconciliationRequired);
        assert!(escalated.detail.contains("refund unconfirmed"));
        assert!(escalated.detail.contains("credit rejected"));
    }

    #[test]
    fn test_failure_kind_parse() {
        for kind in [
            FailureKind::InvalidRequest,
            FailureKind::NotFound,
            FailureKind::InsufficientFunds,
            FailureKind::RemoteUnavailable,
            FailureKind::ConflictOrRace,
            FailureKind::ReconciliationRequired,
        ] {
            assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(FailureKind::parse("BOGUS"), None);
    }

    #[test]
    fn test_store_error_conversion() {
        let err: PaymentError = StoreError::IdempotencyConflict("key-1".into()).into();
        assert!(matches!(err, PaymentError::IdempotencyKeyReused(_)));
        assert_eq!(err.http_status(), 409);
    }
}
