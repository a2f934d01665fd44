//! Payment status and saga stage definitions
//!
//! `PaymentStatus` is the externally visible lifecycle. `SagaStage` is the
//! persisted progress marker inside `PENDING`, used by recovery to know which
//! ledger leg may be in flight.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Payment lifecycle status
///
/// Terminal states: SUCCESS (1), FAILED (-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum PaymentStatus {
    /// Recorded, ledger legs not yet settled
    Pending = 0,
    /// Terminal: debit and credit both applied
    Success = 1,
    /// Terminal: transfer did not happen (or was compensated / escalated)
    Failed = -1,
}

impl PaymentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }

    /// Only PENDING may move, and only to a terminal status.
    #[inline]
    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        matches!(
            (self, to),
            (PaymentStatus::Pending, PaymentStatus::Success)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }

    /// Numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PaymentStatus::Pending),
            1 => Some(PaymentStatus::Success),
            -1 => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Saga progress inside PENDING
///
/// ```text
/// CREATED → DEBIT_PENDING → DEBITED → CREDIT_PENDING → CREDITED
///                                           ↓
///                                     COMPENSATING → COMPENSATED
/// ```
///
/// `*_PENDING` stages are written before the matching ledger call, so a
/// record found there after a crash means "outcome unknown, read the ledger".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum SagaStage {
    Created = 0,
    DebitPending = 10,
    /// Sender debited; funds are in flight until CREDITED or COMPENSATED
    Debited = 20,
    CreditPending = 30,
    Credited = 40,
    Compensating = -20,
    Compensated = -30,
}

impl SagaStage {
    /// Sender has been (or may have been) debited without a matching credit
    #[inline]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SagaStage::Debited | SagaStage::CreditPending | SagaStage::Compensating
        )
    }

    /// Legal forward moves of the saga
    pub fn can_advance_to(&self, to: SagaStage) -> bool {
        use SagaStage::*;
        matches!(
            (self, to),
            (Created, DebitPending)
                | (DebitPending, Debited)
                | (Debited, CreditPending)
                | (CreditPending, Credited)
                | (CreditPending, Compensating)
                | (Compensating, Compensated)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SagaStage::Created),
            10 => Some(SagaStage::DebitPending),
            20 => Some(SagaStage::Debited),
            30 => Some(SagaStage::CreditPending),
            40 => Some(SagaStage::Credited),
            -20 => Some(SagaStage::Compensating),
            -30 => Some(SagaStage::Compensated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStage::Created => "CREATED",
            SagaStage::DebitPending => "DEBIT_PENDING",
            SagaStage::Debited => "DEBITED",
            SagaStage::CreditPending => "CREDIT_PENDING",
            SagaStage::Credited => "CREDITED",
            SagaStage::Compensating => "COMPENSATING",
            SagaStage::Compensated => "COMPENSATED",
        }
    }
}

impl fmt::Display for SagaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_status() {
        assert!(PaymentStatus::Success.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Success));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Pending));
        assert!(!PaymentStatus::Success.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Success));
    }

    #[test]
    fn test_stage_advance_rules() {
        assert!(SagaStage::Created.can_advance_to(SagaStage::DebitPending));
        assert!(SagaStage::CreditPending.can_advance_to(SagaStage::Compensating));
        assert!(!SagaStage::Created.can_advance_to(SagaStage::Debited));
        assert!(!SagaStage::DebitPending.can_advance_to(SagaStage::Compensating));
        assert!(!SagaStage::Compensated.can_advance_to(SagaStage::Credited));
    }

    #[test]
    fn test_in_flight_stages() {
        assert!(SagaStage::Debited.is_in_flight());
        assert!(SagaStage::CreditPending.is_in_flight());
        assert!(SagaStage::Compensating.is_in_flight());
        assert!(!SagaStage::Created.is_in_flight());
        assert!(!SagaStage::Credited.is_in_flight());
        assert!(!SagaStage::Compensated.is_in_flight());
    }

    #[test]
    fn test_unknown_ids() {
        assert!(PaymentStatus::from_id(7).is_none());
        assert!(SagaStage::from_id(999).is_none());
        assert_eq!(SagaStage::from_id(-20), Some(SagaStage::Compensating));
    }

    #[test]
    fn test_display() {
        assert_eq!(PaymentStatus::Pending.to_string(), "PENDING");
        assert_eq!(SagaStage::CreditPending.to_string(), "CREDIT_PENDING");
    }
}
