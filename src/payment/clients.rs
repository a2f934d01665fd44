//! Collaborator contracts
//!
//! The orchestrator only talks to remote services through these traits.
//! Implementations live in [`super::adapters`].

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::state::PaymentStatus;
use super::types::{AccountId, CustomerId, PaymentId};

/// Failure of a single remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conditional update lost against a newer version
    #[error("Version conflict: {0}")]
    Conflict(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// No answer within the deadline; the call may or may not have applied
    #[error("Timed out")]
    Timeout,
}

/// Customer record from the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub account_number: String,
    pub email: String,
    pub account_id: AccountId,
}

/// Point-in-time account state from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub balance: u64,
    /// Monotonic version, bumped by every applied adjustment
    pub version: u64,
}

/// Which leg of a payment an adjustment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Leg {
    Debit,
    Credit,
    Refund,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Debit => "DEBIT",
            Leg::Credit => "CREDIT",
            Leg::Refund => "REFUND",
        }
    }
}

/// Reference attached to every ledger mutation, used by reconciliation reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjustmentRef {
    pub payment_id: PaymentId,
    pub leg: Leg,
}

impl AdjustmentRef {
    pub fn new(payment_id: PaymentId, leg: Leg) -> Self {
        Self { payment_id, leg }
    }
}

impl fmt::Display for AdjustmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.payment_id, self.leg.as_str())
    }
}

/// Conditional balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustRequest {
    pub account_id: AccountId,
    /// Negative = debit, positive = credit
    pub delta: i64,
    /// Rejected with `Conflict` unless the account is at this version
    pub expected_version: u64,
    pub reference: AdjustmentRef,
}

/// Result of an applied adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustReceipt {
    pub new_balance: u64,
    pub version: u64,
}

/// Audit record sent to the audit service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub service: String,
    pub action: String,
    pub reference_id: String,
    pub user_id: CustomerId,
    pub amount: u64,
    pub status: PaymentStatus,
    pub remarks: String,
    pub timestamp: DateTime<Utc>,
}

/// Domain event published when a payment settles
///
/// Subscribers deduplicate on `payment_id` (at-least-once delivery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub payment_id: PaymentId,
    pub sender_id: CustomerId,
    pub receiver_id: CustomerId,
    pub receiver_email: String,
    pub amount: u64,
    pub status: PaymentStatus,
    pub timestamp: DateTime<Utc>,
}

/// Run a remote call under a deadline; elapsed maps to [`RemoteError::Timeout`]
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout),
    }
}

#[async_trait]
pub trait CustomerDirectoryClient: Send + Sync {
    async fn get_customer(&self, id: CustomerId) -> Result<Customer, RemoteError>;
}

/// Account ledger operations
///
/// `conditional_adjust` must apply atomically against `expected_version`.
#[async_trait]
pub trait AccountLedgerClient: Send + Sync {
    async fn get_account(&self, id: AccountId) -> Result<AccountSnapshot, RemoteError>;

    async fn conditional_adjust(&self, req: AdjustRequest) -> Result<AdjustReceipt, RemoteError>;

    /// Reconciliation read: was the adjustment with this reference applied?
    async fn find_adjustment(
        &self,
        account_id: AccountId,
        reference: AdjustmentRef,
    ) -> Result<Option<AdjustReceipt>, RemoteError>;
}

#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(&self, entry: AuditEntry) -> Result<(), RemoteError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: PaymentEvent) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_maps_elapsed_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, RemoteError>(1)
        };
        assert_eq!(
            with_deadline(Duration::from_millis(10), slow).await,
            Err(RemoteError::Timeout)
        );

        let fast = async { Ok::<_, RemoteError>(7) };
        assert_eq!(with_deadline(Duration::from_secs(1), fast).await, Ok(7));
    }

    #[test]
    fn test_adjustment_ref_display() {
        let id = PaymentId::new();
        let reference = AdjustmentRef::new(id, Leg::Refund);
        assert_eq!(reference.to_string(), format!("{}-REFUND", id));
    }
}
