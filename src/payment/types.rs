//! Payment Core Types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;

use super::error::Failure;
use super::state::{PaymentStatus, SagaStage};

/// Customer identifier in the customer directory
pub type CustomerId = u64;

/// Account identifier in the account ledger
pub type AccountId = u64;

/// Maximum accepted idempotency key length
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Payment ID - ULID-based, sortable, no coordination needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentId(ulid::Ulid);

impl PaymentId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PaymentId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for PaymentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PaymentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Caller-supplied token identifying one logical transfer attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate and wrap a raw key (non-empty, bounded, no control chars)
    pub fn parse(raw: &str) -> Result<Self, String> {
        let key = raw.trim();
        if key.is_empty() {
            return Err("idempotency key must not be empty".to_string());
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(format!(
                "idempotency key exceeds {} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            ));
        }
        if key.chars().any(char::is_control) {
            return Err("idempotency key contains control characters".to_string());
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity snapshot of one participant, frozen at payment creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccountRef {
    pub customer_id: CustomerId,
    pub account_id: AccountId,
    pub name: String,
    pub account_number: String,
    pub email: String,
}

/// Transfer request from the entry point
///
/// `amount` is signed so that non-positive input can be rejected explicitly.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender_id: CustomerId,
    pub receiver_id: CustomerId,
    /// Amount in minor units (e.g. cents)
    pub amount: i64,
    pub idempotency_key: String,
}

impl TransferRequest {
    pub fn new(
        sender_id: CustomerId,
        receiver_id: CustomerId,
        amount: i64,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            sender_id,
            receiver_id,
            amount,
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// Payment record: the unit of work and its audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    #[schema(value_type = String, example = "01J9ZQ6W0XK8N8V4T5Q2M3R7AB")]
    pub payment_id: PaymentId,
    #[schema(value_type = String, example = "order-4711")]
    pub idempotency_key: IdempotencyKey,
    pub sender: AccountRef,
    pub receiver: AccountRef,
    /// Minor units, always > 0
    pub amount: u64,
    pub status: PaymentStatus,
    pub stage: SagaStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Create a new payment in PENDING / CREATED
    pub fn new(
        payment_id: PaymentId,
        idempotency_key: IdempotencyKey,
        sender: AccountRef,
        receiver: AccountRef,
        amount: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            payment_id,
            idempotency_key,
            sender,
            receiver,
            amount,
            status: PaymentStatus::Pending,
            stage: SagaStage::Created,
            failure: None,
            created_at: now,
            updated_at: now,
            finalized_at: None,
        }
    }

    /// FAILED with the manual-reconciliation marker
    pub fn requires_manual_reconciliation(&self) -> bool {
        self.status == PaymentStatus::Failed
            && self
                .failure
                .as_ref()
                .is_some_and(|f| f.kind == super::error::FailureKind::ReconciliationRequired)
    }

    /// Whether a replayed request describes the same logical transfer
    pub fn matches_request(&self, sender_id: CustomerId, receiver_id: CustomerId, amount: u64) -> bool {
        self.sender.customer_id == sender_id
            && self.receiver.customer_id == receiver_id
            && self.amount == amount
    }
}

impl fmt::Display for Payment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Payment[{}] {} -> {} amount={} status={} stage={}",
            self.payment_id,
            self.sender.customer_id,
            self.receiver.customer_id,
            self.amount,
            self.status,
            self.stage
        )
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn account_ref(customer_id: CustomerId, account_id: AccountId) -> AccountRef {
        AccountRef {
            customer_id,
            account_id,
            name: format!("Customer {}", customer_id),
            account_number: format!("ACC-{:06}", account_id),
            email: format!("customer{}@example.com", customer_id),
        }
    }

    pub fn pending_payment(key: &str, amount: u64) -> Payment {
        Payment::new(
            PaymentId::new(),
            IdempotencyKey::parse(key).unwrap(),
            account_ref(1, 101),
            account_ref(2, 102),
            amount,
        )
    }
}
