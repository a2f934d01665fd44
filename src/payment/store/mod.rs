//! Payment record persistence
//!
//! The store is the only place coordination state lives. Same-key callers
//! serialize through:
//! - the unique idempotency key on `create`
//! - CAS on `advance_stage` / `update_status` (`from` must match persisted)
//! - the `claim_stale` lease, which lets exactly one caller take over an
//!   abandoned PENDING record

pub mod memory;
pub mod postgres;

pub use memory::InMemoryPaymentStore;
pub use postgres::PgPaymentStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use super::error::Failure;
use super::state::{PaymentStatus, SagaStage};
use super::types::{IdempotencyKey, Payment, PaymentId};

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Same idempotency key, different amount
    #[error("Idempotency key {0} already used with a different amount")]
    IdempotencyConflict(String),

    #[error("Payment not found: {0}")]
    NotFound(String),

    /// Persisted status/stage did not match the expected `from`
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[async_trait]
pub trait PaymentRecordStore: Send + Sync {
    /// Persist a new PENDING payment
    ///
    /// If the idempotency key already exists with the same amount, the prior
    /// record is returned instead (callers compare `payment_id`).
    async fn create(&self, payment: Payment) -> Result<Payment, StoreError>;

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Payment>, StoreError>;

    /// CAS the saga stage of a PENDING payment; `failure` is recorded if given
    async fn advance_stage(
        &self,
        id: PaymentId,
        from: SagaStage,
        to: SagaStage,
        failure: Option<Failure>,
    ) -> Result<Payment, StoreError>;

    /// CAS the status; fails with `InvalidTransition` if `from` is stale
    async fn update_status(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        failure: Option<Failure>,
    ) -> Result<Payment, StoreError>;

    /// Take a lease on a PENDING payment untouched for at least `older_than`
    ///
    /// Returns `None` if the record is terminal or was recently updated.
    async fn claim_stale(
        &self,
        id: PaymentId,
        older_than: Duration,
    ) -> Result<Option<Payment>, StoreError>;

    /// Renew the lease of a PENDING payment still at `stage`
    ///
    /// Returns `false` once the record has moved on (another driver owns it).
    async fn touch(&self, id: PaymentId, stage: SagaStage) -> Result<bool, StoreError>;

    /// PENDING payments untouched for at least `older_than`, oldest first
    async fn find_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<Payment>, StoreError>;
}

/// Timestamp before which a PENDING record counts as abandoned
pub(crate) fn stale_cutoff(older_than: Duration) -> DateTime<Utc> {
    let delta = TimeDelta::from_std(older_than).unwrap_or(TimeDelta::MAX);
    Utc::now()
        .checked_sub_signed(delta)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn check_status_transition(
    id: PaymentId,
    persisted: PaymentStatus,
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<(), StoreError> {
    if persisted != from {
        return Err(StoreError::InvalidTransition(format!(
            "payment {} is {}, expected {}",
            id, persisted, from
        )));
    }
    if !from.can_transition_to(to) {
        return Err(StoreError::InvalidTransition(format!(
            "payment {}: {} -> {} not allowed",
            id, from, to
        )));
    }
    Ok(())
}

pub(crate) fn check_stage_transition(
    payment: &Payment,
    from: SagaStage,
    to: SagaStage,
) -> Result<(), StoreError> {
    if payment.status != PaymentStatus::Pending {
        return Err(StoreError::InvalidTransition(format!(
            "payment {} already {}",
            payment.payment_id, payment.status
        )));
    }
    if payment.stage != from {
        return Err(StoreError::InvalidTransition(format!(
            "payment {} at stage {}, expected {}",
            payment.payment_id, payment.stage, from
        )));
    }
    if !from.can_advance_to(to) {
        return Err(StoreError::InvalidTransition(format!(
            "payment {}: stage {} -> {} not allowed",
            payment.payment_id, from, to
        )));
    }
    Ok(())
}
