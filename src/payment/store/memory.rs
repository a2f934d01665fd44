//! In-memory payment store
//!
//! DashMap-backed. Each mutation holds the shard lock of its record for the
//! whole check-and-set, which gives the same CAS semantics as the SQL store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::{
    PaymentRecordStore, StoreError, check_stage_transition, check_status_transition, stale_cutoff,
};
use crate::payment::error::Failure;
use crate::payment::state::{PaymentStatus, SagaStage};
use crate::payment::types::{IdempotencyKey, Payment, PaymentId};

#[derive(Default)]
pub struct InMemoryPaymentStore {
    payments: DashMap<PaymentId, Payment>,
    by_key: DashMap<IdempotencyKey, PaymentId>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.payments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payments.is_empty()
    }

    /// Shift a record's `updated_at` into the past (crash simulation in tests)
    #[cfg(test)]
    pub fn backdate(&self, id: PaymentId, by: Duration) {
        if let Some(mut payment) = self.payments.get_mut(&id) {
            payment.updated_at -= chrono::TimeDelta::from_std(by).unwrap();
        }
    }

    /// Overwrite a record's stage directly (crash simulation in tests)
    #[cfg(test)]
    pub fn force_stage(&self, id: PaymentId, stage: SagaStage) {
        if let Some(mut payment) = self.payments.get_mut(&id) {
            payment.stage = stage;
        }
    }
}

#[async_trait]
impl PaymentRecordStore for InMemoryPaymentStore {
    async fn create(&self, payment: Payment) -> Result<Payment, StoreError> {
        match self.by_key.entry(payment.idempotency_key.clone()) {
            Entry::Occupied(entry) => {
                let existing = self
                    .payments
                    .get(entry.get())
                    .map(|p| p.clone())
                    .ok_or_else(|| StoreError::Corrupt(format!("dangling key {}", entry.key())))?;

                if existing.amount != payment.amount {
                    return Err(StoreError::IdempotencyConflict(
                        payment.idempotency_key.to_string(),
                    ));
                }
                debug!(
                    payment_id = %existing.payment_id,
                    key = %payment.idempotency_key,
                    "Idempotency key exists - returning prior record"
                );
                Ok(existing)
            }
            Entry::Vacant(entry) => {
                self.payments.insert(payment.payment_id, payment.clone());
                entry.insert(payment.payment_id);
                info!(payment_id = %payment.payment_id, "Payment created");
                Ok(payment)
            }
        }
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.payments.get(&id).map(|p| p.clone()))
    }

    async fn get_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Payment>, StoreError> {
        let Some(id) = self.by_key.get(key).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.payments.get(&id).map(|p| p.clone()))
    }

    async fn advance_stage(
        &self,
        id: PaymentId,
        from: SagaStage,
        to: SagaStage,
        failure: Option<Failure>,
    ) -> Result<Payment, StoreError> {
        let mut payment = self
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        check_stage_transition(&payment, from, to)?;

        payment.stage = to;
        if failure.is_some() {
            payment.failure = failure;
        }
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn update_status(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        failure: Option<Failure>,
    ) -> Result<Payment, StoreError> {
        let mut payment = self
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        check_status_transition(id, payment.status, from, to)?;

        let now = Utc::now();
        payment.status = to;
        if failure.is_some() {
            payment.failure = failure;
        }
        payment.updated_at = now;
        payment.finalized_at = Some(now);
        Ok(payment.clone())
    }

    async fn claim_stale(
        &self,
        id: PaymentId,
        older_than: Duration,
    ) -> Result<Option<Payment>, StoreError> {
        let mut payment = self
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if payment.status != PaymentStatus::Pending || payment.updated_at > stale_cutoff(older_than)
        {
            return Ok(None);
        }
        payment.updated_at = Utc::now();
        Ok(Some(payment.clone()))
    }

    async fn touch(&self, id: PaymentId, stage: SagaStage) -> Result<bool, StoreError> {
        let mut payment = self
            .payments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if payment.status != PaymentStatus::Pending || payment.stage != stage {
            return Ok(false);
        }
        payment.updated_at = Utc::now();
        Ok(true)
    }

    async fn find_stale(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<Payment>, StoreError> {
        let cutoff = stale_cutoff(older_than);
        let mut stale: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Pending && p.updated_at <= cutoff)
            .map(|p| p.clone())
            .collect();
        stale.sort_by_key(|p| p.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::error::FailureKind;
    use crate::payment::types::fixtures::pending_payment;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryPaymentStore::new();
        let payment = pending_payment("k1", 200);
        let created = store.create(payment.clone()).await.unwrap();
        assert_eq!(created, payment);

        let by_id = store.get(payment.payment_id).await.unwrap().unwrap();
        assert_eq!(by_id.payment_id, payment.payment_id);

        let by_key = store
            .get_by_idempotency_key(&payment.idempotency_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_key.payment_id, payment.payment_id);
    }

    #[tokio::test]
    async fn test_create_same_key_same_amount_returns_prior() {
        let store = InMemoryPaymentStore::new();
        let first = store.create(pending_payment("dup", 200)).await.unwrap();
        let second = store.create(pending_payment("dup", 200)).await.unwrap();
        assert_eq!(first.payment_id, second.payment_id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_create_same_key_different_amount_conflicts() {
        let store = InMemoryPaymentStore::new();
        store.create(pending_payment("dup", 200)).await.unwrap();
        let result = store.create(pending_payment("dup", 300)).await;
        assert!(matches!(result, Err(StoreError::IdempotencyConflict(_))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_status_guards_from_status() {
        let store = InMemoryPaymentStore::new();
        let payment = store.create(pending_payment("k2", 50)).await.unwrap();
        let id = payment.payment_id;

        let done = store
            .update_status(id, PaymentStatus::Pending, PaymentStatus::Success, None)
            .await
            .unwrap();
        assert_eq!(done.status, PaymentStatus::Success);
        assert!(done.finalized_at.is_some());

        // Second finalization (concurrent retry) must lose
        let again = store
            .update_status(
                id,
                PaymentStatus::Pending,
                PaymentStatus::Failed,
                Some(Failure::new(FailureKind::RemoteUnavailable, "late")),
            )
            .await;
        assert!(matches!(again, Err(StoreError::InvalidTransition(_))));
        let persisted = store.get(id).await.unwrap().unwrap();
        assert_eq!(persisted.status, PaymentStatus::Success);
        assert!(persisted.failure.is_none());
    }

    #[tokio::test]
    async fn test_advance_stage_cas() {
        let store = InMemoryPaymentStore::new();
        let payment = store.create(pending_payment("k3", 50)).await.unwrap();
        let id = payment.payment_id;

        let p = store
            .advance_stage(id, SagaStage::Created, SagaStage::DebitPending, None)
            .await
            .unwrap();
        assert_eq!(p.stage, SagaStage::DebitPending);

        let lost = store
            .advance_stage(id, SagaStage::Created, SagaStage::DebitPending, None)
            .await;
        assert!(matches!(lost, Err(StoreError::InvalidTransition(_))));

        let skipped = store
            .advance_stage(id, SagaStage::DebitPending, SagaStage::Credited, None)
            .await;
        assert!(matches!(skipped, Err(StoreError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_advance_stage_records_failure() {
        let store = InMemoryPaymentStore::new();
        let payment = store.create(pending_payment("k4", 50)).await.unwrap();
        store.force_stage(payment.payment_id, SagaStage::CreditPending);

        let p = store
            .advance_stage(
                payment.payment_id,
                SagaStage::CreditPending,
                SagaStage::Compensating,
                Some(Failure::new(FailureKind::NotFound, "receiver account gone")),
            )
            .await
            .unwrap();
        assert_eq!(p.failure.unwrap().kind, FailureKind::NotFound);
    }

    #[tokio::test]
    async fn test_claim_stale_is_a_lease() {
        let store = InMemoryPaymentStore::new();
        let payment = store.create(pending_payment("k5", 50)).await.unwrap();
        let id = payment.payment_id;
        let threshold = Duration::from_secs(60);

        // Fresh record is not claimable
        assert!(store.claim_stale(id, threshold).await.unwrap().is_none());

        store.backdate(id, Duration::from_secs(120));
        assert!(store.claim_stale(id, threshold).await.unwrap().is_some());
        // Claim bumped updated_at: second claimer loses
        assert!(store.claim_stale(id, threshold).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_touch_renews_only_matching_stage() {
        let store = InMemoryPaymentStore::new();
        let payment = store.create(pending_payment("k6", 50)).await.unwrap();
        let id = payment.payment_id;
        let threshold = Duration::from_secs(60);

        store.backdate(id, Duration::from_secs(120));
        assert!(store.touch(id, SagaStage::Created).await.unwrap());
        assert!(store.claim_stale(id, threshold).await.unwrap().is_none());

        assert!(!store.touch(id, SagaStage::Compensating).await.unwrap());
        assert!(matches!(
            store.touch(PaymentId::new(), SagaStage::Created).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_find_stale_skips_terminal_and_fresh() {
        let store = InMemoryPaymentStore::new();
        let stale = store.create(pending_payment("old", 10)).await.unwrap();
        let fresh = store.create(pending_payment("new", 10)).await.unwrap();
        let done = store.create(pending_payment("done", 10)).await.unwrap();
        store
            .update_status(done.payment_id, PaymentStatus::Pending, PaymentStatus::Success, None)
            .await
            .unwrap();

        store.backdate(stale.payment_id, Duration::from_secs(300));
        store.backdate(done.payment_id, Duration::from_secs(300));

        let found = store.find_stale(Duration::from_secs(60), 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payment_id, stale.payment_id);
        assert_ne!(found[0].payment_id, fresh.payment_id);
    }
}
