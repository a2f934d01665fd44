//! Payment Orchestrator
//!
//! Drives one transfer through the saga:
//!
//! ```text
//! validate → idempotency lookup → resolve participants → create PENDING
//!   → debit → credit → SUCCESS
//!                 ↘ compensate → FAILED
//! ```
//!
//! Every stage is persisted (CAS) before the ledger call it guards, so a
//! crashed attempt can be resumed from the record alone via [`resume`].
//!
//! [`resume`]: PaymentOrchestrator::resume

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::clients::{
    AccountLedgerClient, AccountSnapshot, AdjustmentRef, AuditEntry, Customer,
    CustomerDirectoryClient, Leg, PaymentEvent, RemoteError, with_deadline,
};
use super::compensation::{CompensationCoordinator, CompensationOutcome};
use super::error::{Failure, FailureKind, PaymentError};
use super::legs::{LedgerLeg, LegOutcome};
use super::retry::RetryPolicy;
use super::side_effects::{SideEffect, SideEffectSender};
use super::state::{PaymentStatus, SagaStage};
use super::stats::PaymentStats;
use super::store::{PaymentRecordStore, StoreError};
use super::types::{AccountRef, CustomerId, IdempotencyKey, Payment, PaymentId, TransferRequest};

const AUDIT_SERVICE: &str = "PaymentService";
const AUDIT_ACTION: &str = "PAYMENT_PROCESSED";

/// Stage transitions one `drive` may make before giving up
const MAX_DRIVE_STEPS: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Largest accepted amount, minor units
    pub max_amount: u64,
    /// Deadline for every remote call
    pub remote_timeout_ms: u64,
    /// Re-read/retry rounds on a ledger version conflict
    pub max_cas_attempts: u32,
    /// How long a same-key replay waits for an in-flight attempt
    pub in_progress_wait_ms: u64,
    /// A PENDING record untouched this long may be taken over, by a
    /// replaying caller or by the recovery worker
    pub stale_after_ms: u64,
    pub compensation: RetryPolicy,
    pub reconciliation: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_amount: 1_000_000_000,
            remote_timeout_ms: 3_000,
            max_cas_attempts: 3,
            in_progress_wait_ms: 5_000,
            stale_after_ms: 60_000,
            compensation: RetryPolicy {
                max_attempts: 8,
                initial_backoff_ms: 100,
                max_backoff_ms: 5_000,
            },
            reconciliation: RetryPolicy::default(),
        }
    }
}

impl SagaConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Resolved participant: directory record plus a ledger snapshot
struct Participant {
    account: AccountRef,
    snapshot: AccountSnapshot,
}

pub struct PaymentOrchestrator {
    store: Arc<dyn PaymentRecordStore>,
    directory: Arc<dyn CustomerDirectoryClient>,
    ledger: Arc<dyn AccountLedgerClient>,
    legs: Arc<LedgerLeg>,
    compensation: CompensationCoordinator,
    side_effects: SideEffectSender,
    topic: String,
    stats: Arc<PaymentStats>,
    config: SagaConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn PaymentRecordStore>,
        directory: Arc<dyn CustomerDirectoryClient>,
        ledger: Arc<dyn AccountLedgerClient>,
        side_effects: SideEffectSender,
        topic: impl Into<String>,
        stats: Arc<PaymentStats>,
        config: SagaConfig,
    ) -> Self {
        let legs = Arc::new(LedgerLeg::new(
            ledger.clone(),
            config.remote_timeout(),
            config.max_cas_attempts,
            config.reconciliation.clone(),
            stats.clone(),
        ));
        let compensation = CompensationCoordinator::new(
            legs.clone(),
            store.clone(),
            config.compensation.clone(),
        );
        Self {
            store,
            directory,
            ledger,
            legs,
            compensation,
            side_effects,
            topic: topic.into(),
            stats,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn PaymentRecordStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<PaymentStats> {
        &self.stats
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Run a transfer to a terminal status
    ///
    /// `Ok` is always a SUCCESS payment. A FAILED payment is returned as the
    /// error its failure cause maps to; replays get the same result.
    pub async fn transfer(&self, req: TransferRequest) -> Result<Payment, PaymentError> {
        let (key, amount) = self.validate(&req)?;

        if let Some(existing) = self.store.get_by_idempotency_key(&key).await? {
            return self.replay(existing, &req, amount).await;
        }

        let sender = self.resolve(req.sender_id, "sender").await?;
        let receiver = self.resolve(req.receiver_id, "receiver").await?;
        if sender.account.account_id == receiver.account.account_id {
            return Err(PaymentError::InvalidRequest(format!(
                "sender and receiver share account {}",
                sender.account.account_id
            )));
        }

        let payment_id = PaymentId::new();
        let created = self
            .store
            .create(Payment::new(
                payment_id,
                key,
                sender.account,
                receiver.account,
                amount,
            ))
            .await?;

        if created.payment_id != payment_id {
            // A concurrent caller with the same key won the insert
            return self.replay(created, &req, amount).await;
        }

        info!(
            payment_id = %payment_id,
            sender_id = req.sender_id,
            receiver_id = req.receiver_id,
            amount,
            "Payment created"
        );

        let payment = self.drive(created, Some(sender.snapshot.version)).await?;
        Self::outcome(payment)
    }

    /// Continue a PENDING payment from its persisted stage
    ///
    /// Callers must hold the lease (fresh create or `claim_stale`).
    pub async fn resume(&self, payment: Payment) -> Result<Payment, PaymentError> {
        info!(payment_id = %payment.payment_id, stage = %payment.stage, "Resuming payment");
        self.drive(payment, None).await
    }

    pub async fn get(&self, payment_id: PaymentId) -> Result<Payment, PaymentError> {
        self.store
            .get(payment_id)
            .await?
            .ok_or_else(|| PaymentError::PaymentNotFound(payment_id.to_string()))
    }

    fn validate(&self, req: &TransferRequest) -> Result<(IdempotencyKey, u64), PaymentError> {
        if req.amount <= 0 {
            return Err(PaymentError::InvalidRequest(format!(
                "amount must be positive, got {}",
                req.amount
            )));
        }
        let amount = req.amount as u64;
        if amount > self.config.max_amount {
            return Err(PaymentError::InvalidRequest(format!(
                "amount {} exceeds maximum {}",
                amount, self.config.max_amount
            )));
        }
        if req.sender_id == req.receiver_id {
            return Err(PaymentError::InvalidRequest(
                "sender and receiver must differ".to_string(),
            ));
        }
        let key = IdempotencyKey::parse(&req.idempotency_key).map_err(PaymentError::InvalidRequest)?;
        Ok((key, amount))
    }

    async fn replay(
        &self,
        existing: Payment,
        req: &TransferRequest,
        amount: u64,
    ) -> Result<Payment, PaymentError> {
        if !existing.matches_request(req.sender_id, req.receiver_id, amount) {
            return Err(PaymentError::IdempotencyKeyReused(
                existing.idempotency_key.to_string(),
            ));
        }
        debug!(
            payment_id = %existing.payment_id,
            status = %existing.status,
            "Idempotent replay"
        );
        match existing.status {
            PaymentStatus::Pending => self.await_or_resume(existing).await,
            _ => Self::outcome(existing),
        }
    }

    /// Wait for a live attempt to finish, or take over an abandoned one
    async fn await_or_resume(&self, payment: Payment) -> Result<Payment, PaymentError> {
        let payment_id = payment.payment_id;
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.in_progress_wait_ms);
        let poll = Duration::from_millis(self.config.in_progress_wait_ms.clamp(1, 20));

        loop {
            if let Some(claimed) = self
                .store
                .claim_stale(payment_id, self.config.stale_after())
                .await?
            {
                let resumed = self.resume(claimed).await?;
                return Self::outcome(resumed);
            }

            let current = self.get(payment_id).await?;
            if current.status.is_terminal() {
                return Self::outcome(current);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PaymentError::failed(
                    Some(payment_id),
                    Failure::new(
                        FailureKind::ConflictOrRace,
                        format!("payment {} is still in progress", payment_id),
                    ),
                ));
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn resolve(&self, id: CustomerId, role: &str) -> Result<Participant, PaymentError> {
        let timeout = self.config.remote_timeout();
        let customer: Customer = with_deadline(timeout, self.directory.get_customer(id))
            .await
            .map_err(|e| lookup_failure(role, "customer", e))?;
        let snapshot = with_deadline(timeout, self.ledger.get_account(customer.account_id))
            .await
            .map_err(|e| lookup_failure(role, "account", e))?;

        Ok(Participant {
            account: AccountRef {
                customer_id: customer.id,
                account_id: customer.account_id,
                name: customer.name,
                account_number: customer.account_number,
                email: customer.email,
            },
            snapshot,
        })
    }

    /// Step the saga until the payment is terminal
    async fn drive(
        &self,
        mut payment: Payment,
        mut debit_version: Option<u64>,
    ) -> Result<Payment, PaymentError> {
        for _ in 0..MAX_DRIVE_STEPS {
            if payment.status.is_terminal() {
                return Ok(payment);
            }
            payment = match payment.stage {
                SagaStage::Created => {
                    let marked = self
                        .transition(&payment, SagaStage::DebitPending, None)
                        .await?;
                    if marked.stage != SagaStage::DebitPending {
                        marked
                    } else {
                        let outcome = self
                            .legs
                            .settle(
                                marked.sender.account_id,
                                -(marked.amount as i64),
                                AdjustmentRef::new(marked.payment_id, Leg::Debit),
                                debit_version.take(),
                            )
                            .await;
                        self.after_debit(marked, outcome).await?
                    }
                }
                SagaStage::DebitPending => {
                    let outcome = self
                        .legs
                        .resume(
                            payment.sender.account_id,
                            -(payment.amount as i64),
                            AdjustmentRef::new(payment.payment_id, Leg::Debit),
                        )
                        .await;
                    self.after_debit(payment, outcome).await?
                }
                SagaStage::Debited => {
                    let marked = self
                        .transition(&payment, SagaStage::CreditPending, None)
                        .await?;
                    if marked.stage != SagaStage::CreditPending {
                        marked
                    } else {
                        let outcome = self
                            .legs
                            .settle(
                                marked.receiver.account_id,
                                marked.amount as i64,
                                AdjustmentRef::new(marked.payment_id, Leg::Credit),
                                None,
                            )
                            .await;
                        self.after_credit(marked, outcome).await?
                    }
                }
                SagaStage::CreditPending => {
                    let outcome = self
                        .legs
                        .resume(
                            payment.receiver.account_id,
                            payment.amount as i64,
                            AdjustmentRef::new(payment.payment_id, Leg::Credit),
                        )
                        .await;
                    self.after_credit(payment, outcome).await?
                }
                SagaStage::Compensating => self.compensate(payment).await?,
                SagaStage::Compensated => {
                    let failure = payment.failure.clone().unwrap_or_else(|| {
                        Failure::new(FailureKind::RemoteUnavailable, "credit leg failed")
                    });
                    self.finalize_failed(payment, failure).await?
                }
                SagaStage::Credited => self.finalize_success(payment).await?,
            };
        }

        warn!(
            payment_id = %payment.payment_id,
            stage = %payment.stage,
            "Payment did not settle within step limit"
        );
        Err(PaymentError::failed(
            Some(payment.payment_id),
            Failure::new(
                FailureKind::ConflictOrRace,
                format!("payment {} still at stage {}", payment.payment_id, payment.stage),
            ),
        ))
    }

    async fn after_debit(
        &self,
        payment: Payment,
        outcome: LegOutcome,
    ) -> Result<Payment, PaymentError> {
        match outcome {
            LegOutcome::Applied(receipt) => {
                debug!(payment_id = %payment.payment_id, new_balance = receipt.new_balance, "Sender debited");
                self.transition(&payment, SagaStage::Debited, None).await
            }
            LegOutcome::Rejected(failure) => {
                info!(payment_id = %payment.payment_id, cause = %failure, "Debit rejected");
                self.finalize_failed(payment, failure).await
            }
            LegOutcome::Unknown(detail) => {
                let failure = Failure::new(
                    FailureKind::ReconciliationRequired,
                    format!("debit outcome unknown: {}", detail),
                );
                self.finalize_failed(payment, failure).await
            }
        }
    }

    async fn after_credit(
        &self,
        payment: Payment,
        outcome: LegOutcome,
    ) -> Result<Payment, PaymentError> {
        match outcome {
            LegOutcome::Applied(receipt) => {
                debug!(payment_id = %payment.payment_id, new_balance = receipt.new_balance, "Receiver credited");
                self.transition(&payment, SagaStage::Credited, None).await
            }
            LegOutcome::Rejected(failure) => {
                warn!(
                    payment_id = %payment.payment_id,
                    cause = %failure,
                    "Credit failed after debit, compensating"
                );
                self.transition(&payment, SagaStage::Compensating, Some(failure))
                    .await
            }
            // Refunding now could pay the sender back for money the receiver got
            LegOutcome::Unknown(detail) => {
                let failure = Failure::new(
                    FailureKind::ReconciliationRequired,
                    format!("credit outcome unknown after debit: {}", detail),
                );
                self.finalize_failed(payment, failure).await
            }
        }
    }

    async fn compensate(&self, payment: Payment) -> Result<Payment, PaymentError> {
        let cause = payment.failure.clone().unwrap_or_else(|| {
            Failure::new(FailureKind::RemoteUnavailable, "credit leg failed")
        });
        match self.compensation.refund(&payment).await {
            CompensationOutcome::Restored(receipt) => {
                self.stats.incr_compensations();
                info!(
                    payment_id = %payment.payment_id,
                    sender_balance = receipt.new_balance,
                    "Compensation complete"
                );
                self.transition(&payment, SagaStage::Compensated, None).await
            }
            CompensationOutcome::Unconfirmed(detail) => {
                self.finalize_failed(payment, cause.escalate(detail)).await
            }
            CompensationOutcome::Superseded => self.get(payment.payment_id).await,
        }
    }

    /// CAS the stage; on a miss return the persisted record instead
    async fn transition(
        &self,
        payment: &Payment,
        to: SagaStage,
        failure: Option<Failure>,
    ) -> Result<Payment, PaymentError> {
        match self
            .store
            .advance_stage(payment.payment_id, payment.stage, to, failure)
            .await
        {
            Ok(updated) => {
                debug!(payment_id = %payment.payment_id, from = %payment.stage, to = %to, "Stage advanced");
                Ok(updated)
            }
            Err(StoreError::InvalidTransition(reason)) => {
                warn!(payment_id = %payment.payment_id, reason = %reason, "Stage CAS missed, reloading");
                self.get(payment.payment_id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finalize(
        &self,
        payment: &Payment,
        to: PaymentStatus,
        failure: Option<Failure>,
    ) -> Result<Option<Payment>, PaymentError> {
        match self
            .store
            .update_status(payment.payment_id, PaymentStatus::Pending, to, failure)
            .await
        {
            Ok(updated) => Ok(Some(updated)),
            Err(StoreError::InvalidTransition(reason)) => {
                warn!(payment_id = %payment.payment_id, reason = %reason, "Status CAS missed");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finalize_success(&self, payment: Payment) -> Result<Payment, PaymentError> {
        let Some(done) = self.finalize(&payment, PaymentStatus::Success, None).await? else {
            return self.get(payment.payment_id).await;
        };

        self.stats.incr_succeeded();
        info!(payment_id = %done.payment_id, amount = done.amount, "Payment succeeded");

        self.side_effects.dispatch(SideEffect::Publish {
            topic: self.topic.clone(),
            event: PaymentEvent {
                payment_id: done.payment_id,
                sender_id: done.sender.customer_id,
                receiver_id: done.receiver.customer_id,
                receiver_email: done.receiver.email.clone(),
                amount: done.amount,
                status: done.status,
                timestamp: Utc::now(),
            },
        });
        self.side_effects
            .dispatch(SideEffect::Audit(audit_entry(&done, "Payment successful".to_string())));
        Ok(done)
    }

    async fn finalize_failed(
        &self,
        payment: Payment,
        failure: Failure,
    ) -> Result<Payment, PaymentError> {
        let remarks = format!("Payment failed: {}", failure);
        let escalated = failure.kind == FailureKind::ReconciliationRequired;
        let Some(done) = self
            .finalize(&payment, PaymentStatus::Failed, Some(failure))
            .await?
        else {
            return self.get(payment.payment_id).await;
        };

        self.stats.incr_failed();
        if escalated {
            self.stats.incr_reconciliation_required();
            error!(
                target: "alert",
                payment_id = %done.payment_id,
                sender_account = done.sender.account_id,
                receiver_account = done.receiver.account_id,
                amount = done.amount,
                "{}", remarks
            );
        } else {
            info!(payment_id = %done.payment_id, "{}", remarks);
        }

        self.side_effects
            .dispatch(SideEffect::Audit(audit_entry(&done, remarks)));
        Ok(done)
    }

    fn outcome(payment: Payment) -> Result<Payment, PaymentError> {
        match payment.status {
            PaymentStatus::Success => Ok(payment),
            PaymentStatus::Failed => Err(PaymentError::from_failed_payment(&payment)),
            PaymentStatus::Pending => Err(PaymentError::failed(
                Some(payment.payment_id),
                Failure::new(
                    FailureKind::ConflictOrRace,
                    format!("payment {} is still in progress", payment.payment_id),
                ),
            )),
        }
    }
}

fn lookup_failure(role: &str, what: &str, e: RemoteError) -> PaymentError {
    let kind = match e {
        RemoteError::NotFound(_) => FailureKind::NotFound,
        _ => FailureKind::RemoteUnavailable,
    };
    PaymentError::failed(None, Failure::new(kind, format!("{} {} lookup failed: {}", role, what, e)))
}

fn audit_entry(payment: &Payment, remarks: String) -> AuditEntry {
    AuditEntry {
        service: AUDIT_SERVICE.to_string(),
        action: AUDIT_ACTION.to_string(),
        reference_id: payment.payment_id.to_string(),
        user_id: payment.sender.customer_id,
        amount: payment.amount,
        status: payment.status,
        remarks,
        timestamp: Utc::now(),
    }
}
