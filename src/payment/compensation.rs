//! Compensation: refund the sender after a debit whose credit did not land
//!
//! The refund carries its own adjustment reference, so every attempt first
//! checks whether an earlier attempt (possibly from a crashed process)
//! already applied it. A refund is never applied twice.
//!
//! Compensation can outlive the stale threshold, so each attempt renews the
//! record's lease; the recovery worker never claims a refund still in progress.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::clients::{AdjustReceipt, AdjustmentRef, Leg};
use super::legs::{LedgerLeg, LegOutcome};
use super::retry::RetryPolicy;
use super::state::SagaStage;
use super::store::PaymentRecordStore;
use super::types::Payment;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// Sender balance restored
    Restored(AdjustReceipt),
    /// Retries exhausted without a confirmed refund
    Unconfirmed(String),
    /// The record left COMPENSATING; another driver owns it now
    Superseded,
}

pub struct CompensationCoordinator {
    leg: Arc<LedgerLeg>,
    store: Arc<dyn PaymentRecordStore>,
    policy: RetryPolicy,
}

impl CompensationCoordinator {
    pub fn new(leg: Arc<LedgerLeg>, store: Arc<dyn PaymentRecordStore>, policy: RetryPolicy) -> Self {
        Self { leg, store, policy }
    }

    /// Bump `updated_at` so the payment is not taken for abandoned
    async fn renew_lease(&self, payment: &Payment) -> bool {
        match self.store.touch(payment.payment_id, SagaStage::Compensating).await {
            Ok(held) => held,
            Err(e) => {
                // A store hiccup must not stall the refund itself
                warn!(payment_id = %payment.payment_id, error = %e, "Lease renewal failed");
                true
            }
        }
    }

    /// Credit `payment.amount` back to the sender account
    pub async fn refund(&self, payment: &Payment) -> CompensationOutcome {
        let account_id = payment.sender.account_id;
        let reference = AdjustmentRef::new(payment.payment_id, Leg::Refund);
        let delta = payment.amount as i64;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if !self.renew_lease(payment).await {
                debug!(payment_id = %payment.payment_id, attempt, "Compensation lease lost");
                return CompensationOutcome::Superseded;
            }
            match self.leg.lookup(account_id, reference).await {
                Ok(Some(receipt)) => {
                    info!(payment_id = %payment.payment_id, attempt, "Refund already applied");
                    return CompensationOutcome::Restored(receipt);
                }
                Ok(None) => match self.leg.apply(account_id, delta, reference, None).await {
                    LegOutcome::Applied(receipt) => {
                        info!(
                            payment_id = %payment.payment_id,
                            attempt,
                            new_balance = receipt.new_balance,
                            "Sender refunded"
                        );
                        return CompensationOutcome::Restored(receipt);
                    }
                    LegOutcome::Rejected(failure) => last_error = failure.to_string(),
                    // Resolved by the lookup at the top of the next attempt
                    LegOutcome::Unknown(detail) => last_error = detail,
                },
                Err(e) => last_error = format!("refund lookup failed: {}", e),
            }

            warn!(
                payment_id = %payment.payment_id,
                attempt,
                max_attempts,
                error = %last_error,
                "Refund attempt failed"
            );
            if attempt < max_attempts {
                self.policy.sleep(attempt).await;
            }
        }

        // The last attempt may have been an unknown outcome
        if let Ok(Some(receipt)) = self.leg.lookup(account_id, reference).await {
            return CompensationOutcome::Restored(receipt);
        }

        CompensationOutcome::Unconfirmed(format!(
            "refund of {} to account {} not confirmed after {} attempts: {}",
            payment.amount, account_id, max_attempts, last_error
        ))
    }
}
