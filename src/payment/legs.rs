//! Ledger leg executor
//!
//! Runs one conditional balance mutation (debit, credit or refund) and
//! classifies the result. Two rules:
//!
//! 1. **CAS retry**: a version conflict is a definitive "not applied", so the
//!    account is re-read and the adjust retried, up to `max_cas_attempts`.
//! 2. **Never guess**: a timeout or transport failure means the mutation may
//!    have landed. The outcome is resolved with a reconciliation read on the
//!    adjustment reference before anyone decides to compensate.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::clients::{
    AccountLedgerClient, AdjustReceipt, AdjustRequest, AdjustmentRef, RemoteError, with_deadline,
};
use super::error::{Failure, FailureKind};
use super::retry::RetryPolicy;
use super::stats::PaymentStats;
use super::types::AccountId;

/// Classified outcome of a ledger mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegOutcome {
    Applied(AdjustReceipt),
    /// Definitively not applied
    Rejected(Failure),
    /// Could not determine whether the mutation landed
    Unknown(String),
}

pub struct LedgerLeg {
    ledger: Arc<dyn AccountLedgerClient>,
    timeout: Duration,
    max_cas_attempts: u32,
    reconciliation: RetryPolicy,
    stats: Arc<PaymentStats>,
}

impl LedgerLeg {
    pub fn new(
        ledger: Arc<dyn AccountLedgerClient>,
        timeout: Duration,
        max_cas_attempts: u32,
        reconciliation: RetryPolicy,
        stats: Arc<PaymentStats>,
    ) -> Self {
        Self {
            ledger,
            timeout,
            max_cas_attempts: max_cas_attempts.max(1),
            reconciliation,
            stats,
        }
    }

    /// Apply `delta` once; `Unknown` is returned as-is
    ///
    /// `expected_version` seeds the first CAS attempt (e.g. from the snapshot
    /// read during participant resolution); later attempts re-read the account.
    pub async fn apply(
        &self,
        account_id: AccountId,
        delta: i64,
        reference: AdjustmentRef,
        mut expected_version: Option<u64>,
    ) -> LegOutcome {
        for attempt in 1..=self.max_cas_attempts {
            let version = match expected_version.take() {
                Some(v) => v,
                None => match with_deadline(self.timeout, self.ledger.get_account(account_id)).await
                {
                    Ok(snapshot) => snapshot.version,
                    Err(RemoteError::NotFound(msg)) => {
                        return LegOutcome::Rejected(Failure::new(
                            FailureKind::NotFound,
                            format!("account {}: {}", account_id, msg),
                        ));
                    }
                    // Nothing was sent in this attempt, so nothing can have applied
                    Err(e) => {
                        return LegOutcome::Rejected(Failure::new(
                            FailureKind::RemoteUnavailable,
                            format!("account {} read failed: {}", account_id, e),
                        ));
                    }
                },
            };

            let req = AdjustRequest {
                account_id,
                delta,
                expected_version: version,
                reference,
            };
            match with_deadline(self.timeout, self.ledger.conditional_adjust(req)).await {
                Ok(receipt) => {
                    debug!(
                        reference = %reference,
                        account_id,
                        delta,
                        new_balance = receipt.new_balance,
                        "Ledger adjustment applied"
                    );
                    return LegOutcome::Applied(receipt);
                }
                Err(RemoteError::Conflict(msg)) => {
                    debug!(
                        reference = %reference,
                        attempt,
                        expected_version = version,
                        "Ledger version conflict: {}",
                        msg
                    );
                }
                Err(RemoteError::InsufficientFunds) => {
                    return LegOutcome::Rejected(Failure::new(
                        FailureKind::InsufficientFunds,
                        format!("account {} cannot cover {}", account_id, delta.unsigned_abs()),
                    ));
                }
                Err(RemoteError::NotFound(msg)) => {
                    return LegOutcome::Rejected(Failure::new(
                        FailureKind::NotFound,
                        format!("account {}: {}", account_id, msg),
                    ));
                }
                Err(e @ (RemoteError::Timeout | RemoteError::Unavailable(_))) => {
                    warn!(reference = %reference, error = %e, "Ledger adjustment outcome unknown");
                    return LegOutcome::Unknown(e.to_string());
                }
            }
        }

        LegOutcome::Rejected(Failure::new(
            FailureKind::ConflictOrRace,
            format!(
                "account {} changed concurrently on {} attempts",
                account_id, self.max_cas_attempts
            ),
        ))
    }

    /// Single reconciliation read, no retry
    pub async fn lookup(
        &self,
        account_id: AccountId,
        reference: AdjustmentRef,
    ) -> Result<Option<AdjustReceipt>, RemoteError> {
        with_deadline(
            self.timeout,
            self.ledger.find_adjustment(account_id, reference),
        )
        .await
    }

    /// Reconciliation read, retried with backoff
    ///
    /// `Err` means the ledger never gave an answer.
    pub async fn confirm(
        &self,
        account_id: AccountId,
        reference: AdjustmentRef,
    ) -> Result<Option<AdjustReceipt>, RemoteError> {
        self.stats.incr_reconciliation_reads();
        let max_attempts = self.reconciliation.max_attempts.max(1);
        let mut last_error = RemoteError::Timeout;

        for attempt in 1..=max_attempts {
            match self.lookup(account_id, reference).await {
                Ok(found) => {
                    info!(
                        reference = %reference,
                        applied = found.is_some(),
                        "Reconciliation read resolved adjustment"
                    );
                    return Ok(found);
                }
                Err(e) => {
                    warn!(reference = %reference, attempt, error = %e, "Reconciliation read failed");
                    last_error = e;
                    if attempt < max_attempts {
                        self.reconciliation.sleep(attempt).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Apply, resolving an unknown outcome with a reconciliation read
    ///
    /// After this call `Unknown` means the ledger could not be reached to
    /// confirm either way.
    pub async fn settle(
        &self,
        account_id: AccountId,
        delta: i64,
        reference: AdjustmentRef,
        expected_version: Option<u64>,
    ) -> LegOutcome {
        match self.apply(account_id, delta, reference, expected_version).await {
            LegOutcome::Unknown(detail) => self.resolve_unknown(account_id, reference, detail).await,
            outcome => outcome,
        }
    }

    /// Resume a leg whose call may have been in flight when the process stopped
    ///
    /// Reads first; only re-applies when the ledger shows nothing landed.
    pub async fn resume(
        &self,
        account_id: AccountId,
        delta: i64,
        reference: AdjustmentRef,
    ) -> LegOutcome {
        match self.confirm(account_id, reference).await {
            Ok(Some(receipt)) => LegOutcome::Applied(receipt),
            Ok(None) => self.settle(account_id, delta, reference, None).await,
            Err(e) => LegOutcome::Unknown(format!("reconciliation read failed: {}", e)),
        }
    }

    async fn resolve_unknown(
        &self,
        account_id: AccountId,
        reference: AdjustmentRef,
        detail: String,
    ) -> LegOutcome {
        match self.confirm(account_id, reference).await {
            Ok(Some(receipt)) => LegOutcome::Applied(receipt),
            Ok(None) => LegOutcome::Rejected(Failure::new(
                FailureKind::RemoteUnavailable,
                format!("{} (ledger shows {} not applied)", detail, reference),
            )),
            Err(e) => LegOutcome::Unknown(format!(
                "{}; reconciliation read failed: {}",
                detail, e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::adapters::InMemoryLedger;
    use crate::payment::adapters::mock::{FaultyLedger, LedgerFault};
    use crate::payment::clients::Leg;
    use crate::payment::types::PaymentId;

    fn leg_over(ledger: Arc<dyn AccountLedgerClient>) -> LedgerLeg {
        LedgerLeg::new(
            ledger,
            Duration::from_millis(100),
            3,
            RetryPolicy::immediate(3),
            Arc::new(PaymentStats::new()),
        )
    }

    #[tokio::test]
    async fn test_apply_debit_success() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.open_account(1, 1_000);
        let leg = leg_over(ledger.clone());

        let reference = AdjustmentRef::new(PaymentId::new(), Leg::Debit);
        let outcome = leg.apply(1, -200, reference, None).await;
        assert!(matches!(outcome, LegOutcome::Applied(r) if r.new_balance == 800));
        assert_eq!(ledger.balance(1), Some(800));
    }

    #[tokio::test]
    async fn test_apply_insufficient_funds_is_rejected() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.open_account(1, 100);
        let leg = leg_over(ledger.clone());

        let reference = AdjustmentRef::new(PaymentId::new(), Leg::Debit);
        let outcome = leg.apply(1, -500, reference, None).await;
        assert!(
            matches!(outcome, LegOutcome::Rejected(ref f) if f.kind == FailureKind::InsufficientFunds)
        );
        assert_eq!(ledger.balance(1), Some(100));
    }

    #[tokio::test]
    async fn test_stale_version_hint_retries_after_conflict() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.open_account(1, 1_000);
        let leg = leg_over(ledger.clone());

        // Hint is stale on purpose: first CAS conflicts, second re-reads
        let reference = AdjustmentRef::new(PaymentId::new(), Leg::Credit);
        let outcome = leg.apply(1, 50, reference, Some(42)).await;
        assert!(matches!(outcome, LegOutcome::Applied(r) if r.new_balance == 1_050));
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_to_conflict_or_race() {
        let inner = Arc::new(InMemoryLedger::new());
        inner.open_account(1, 1_000);
        let ledger = Arc::new(FaultyLedger::new(inner.clone()));
        ledger.inject(1, LedgerFault::Conflict, 10);
        let leg = leg_over(ledger);

        let reference = AdjustmentRef::new(PaymentId::new(), Leg::Debit);
        let outcome = leg.apply(1, -10, reference, None).await;
        assert!(
            matches!(outcome, LegOutcome::Rejected(ref f) if f.kind == FailureKind::ConflictOrRace)
        );
        assert_eq!(inner.balance(1), Some(1_000));
    }

    #[tokio::test]
    async fn test_settle_timeout_that_applied_is_applied() {
        let inner = Arc::new(InMemoryLedger::new());
        inner.open_account(2, 500);
        let ledger = Arc::new(FaultyLedger::new(inner.clone()));
        ledger.inject(2, LedgerFault::TimeoutAfterApply, 1);
        let leg = leg_over(ledger);

        let reference = AdjustmentRef::new(PaymentId::new(), Leg::Credit);
        let outcome = leg.settle(2, 200, reference, None).await;
        assert!(matches!(outcome, LegOutcome::Applied(r) if r.new_balance == 700));
        assert_eq!(inner.balance(2), Some(700));
    }

    #[tokio::test]
    async fn test_settle_timeout_that_did_not_apply_is_rejected() {
        let inner = Arc::new(InMemoryLedger::new());
        inner.open_account(2, 500);
        let ledger = Arc::new(FaultyLedger::new(inner.clone()));
        ledger.inject(2, LedgerFault::TimeoutBeforeApply, 1);
        let leg = leg_over(ledger);

        let reference = AdjustmentRef::new(PaymentId::new(), Leg::Credit);
        let outcome = leg.settle(2, 200, reference, None).await;
        assert!(
            matches!(outcome, LegOutcome::Rejected(ref f) if f.kind == FailureKind::RemoteUnavailable)
        );
        assert_eq!(inner.balance(2), Some(500));
    }

    #[tokio::test]
    async fn test_settle_unknown_when_reads_fail() {
        let inner = Arc::new(InMemoryLedger::new());
        inner.open_account(2, 500);
        let ledger = Arc::new(FaultyLedger::new(inner.clone()));
        ledger.inject(2, LedgerFault::TimeoutAfterApply, 1);
        ledger.fail_reads(true);
        let leg = leg_over(ledger);

        let reference = AdjustmentRef::new(PaymentId::new(), Leg::Credit);
        let outcome = leg.settle(2, 200, reference, None).await;
        assert!(matches!(outcome, LegOutcome::Unknown(_)));
    }

    #[tokio::test]
    async fn test_resume_does_not_reapply_landed_leg() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.open_account(1, 1_000);
        let leg = leg_over(ledger.clone());

        let reference = AdjustmentRef::new(PaymentId::new(), Leg::Debit);
        assert!(matches!(
            leg.apply(1, -300, reference, None).await,
            LegOutcome::Applied(_)
        ));

        let resumed = leg.resume(1, -300, reference).await;
        assert!(matches!(resumed, LegOutcome::Applied(r) if r.new_balance == 700));
        assert_eq!(ledger.balance(1), Some(700));
    }
}
