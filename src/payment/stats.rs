//! Saga and side-effect counters
//!
//! Reconciliation tooling watches the failure counters to detect drift
//! between the payment records and the audit trail / event stream.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Default)]
pub struct PaymentStats {
    pub transfers_succeeded: AtomicU64,
    pub transfers_failed: AtomicU64,
    pub compensations: AtomicU64,
    /// Payments escalated to manual reconciliation
    pub reconciliation_required: AtomicU64,
    /// Ambiguous ledger calls resolved by a reconciliation read
    pub reconciliation_reads: AtomicU64,
    pub events_published: AtomicU64,
    pub event_failures: AtomicU64,
    pub audits_logged: AtomicU64,
    pub audit_failures: AtomicU64,
    /// Side effects dropped because the dispatch queue was full or closed
    pub side_effects_dropped: AtomicU64,
}

impl PaymentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_succeeded(&self) {
        self.transfers_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_compensations(&self) {
        self.compensations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_reconciliation_required(&self) {
        self.reconciliation_required.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_reconciliation_reads(&self) {
        self.reconciliation_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_event_failures(&self) {
        self.event_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_audited(&self) {
        self.audits_logged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_audit_failures(&self) {
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dropped(&self) {
        let count = self.side_effects_dropped.fetch_add(1, Ordering::Relaxed);
        if count % 1000 == 0 {
            tracing::warn!(total_dropped = count + 1, "Side-effect queue saturated (1/1000)");
        }
    }

    pub fn snapshot(&self) -> PaymentStatsSnapshot {
        PaymentStatsSnapshot {
            transfers_succeeded: self.transfers_succeeded.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            reconciliation_required: self.reconciliation_required.load(Ordering::Relaxed),
            reconciliation_reads: self.reconciliation_reads.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            event_failures: self.event_failures.load(Ordering::Relaxed),
            audits_logged: self.audits_logged.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
            side_effects_dropped: self.side_effects_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of stats (for reporting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaymentStatsSnapshot {
    pub transfers_succeeded: u64,
    pub transfers_failed: u64,
    pub compensations: u64,
    pub reconciliation_required: u64,
    pub reconciliation_reads: u64,
    pub events_published: u64,
    pub event_failures: u64,
    pub audits_logged: u64,
    pub audit_failures: u64,
    pub side_effects_dropped: u64,
}

impl fmt::Display for PaymentStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Payment Stats: success={} failed={} compensated={} reconcile={} (reads={}), events={} (failed={}), audits={} (failed={}), dropped={}",
            self.transfers_succeeded,
            self.transfers_failed,
            self.compensations,
            self.reconciliation_required,
            self.reconciliation_reads,
            self.events_published,
            self.event_failures,
            self.audits_logged,
            self.audit_failures,
            self.side_effects_dropped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = PaymentStats::new();
        stats.incr_succeeded();
        stats.incr_succeeded();
        stats.incr_audit_failures();
        stats.incr_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.transfers_succeeded, 2);
        assert_eq!(snap.audit_failures, 1);
        assert_eq!(snap.side_effects_dropped, 1);
        assert_eq!(snap.transfers_failed, 0);
        assert!(snap.to_string().contains("success=2"));
    }
}
