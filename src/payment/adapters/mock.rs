//! Fault-injecting collaborators for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::memory::InMemoryLedger;
use crate::payment::clients::{
    AccountLedgerClient, AccountSnapshot, AdjustReceipt, AdjustRequest, AdjustmentRef,
    AuditEntry, AuditLogger, EventPublisher, PaymentEvent, RemoteError,
};
use crate::payment::types::AccountId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerFault {
    /// Reject with a version conflict
    Conflict,
    /// Transport failure, nothing applied
    Unavailable,
    /// Time out without applying
    TimeoutBeforeApply,
    /// Apply, then lose the response
    TimeoutAfterApply,
}

/// Ledger wrapper that injects faults into `conditional_adjust` per account
pub struct FaultyLedger {
    inner: Arc<InMemoryLedger>,
    /// account -> (fault, adjusts to let through first, times to fire)
    faults: Mutex<HashMap<AccountId, (LedgerFault, usize, usize)>>,
    fail_reads: AtomicBool,
    fail_account_reads: AtomicBool,
    injected: AtomicUsize,
}

impl FaultyLedger {
    pub fn new(inner: Arc<InMemoryLedger>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            fail_reads: AtomicBool::new(false),
            fail_account_reads: AtomicBool::new(false),
            injected: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` adjusts on `account_id` with `fault`
    pub fn inject(&self, account_id: AccountId, fault: LedgerFault, times: usize) {
        self.inject_after(account_id, 0, fault, times);
    }

    /// Let `skip` adjusts on `account_id` through, then fail the next `times`
    pub fn inject_after(&self, account_id: AccountId, skip: usize, fault: LedgerFault, times: usize) {
        self.faults
            .lock()
            .unwrap()
            .insert(account_id, (fault, skip, times));
    }

    /// Make every `find_adjustment` fail
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `get_account` fail
    pub fn fail_account_reads(&self, fail: bool) {
        self.fail_account_reads.store(fail, Ordering::SeqCst);
    }

    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn take_fault(&self, account_id: AccountId) -> Option<LedgerFault> {
        let mut faults = self.faults.lock().unwrap();
        let (fault, skip, remaining) = faults.get_mut(&account_id)?;
        if *skip > 0 {
            *skip -= 1;
            return None;
        }
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        self.injected.fetch_add(1, Ordering::SeqCst);
        Some(*fault)
    }
}

#[async_trait]
impl AccountLedgerClient for FaultyLedger {
    async fn get_account(&self, id: AccountId) -> Result<AccountSnapshot, RemoteError> {
        if self.fail_account_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("ledger down".into()));
        }
        self.inner.get_account(id).await
    }

    async fn conditional_adjust(&self, req: AdjustRequest) -> Result<AdjustReceipt, RemoteError> {
        match self.take_fault(req.account_id) {
            None => self.inner.conditional_adjust(req).await,
            Some(LedgerFault::Conflict) => Err(RemoteError::Conflict("injected".into())),
            Some(LedgerFault::Unavailable) => Err(RemoteError::Unavailable("injected".into())),
            Some(LedgerFault::TimeoutBeforeApply) => Err(RemoteError::Timeout),
            Some(LedgerFault::TimeoutAfterApply) => {
                self.inner.conditional_adjust(req).await?;
                Err(RemoteError::Timeout)
            }
        }
    }

    async fn find_adjustment(
        &self,
        account_id: AccountId,
        reference: AdjustmentRef,
    ) -> Result<Option<AdjustReceipt>, RemoteError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("ledger down".into()));
        }
        self.inner.find_adjustment(account_id, reference).await
    }
}

/// Audit logger that always fails
#[derive(Default)]
pub struct FailingAuditLogger {
    calls: AtomicUsize,
}

impl FailingAuditLogger {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditLogger for FailingAuditLogger {
    async fn log(&self, _entry: AuditEntry) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RemoteError::Unavailable("audit service down".into()))
    }
}

/// Publisher that fails the first `fail_first` calls, then records events
#[derive(Default)]
pub struct FlakyEventPublisher {
    fail_first: AtomicUsize,
    calls: AtomicUsize,
    published: Mutex<Vec<(String, PaymentEvent)>>,
}

impl FlakyEventPublisher {
    pub fn new(fail_first: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(fail_first),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<(String, PaymentEvent)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for FlakyEventPublisher {
    async fn publish(&self, topic: &str, event: PaymentEvent) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemoteError::Unavailable("event bus down".into()));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), event));
        Ok(())
    }
}
