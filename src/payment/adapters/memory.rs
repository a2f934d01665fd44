//! In-memory collaborators
//!
//! Used by simulation mode (no client URLs configured) and by tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

use crate::payment::clients::{
    AccountLedgerClient, AccountSnapshot, AdjustReceipt, AdjustRequest, AdjustmentRef,
    AuditEntry, AuditLogger, Customer, CustomerDirectoryClient, EventPublisher, PaymentEvent,
    RemoteError,
};
use crate::payment::types::{AccountId, CustomerId};

struct LedgerAccount {
    balance: u64,
    version: u64,
    adjustments: HashMap<AdjustmentRef, AdjustReceipt>,
}

/// Versioned account ledger
///
/// Adjustments are keyed by reference: re-submitting an applied reference
/// returns the original receipt without touching the balance.
#[derive(Default)]
pub struct InMemoryLedger {
    accounts: DashMap<AccountId, LedgerAccount>,
    adjust_calls: AtomicUsize,
    read_calls: AtomicUsize,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_account(&self, id: AccountId, balance: u64) {
        self.accounts.insert(
            id,
            LedgerAccount {
                balance,
                version: 1,
                adjustments: HashMap::new(),
            },
        );
    }

    pub fn balance(&self, id: AccountId) -> Option<u64> {
        self.accounts.get(&id).map(|a| a.balance)
    }

    /// Adjust calls received, applied or not
    pub fn adjust_calls(&self) -> usize {
        self.adjust_calls.load(Ordering::Relaxed)
    }

    /// Account and adjustment reads received
    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Relaxed)
    }

    /// Number of distinct adjustments applied to an account
    pub fn applied_count(&self, id: AccountId) -> usize {
        self.accounts.get(&id).map_or(0, |a| a.adjustments.len())
    }
}

#[async_trait]
impl AccountLedgerClient for InMemoryLedger {
    async fn get_account(&self, id: AccountId) -> Result<AccountSnapshot, RemoteError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        self.accounts
            .get(&id)
            .map(|a| AccountSnapshot {
                id,
                balance: a.balance,
                version: a.version,
            })
            .ok_or_else(|| RemoteError::NotFound(format!("account {}", id)))
    }

    async fn conditional_adjust(&self, req: AdjustRequest) -> Result<AdjustReceipt, RemoteError> {
        self.adjust_calls.fetch_add(1, Ordering::Relaxed);
        let mut account = self
            .accounts
            .get_mut(&req.account_id)
            .ok_or_else(|| RemoteError::NotFound(format!("account {}", req.account_id)))?;

        if let Some(receipt) = account.adjustments.get(&req.reference) {
            debug!(reference = %req.reference, "Adjustment already applied");
            return Ok(*receipt);
        }
        if account.version != req.expected_version {
            return Err(RemoteError::Conflict(format!(
                "account {} at version {}, expected {}",
                req.account_id, account.version, req.expected_version
            )));
        }

        let new_balance = if req.delta < 0 {
            account
                .balance
                .checked_sub(req.delta.unsigned_abs())
                .ok_or(RemoteError::InsufficientFunds)?
        } else {
            account
                .balance
                .checked_add(req.delta as u64)
                .ok_or_else(|| RemoteError::Conflict("balance overflow".to_string()))?
        };

        account.balance = new_balance;
        account.version += 1;
        let receipt = AdjustReceipt {
            new_balance,
            version: account.version,
        };
        account.adjustments.insert(req.reference, receipt);
        Ok(receipt)
    }

    async fn find_adjustment(
        &self,
        account_id: AccountId,
        reference: AdjustmentRef,
    ) -> Result<Option<AdjustReceipt>, RemoteError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        let account = self
            .accounts
            .get(&account_id)
            .ok_or_else(|| RemoteError::NotFound(format!("account {}", account_id)))?;
        Ok(account.adjustments.get(&reference).copied())
    }
}

#[derive(Default)]
pub struct InMemoryDirectory {
    customers: DashMap<CustomerId, Customer>,
    lookups: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, customer: Customer) {
        self.customers.insert(customer.id, customer);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CustomerDirectoryClient for InMemoryDirectory {
    async fn get_customer(&self, id: CustomerId) -> Result<Customer, RemoteError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.customers
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("customer {}", id)))
    }
}

/// Audit sink that keeps entries in memory
#[derive(Default)]
pub struct RecordingAuditLogger {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditLogger for RecordingAuditLogger {
    async fn log(&self, entry: AuditEntry) -> Result<(), RemoteError> {
        debug!(reference_id = %entry.reference_id, status = %entry.status, "Audit recorded");
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

/// Event bus over a tokio broadcast channel
///
/// Publishing with no subscribers is not an error.
pub struct BroadcastEventPublisher {
    tx: broadcast::Sender<(String, PaymentEvent)>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(String, PaymentEvent)> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, topic: &str, event: PaymentEvent) -> Result<(), RemoteError> {
        let receivers = self.tx.send((topic.to_string(), event)).unwrap_or(0);
        debug!(topic, receivers, "Event broadcast");
        Ok(())
    }
}

/// Collaborator set for simulation mode and tests
pub struct InMemoryServices {
    pub directory: Arc<InMemoryDirectory>,
    pub ledger: Arc<InMemoryLedger>,
    pub audit: Arc<RecordingAuditLogger>,
    pub events: Arc<BroadcastEventPublisher>,
}

impl InMemoryServices {
    pub fn new() -> Self {
        Self {
            directory: Arc::new(InMemoryDirectory::new()),
            ledger: Arc::new(InMemoryLedger::new()),
            audit: Arc::new(RecordingAuditLogger::new()),
            events: Arc::new(BroadcastEventPublisher::new(1024)),
        }
    }

    /// Register a customer with a freshly opened ledger account
    pub fn add_customer(&self, id: CustomerId, account_id: AccountId, name: &str, balance: u64) {
        self.directory.insert(Customer {
            id,
            name: name.to_string(),
            account_number: format!("ACC-{:06}", account_id),
            email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
            account_id,
        });
        self.ledger.open_account(account_id, balance);
    }
}

impl Default for InMemoryServices {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::clients::Leg;
    use crate::payment::types::PaymentId;

    fn adjust(account_id: AccountId, delta: i64, version: u64, leg: Leg) -> AdjustRequest {
        AdjustRequest {
            account_id,
            delta,
            expected_version: version,
            reference: AdjustmentRef::new(PaymentId::new(), leg),
        }
    }

    #[tokio::test]
    async fn test_ledger_cas_and_versioning() {
        let ledger = InMemoryLedger::new();
        ledger.open_account(1, 1_000);

        let receipt = ledger.conditional_adjust(adjust(1, -200, 1, Leg::Debit)).await.unwrap();
        assert_eq!(receipt, AdjustReceipt { new_balance: 800, version: 2 });

        let stale = ledger.conditional_adjust(adjust(1, -200, 1, Leg::Debit)).await;
        assert!(matches!(stale, Err(RemoteError::Conflict(_))));
        assert_eq!(ledger.balance(1), Some(800));
    }

    #[tokio::test]
    async fn test_ledger_rejects_overdraft() {
        let ledger = InMemoryLedger::new();
        ledger.open_account(1, 100);
        let result = ledger.conditional_adjust(adjust(1, -500, 1, Leg::Debit)).await;
        assert_eq!(result, Err(RemoteError::InsufficientFunds));
        assert_eq!(ledger.balance(1), Some(100));
    }

    #[tokio::test]
    async fn test_ledger_reference_is_idempotent() {
        let ledger = InMemoryLedger::new();
        ledger.open_account(1, 100);
        let req = adjust(1, 50, 1, Leg::Credit);

        ledger.conditional_adjust(req).await.unwrap();
        // Same reference, stale version: original receipt, no second credit
        let again = ledger.conditional_adjust(req).await.unwrap();
        assert_eq!(again.new_balance, 150);
        assert_eq!(ledger.balance(1), Some(150));

        let found = ledger.find_adjustment(1, req.reference).await.unwrap();
        assert_eq!(found, Some(again));
    }

    #[tokio::test]
    async fn test_directory_lookup() {
        let services = InMemoryServices::new();
        services.add_customer(7, 70, "Ada Lovelace", 10);

        let customer = services.directory.get_customer(7).await.unwrap();
        assert_eq!(customer.account_id, 70);
        assert_eq!(customer.email, "ada.lovelace@example.com");
        assert!(matches!(
            services.directory.get_customer(8).await,
            Err(RemoteError::NotFound(_))
        ));
    }
}
