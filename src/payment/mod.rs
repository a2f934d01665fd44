//! Payment Transfer Saga
//!
//! Moves money between two accounts held by an external account ledger,
//! with participants resolved through an external customer directory.
//! Neither service shares a transaction with us, so the transfer is a saga
//! persisted in a [`PaymentRecordStore`].
//!
//! # Stages (inside PENDING)
//!
//! ```text
//! CREATED → DEBIT_PENDING → DEBITED → CREDIT_PENDING → CREDITED → SUCCESS
//!                ↓                          ↓
//!             FAILED                  COMPENSATING → COMPENSATED → FAILED
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: the stage is stored before the ledger call it guards
//! 2. **Read Before Compensating**: a timed-out leg is resolved with a
//!    reconciliation read; refunds only follow a confirmed "not applied"
//! 3. **Idempotency**: one payment per idempotency key; ledger mutations carry
//!    a per-leg reference so none is applied twice
//! 4. **Never Dropped**: an unconfirmed refund ends FAILED with the
//!    `RECONCILIATION_REQUIRED` marker and an alert

pub mod adapters;
pub mod clients;
pub mod compensation;
pub mod error;
pub mod legs;
pub mod orchestrator;
pub mod retry;
pub mod side_effects;
pub mod state;
pub mod stats;
pub mod store;
pub mod types;
pub mod worker;


pub use clients::{
    AccountLedgerClient, AuditLogger, CustomerDirectoryClient, EventPublisher, RemoteError,
};
pub use error::{Failure, FailureKind, PaymentError};
pub use orchestrator::{PaymentOrchestrator, SagaConfig};
pub use retry::RetryPolicy;
pub use side_effects::{
    SideEffect, SideEffectConfig, SideEffectSender, SideEffectWorker, side_effect_channel,
};
pub use state::{PaymentStatus, SagaStage};
pub use stats::{PaymentStats, PaymentStatsSnapshot};
pub use store::{InMemoryPaymentStore, PaymentRecordStore, PgPaymentStore, StoreError};
pub use types::{AccountRef, IdempotencyKey, Payment, PaymentId, TransferRequest};
pub use worker::{RecoveryWorker, WorkerConfig};
