//! Payment Saga - idempotent transfers across independent ledger services
//!
//! # Modules
//!
//! - [`payment`] - Saga orchestrator, record store, collaborators, recovery
//! - [`gateway`] - HTTP entry point (axum + OpenAPI)
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod gateway;
pub mod logging;
pub mod payment;

// Convenient re-exports at crate root
pub use payment::{
    Failure, FailureKind, Payment, PaymentError, PaymentId, PaymentOrchestrator, PaymentStatus,
    SagaConfig, SagaStage, TransferRequest,
};
