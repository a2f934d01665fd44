//! Collaborator adapters
//!
//! - [`http`]: reqwest clients for the real directory, ledger, audit service
//!   and event webhook
//! - [`memory`]: in-process implementations for simulation mode and tests

pub mod http;
pub mod memory;

pub use http::{HttpAccountLedger, HttpAuditLogger, HttpCustomerDirectory, HttpEventPublisher};
pub use memory::{
    BroadcastEventPublisher, InMemoryDirectory, InMemoryLedger, InMemoryServices,
    RecordingAuditLogger,
};

#[cfg(test)]
pub mod mock;
