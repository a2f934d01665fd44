use std::sync::Arc;

use crate::payment::PaymentOrchestrator;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    /// Saga entry point; also owns the stats counters
    pub orchestrator: Arc<PaymentOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}
