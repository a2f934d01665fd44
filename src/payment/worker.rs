//! Recovery Worker
//!
//! Background sweeper that finds PENDING payments nobody is driving any more
//! (crashed process, dropped request) and resumes them to a terminal status.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::PaymentError;
use super::orchestrator::PaymentOrchestrator;
use super::state::SagaStage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// How often to scan for stale payments
    ///
    /// The abandonment cutoff itself is `SagaConfig::stale_after_ms`.
    pub scan_interval_ms: u64,
    /// Maximum payments to resume per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_ms: 30_000,
            batch_size: 100,
        }
    }
}

impl WorkerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

pub struct RecoveryWorker {
    orchestrator: Arc<PaymentOrchestrator>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, config: WorkerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Scan forever
    pub async fn run(&self) {
        info!(
            scan_interval_ms = self.config.scan_interval_ms,
            stale_after_ms = self.orchestrator.config().stale_after_ms,
            "Starting recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Recovery scan failed");
            }
            tokio::time::sleep(self.config.scan_interval()).await;
        }
    }

    /// One scan: returns how many payments reached a terminal status
    pub async fn scan_and_recover(&self) -> Result<usize, PaymentError> {
        let store = self.orchestrator.store();
        let threshold = self.orchestrator.config().stale_after();
        let stale = store.find_stale(threshold, self.config.batch_size).await?;

        if stale.is_empty() {
            debug!("No stale payments found");
            return Ok(0);
        }
        info!(count = stale.len(), "Found stale payments to recover");

        let mut recovered = 0;
        for candidate in stale {
            // Another worker (or a replaying caller) may have claimed it first
            let Some(claimed) = store
                .claim_stale(candidate.payment_id, threshold)
                .await?
            else {
                debug!(payment_id = %candidate.payment_id, "Stale payment already claimed");
                continue;
            };

            if matches!(claimed.stage, SagaStage::CreditPending | SagaStage::Compensating) {
                warn!(
                    payment_id = %claimed.payment_id,
                    stage = %claimed.stage,
                    "Recovering payment with funds in flight"
                );
            }

            let old_stage = claimed.stage;
            match self.orchestrator.resume(claimed).await {
                Ok(payment) => {
                    info!(
                        payment_id = %payment.payment_id,
                        old_stage = %old_stage,
                        status = %payment.status,
                        "Payment recovered"
                    );
                    recovered += 1;
                }
                Err(e) => {
                    error!(
                        payment_id = %candidate.payment_id,
                        error = %e,
                        "Failed to recover payment"
                    );
                }
            }
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered payments this scan");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert_eq!(config.batch_size, 100);
        assert!(config.enabled);
    }
}
