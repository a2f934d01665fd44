//! Side-effect dispatch (event publication and audit logging)
//!
//! The orchestrator never awaits a side effect. It hands the effect to a
//! bounded channel with `try_send` and moves on; a [`SideEffectWorker`] drains
//! the channel with bounded concurrency, retrying each delivery with backoff.
//!
//! Side effects never change a payment's status. Failures and drops are
//! counted in [`PaymentStats`] and logged.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clients::{AuditEntry, AuditLogger, EventPublisher, PaymentEvent, with_deadline};
use super::retry::RetryPolicy;
use super::stats::PaymentStats;

pub const DEFAULT_TOPIC: &str = "payment-notifications";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SideEffectConfig {
    pub queue_size: usize,
    /// Deliveries in flight at once
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub topic: String,
    pub call_timeout_ms: u64,
}

impl Default for SideEffectConfig {
    fn default() -> Self {
        Self {
            queue_size: 4096,
            concurrency: 16,
            retry: RetryPolicy::default(),
            topic: DEFAULT_TOPIC.to_string(),
            call_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SideEffect {
    Publish { topic: String, event: PaymentEvent },
    Audit(AuditEntry),
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffect::Publish { .. } => "event",
            SideEffect::Audit(_) => "audit",
        }
    }

    /// Payment the effect belongs to (for logs)
    pub fn reference(&self) -> String {
        match self {
            SideEffect::Publish { event, .. } => event.payment_id.to_string(),
            SideEffect::Audit(entry) => entry.reference_id.clone(),
        }
    }

    fn record_failure(&self, stats: &PaymentStats) {
        match self {
            SideEffect::Publish { .. } => stats.incr_event_failures(),
            SideEffect::Audit(_) => stats.incr_audit_failures(),
        }
    }

    fn record_success(&self, stats: &PaymentStats) {
        match self {
            SideEffect::Publish { .. } => stats.incr_published(),
            SideEffect::Audit(_) => stats.incr_audited(),
        }
    }
}

/// Sender side, held by the orchestrator
#[derive(Clone)]
pub struct SideEffectSender {
    tx: mpsc::Sender<SideEffect>,
    stats: Arc<PaymentStats>,
}

impl SideEffectSender {
    /// Enqueue without waiting; returns false if the effect was dropped
    pub fn dispatch(&self, effect: SideEffect) -> bool {
        match self.tx.try_send(effect) {
            Ok(()) => true,
            Err(TrySendError::Full(effect)) => {
                warn!(
                    kind = effect.kind(),
                    payment_id = %effect.reference(),
                    "Side-effect queue full, dropping"
                );
                self.drop_effect(&effect);
                false
            }
            Err(TrySendError::Closed(effect)) => {
                warn!(
                    kind = effect.kind(),
                    payment_id = %effect.reference(),
                    "Side-effect worker gone, dropping"
                );
                self.drop_effect(&effect);
                false
            }
        }
    }

    fn drop_effect(&self, effect: &SideEffect) {
        self.stats.incr_dropped();
        effect.record_failure(&self.stats);
    }
}

/// Receiver side, consumed by the worker
pub struct SideEffectReceiver {
    rx: mpsc::Receiver<SideEffect>,
}

/// Create a bounded side-effect channel
pub fn side_effect_channel(
    buffer: usize,
    stats: Arc<PaymentStats>,
) -> (SideEffectSender, SideEffectReceiver) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (SideEffectSender { tx, stats }, SideEffectReceiver { rx })
}

pub struct SideEffectWorker {
    audit: Arc<dyn AuditLogger>,
    events: Arc<dyn EventPublisher>,
    config: SideEffectConfig,
    stats: Arc<PaymentStats>,
}

impl SideEffectWorker {
    pub fn new(
        audit: Arc<dyn AuditLogger>,
        events: Arc<dyn EventPublisher>,
        config: SideEffectConfig,
        stats: Arc<PaymentStats>,
    ) -> Self {
        Self {
            audit,
            events,
            config,
            stats,
        }
    }

    pub fn spawn(self, receiver: SideEffectReceiver) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    /// Drain the channel until every sender is dropped
    pub async fn run(self, receiver: SideEffectReceiver) {
        info!(
            concurrency = self.config.concurrency,
            topic = %self.config.topic,
            "Side-effect worker started"
        );
        let effects = futures::stream::unfold(receiver.rx, |mut rx| async move {
            rx.recv().await.map(|effect| (effect, rx))
        });
        let worker = &self;
        effects
            .for_each_concurrent(self.config.concurrency.max(1), |effect| async move {
                worker.deliver(effect).await;
            })
            .await;
        info!("Side-effect channel closed, worker exiting");
    }

    /// Deliver one effect with bounded retry; true on success
    pub async fn deliver(&self, effect: SideEffect) -> bool {
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        let max_attempts = self.config.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let result = match &effect {
                SideEffect::Publish { topic, event } => {
                    with_deadline(timeout, self.events.publish(topic, event.clone())).await
                }
                SideEffect::Audit(entry) => {
                    with_deadline(timeout, self.audit.log(entry.clone())).await
                }
            };
            match result {
                Ok(()) => {
                    debug!(kind = effect.kind(), payment_id = %effect.reference(), attempt, "Side effect delivered");
                    effect.record_success(&self.stats);
                    return true;
                }
                Err(e) => {
                    warn!(
                        kind = effect.kind(),
                        payment_id = %effect.reference(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Side-effect delivery failed"
                    );
                    if attempt < max_attempts {
                        self.config.retry.sleep(attempt).await;
                    }
                }
            }
        }

        warn!(
            kind = effect.kind(),
            payment_id = %effect.reference(),
            "Side effect abandoned after retries"
        );
        effect.record_failure(&self.stats);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::payment::adapters::RecordingAuditLogger;
    use crate::payment::adapters::mock::{FailingAuditLogger, FlakyEventPublisher};
    use crate::payment::state::PaymentStatus;
    use crate::payment::types::PaymentId;

    fn config(attempts: u32) -> SideEffectConfig {
        SideEffectConfig {
            queue_size: 8,
            concurrency: 4,
            retry: RetryPolicy::immediate(attempts),
            topic: DEFAULT_TOPIC.to_string(),
            call_timeout_ms: 500,
        }
    }

    fn audit_entry(status: PaymentStatus) -> AuditEntry {
        AuditEntry {
            service: "PaymentService".into(),
            action: "PAYMENT_PROCESSED".into(),
            reference_id: PaymentId::new().to_string(),
            user_id: 1,
            amount: 200,
            status,
            remarks: "Payment successful".into(),
            timestamp: Utc::now(),
        }
    }

    fn event() -> PaymentEvent {
        PaymentEvent {
            payment_id: PaymentId::new(),
            sender_id: 1,
            receiver_id: 2,
            receiver_email: "bob@example.com".into(),
            amount: 200,
            status: PaymentStatus::Success,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_worker_delivers_until_channel_closes() {
        let stats = Arc::new(PaymentStats::new());
        let audit = Arc::new(RecordingAuditLogger::new());
        let events = Arc::new(FlakyEventPublisher::new(0));
        let (tx, rx) = side_effect_channel(8, stats.clone());
        let handle =
            SideEffectWorker::new(audit.clone(), events.clone(), config(3), stats.clone()).spawn(rx);

        assert!(tx.dispatch(SideEffect::Audit(audit_entry(PaymentStatus::Success))));
        assert!(tx.dispatch(SideEffect::Publish {
            topic: DEFAULT_TOPIC.into(),
            event: event(),
        }));
        drop(tx);
        handle.await.unwrap();

        assert_eq!(audit.entries().await.len(), 1);
        assert_eq!(events.published().len(), 1);
        let snap = stats.snapshot();
        assert_eq!(snap.audits_logged, 1);
        assert_eq!(snap.events_published, 1);
    }

    #[tokio::test]
    async fn test_publish_retried_after_transient_failure() {
        let stats = Arc::new(PaymentStats::new());
        let events = Arc::new(FlakyEventPublisher::new(2));
        let worker = SideEffectWorker::new(
            Arc::new(RecordingAuditLogger::new()),
            events.clone(),
            config(3),
            stats.clone(),
        );

        let delivered = worker
            .deliver(SideEffect::Publish {
                topic: DEFAULT_TOPIC.into(),
                event: event(),
            })
            .await;
        assert!(delivered);
        assert_eq!(events.calls(), 3);
        assert_eq!(stats.snapshot().event_failures, 0);
    }

    #[tokio::test]
    async fn test_audit_failure_is_counted() {
        let stats = Arc::new(PaymentStats::new());
        let audit = Arc::new(FailingAuditLogger::default());
        let worker = SideEffectWorker::new(
            audit.clone(),
            Arc::new(FlakyEventPublisher::new(0)),
            config(2),
            stats.clone(),
        );

        let delivered = worker
            .deliver(SideEffect::Audit(audit_entry(PaymentStatus::Failed)))
            .await;
        assert!(!delivered);
        assert_eq!(audit.calls(), 2);
        assert_eq!(stats.snapshot().audit_failures, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let stats = Arc::new(PaymentStats::new());
        let (tx, _rx) = side_effect_channel(1, stats.clone());

        assert!(tx.dispatch(SideEffect::Audit(audit_entry(PaymentStatus::Success))));
        assert!(!tx.dispatch(SideEffect::Audit(audit_entry(PaymentStatus::Success))));

        let snap = stats.snapshot();
        assert_eq!(snap.side_effects_dropped, 1);
        assert_eq!(snap.audit_failures, 1);
    }
}
