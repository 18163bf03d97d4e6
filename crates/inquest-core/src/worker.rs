//! Worker loop: pull one batch at a time from the consumer group and drive
//! each message through the orchestrator.
//!
//! Parallelism comes from running multiple independent workers, not from a
//! single cooperative loop. A per-message deadline bounds the whole
//! handling chain; an expired run is abandoned implicitly — the message
//! simply stays unacknowledged until the reclaimer redelivers it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::Result;
use crate::orchestrator::{Disposition, Orchestrator, RunError};
use crate::queue::{Consumer, Delivery, MessageProcessor};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to sleep when the stream has nothing new.
    pub poll_interval: Duration,
    /// Deadline for one message's full handling chain. Must stay below the
    /// reclaimer's `min_idle` or live work gets reclaimed.
    pub handle_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            handle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

pub struct Worker {
    consumer: Consumer,
    store: Arc<Store>,
    orchestrator: Arc<Orchestrator>,
    cfg: WorkerConfig,
}

impl Worker {
    pub fn new(
        consumer: Consumer,
        store: Arc<Store>,
        orchestrator: Arc<Orchestrator>,
        cfg: WorkerConfig,
    ) -> Self {
        Self {
            consumer,
            store,
            orchestrator,
            cfg,
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(consumer = %self.consumer.name(), "worker started");
        loop {
            if *shutdown.borrow() {
                tracing::info!(consumer = %self.consumer.name(), "worker stopping");
                return;
            }
            match self.process_one_batch().await {
                Ok(0) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.cfg.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::error!(%error, "batch processing error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Read and handle one batch. Returns how many messages were read.
    pub async fn process_one_batch(&self) -> Result<usize> {
        let deliveries = self.consumer.read()?;
        let count = deliveries.len();
        for delivery in deliveries {
            self.process_delivery(delivery).await;
        }
        Ok(count)
    }

    async fn process_delivery(&self, delivery: Delivery) {
        let seq = delivery.seq;
        let event_log_id = delivery.message.event_log_id;

        let outcome = tokio::time::timeout(
            self.cfg.handle_timeout,
            self.orchestrator.handle(&delivery.message),
        )
        .await;

        match outcome {
            Ok(Ok(Disposition::Ack)) => {
                if let Err(error) = self.consumer.ack(&delivery) {
                    tracing::warn!(%error, seq, "failed to ack message");
                }
            }
            Ok(Ok(Disposition::LeavePending)) => {}
            Ok(Err(RunError::Fatal(error))) => {
                tracing::error!(%error, seq, "message failed fatally, not retrying");
                if let Err(mark_err) = self.store.mark_event_failed(event_log_id, &error.to_string())
                {
                    tracing::warn!(error = %mark_err, event_log_id, "failed to record event error");
                }
                if let Err(ack_err) = self.consumer.ack(&delivery) {
                    tracing::warn!(error = %ack_err, seq, "failed to ack fatal message");
                }
            }
            Ok(Err(RunError::Retryable(error))) => {
                // Left unacknowledged on purpose: the reclaimer redelivers.
                tracing::warn!(%error, seq, attempt = delivery.message.attempt, "message failed, awaiting reclaim");
                if let Err(mark_err) = self.store.mark_event_failed(event_log_id, &error.to_string())
                {
                    tracing::warn!(error = %mark_err, event_log_id, "failed to record event error");
                }
            }
            Err(_elapsed) => {
                tracing::warn!(
                    seq,
                    timeout_secs = self.cfg.handle_timeout.as_secs(),
                    "message handling deadline expired, abandoning run"
                );
            }
        }
    }
}

#[async_trait::async_trait]
impl MessageProcessor for Worker {
    async fn process(&self, delivery: Delivery) -> Result<()> {
        self.process_delivery(delivery).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
