//! Periodic recovery of messages whose consumer died between read and ack.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::Result;
use crate::queue::{Delivery, QueueDb};

/// Handles one redelivered message. Implementations acknowledge internally
/// when handling succeeds or is classified fatal; on a retryable error the
/// message is left pending for the next reclaim cycle.
#[async_trait::async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, delivery: Delivery) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ReclaimerConfig {
    pub group: String,
    /// Consumer identity reclaimed messages are transferred to.
    pub consumer: String,
    /// Idle time before a pending message counts as abandoned. Must exceed
    /// the worst-case processing latency or live work gets stolen.
    pub min_idle: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

pub struct Reclaimer {
    db: Arc<QueueDb>,
    cfg: ReclaimerConfig,
    processor: Arc<dyn MessageProcessor>,
}

impl Reclaimer {
    pub fn new(db: Arc<QueueDb>, cfg: ReclaimerConfig, processor: Arc<dyn MessageProcessor>) -> Self {
        Self { db, cfg, processor }
    }

    /// Run reclaim cycles until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            group = %self.cfg.group,
            interval_secs = self.cfg.interval.as_secs(),
            min_idle_secs = self.cfg.min_idle.as_secs(),
            "reclaimer started"
        );
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.reclaim_once().await {
                        tracing::error!(%error, "reclaim cycle error");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("reclaimer stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One reclaim cycle: transfer stale pending messages to this consumer
    /// and reprocess them. Dead-lettering of exhausted messages happens
    /// inside the claim.
    pub async fn reclaim_once(&self) -> Result<()> {
        let reclaimed = self.db.claim_stale(
            &self.cfg.group,
            &self.cfg.consumer,
            self.cfg.min_idle,
            self.cfg.max_attempts,
        )?;

        if reclaimed.is_empty() {
            return Ok(());
        }
        tracing::info!(count = reclaimed.len(), "reclaimed stale messages");

        for delivery in reclaimed {
            let seq = delivery.seq;
            let attempt = delivery.message.attempt;
            if let Err(error) = self.processor.process(delivery).await {
                // Leave the message pending; the next cycle retries it.
                tracing::error!(%error, seq, attempt, "reclaimed message processing failed");
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueMessage;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Recorder {
        db: Arc<QueueDb>,
        group: String,
        seen: Mutex<Vec<(u64, u32)>>,
        ack: bool,
    }

    #[async_trait::async_trait]
    impl MessageProcessor for Recorder {
        async fn process(&self, delivery: Delivery) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push((delivery.seq, delivery.message.attempt));
            if self.ack {
                self.db.ack(&self.group, delivery.seq)?;
            }
            Ok(())
        }
    }

    fn setup(ack: bool) -> (TempDir, Arc<QueueDb>, Reclaimer, Arc<Recorder>) {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(QueueDb::open(&dir.path().join("queue.redb")).unwrap());
        let recorder = Arc::new(Recorder {
            db: Arc::clone(&db),
            group: "workers".into(),
            seen: Mutex::new(Vec::new()),
            ack,
        });
        let reclaimer = Reclaimer::new(
            Arc::clone(&db),
            ReclaimerConfig {
                group: "workers".into(),
                consumer: "reclaimer".into(),
                min_idle: Duration::from_secs(60),
                interval: Duration::from_secs(30),
                max_attempts: 3,
            },
            Arc::clone(&recorder) as Arc<dyn MessageProcessor>,
        );
        (dir, db, reclaimer, recorder)
    }

    fn msg() -> QueueMessage {
        QueueMessage {
            event_log_id: 1,
            issue_id: 10,
            event_type: "reply".into(),
            attempt: 1,
            trace_id: None,
            trigger_thread_id: None,
        }
    }

    #[tokio::test]
    async fn abandoned_message_is_reprocessed_with_bumped_attempt() {
        let (_dir, db, reclaimer, recorder) = setup(true);
        db.append(&msg()).unwrap();
        let deliveries = db.read_group("workers", "worker-a", 10).unwrap();
        db.backdate_pending("workers", deliveries[0].seq, Duration::from_secs(120))
            .unwrap();

        reclaimer.reclaim_once().await.unwrap();

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(deliveries[0].seq, 2)]);
        assert_eq!(db.pending_count("workers").unwrap(), 0, "processor acked");
    }

    #[tokio::test]
    async fn live_messages_are_left_alone() {
        let (_dir, db, reclaimer, recorder) = setup(true);
        db.append(&msg()).unwrap();
        db.read_group("workers", "worker-a", 10).unwrap();

        reclaimer.reclaim_once().await.unwrap();
        assert!(recorder.seen.lock().unwrap().is_empty());
        assert_eq!(db.pending_count("workers").unwrap(), 1);
    }

    #[tokio::test]
    async fn unacked_reprocessing_stays_pending_for_next_cycle() {
        let (_dir, db, reclaimer, recorder) = setup(false);
        db.append(&msg()).unwrap();
        let deliveries = db.read_group("workers", "worker-a", 10).unwrap();
        db.backdate_pending("workers", deliveries[0].seq, Duration::from_secs(120))
            .unwrap();

        reclaimer.reclaim_once().await.unwrap();
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
        assert_eq!(db.pending_count("workers").unwrap(), 1);

        // Next cycle picks it up again once it goes stale, attempt 3.
        db.backdate_pending("workers", deliveries[0].seq, Duration::from_secs(120))
            .unwrap();
        reclaimer.reclaim_once().await.unwrap();
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen[1], (deliveries[0].seq, 3));
    }
}
