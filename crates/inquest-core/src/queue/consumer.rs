use std::sync::Arc;

use crate::error::Result;
use crate::queue::{Delivery, QueueDb};

/// One named member of a consumer group.
///
/// Reads only messages not yet delivered to any member; unacknowledged
/// messages are the reclaimer's responsibility.
#[derive(Clone)]
pub struct Consumer {
    db: Arc<QueueDb>,
    group: String,
    name: String,
    batch_size: usize,
}

impl Consumer {
    pub fn new(db: Arc<QueueDb>, group: impl Into<String>, name: impl Into<String>, batch_size: usize) -> Self {
        Self {
            db,
            group: group.into(),
            name: name.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn read(&self) -> Result<Vec<Delivery>> {
        let deliveries = self.db.read_group(&self.group, &self.name, self.batch_size)?;
        if !deliveries.is_empty() {
            tracing::debug!(
                count = deliveries.len(),
                group = %self.group,
                consumer = %self.name,
                "read messages from stream"
            );
        }
        Ok(deliveries)
    }

    pub fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.db.ack(&self.group, delivery.seq)?;
        tracing::debug!(seq = delivery.seq, group = %self.group, "message acknowledged");
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
    use tempfile::TempDir;

    fn msg(event_log_id: u64) -> QueueMessage {
        QueueMessage {
            event_log_id,
            issue_id: 10,
            event_type: "reply".into(),
            attempt: 1,
            trace_id: None,
            trigger_thread_id: None,
        }
    }

    #[test]
    fn read_respects_batch_size() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(QueueDb::open(&dir.path().join("queue.redb")).unwrap());
        for i in 0..5 {
            db.append(&msg(i)).unwrap();
        }

        let consumer = Consumer::new(Arc::clone(&db), "workers", "worker-0", 2);
        assert_eq!(consumer.read().unwrap().len(), 2);
        assert_eq!(consumer.read().unwrap().len(), 2);
        assert_eq!(consumer.read().unwrap().len(), 1);
        assert!(consumer.read().unwrap().is_empty());
    }

    #[test]
    fn ack_clears_pending() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(QueueDb::open(&dir.path().join("queue.redb")).unwrap());
        db.append(&msg(1)).unwrap();

        let consumer = Consumer::new(Arc::clone(&db), "workers", "worker-0", 10);
        let deliveries = consumer.read().unwrap();
        consumer.ack(&deliveries[0]).unwrap();
        assert_eq!(db.pending_count("workers").unwrap(), 0);
    }
}
