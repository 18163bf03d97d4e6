use std::sync::Arc;

use crate::error::Result;
use crate::queue::{QueueDb, QueueMessage};

/// Appends messages to the stream, one per enqueue decision.
#[derive(Clone)]
pub struct Producer {
    db: Arc<QueueDb>,
}

impl Producer {
    pub fn new(db: Arc<QueueDb>) -> Self {
        Self { db }
    }

    pub fn enqueue(&self, mut message: QueueMessage) -> Result<u64> {
        if message.attempt == 0 {
            message.attempt = 1;
        }
        let seq = self.db.append(&message)?;
        tracing::info!(
            seq,
            event_log_id = message.event_log_id,
            issue_id = message.issue_id,
            event_type = %message.event_type,
            attempt = message.attempt,
            trace_id = message.trace_id.as_deref().unwrap_or(""),
            "enqueued event"
        );
        Ok(seq)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
