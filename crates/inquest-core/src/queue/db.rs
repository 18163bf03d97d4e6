//! redb-backed storage for the queue.
//!
//! # Table design
//!
//! The stream is a table of monotonically increasing sequence numbers to
//! JSON messages; append order is delivery order. Each consumer group keeps
//! a cursor (last delivered sequence) and a pending-entry table keyed by
//!
//! ```text
//! [ group bytes | 0x00 | seq: u64 big-endian ]
//! ```
//!
//! so one range scan covers a group's pending entries in sequence order.
//! A pending entry records the owning consumer, the delivery timestamp
//! (the idle-time clock), and the attempt count. Messages whose next
//! attempt would exceed the maximum are moved to the dead-letter table with
//! their fields preserved plus a failure reason, and are never redelivered
//! from the main stream.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{InquestError, Result};
use crate::queue::QueueMessage;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// seq → JSON `QueueMessage`
const STREAM: TableDefinition<u64, &[u8]> = TableDefinition::new("stream");
/// group name → last delivered seq
const CURSORS: TableDefinition<&str, u64> = TableDefinition::new("cursors");
/// composite (group, seq) → JSON `PendingEntry`
const PENDING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending");
/// seq → JSON `DeadLetter`
const DEAD_LETTERS: TableDefinition<u64, &[u8]> = TableDefinition::new("dead_letters");
/// singleton: next sequence number
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_SEQ: &str = "next_seq";

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn pending_key(group: &str, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(group.len() + 9);
    key.extend_from_slice(group.as_bytes());
    key.push(0);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Bounds covering every pending entry of `group`.
fn pending_range(group: &str) -> (Vec<u8>, Vec<u8>) {
    (pending_key(group, 0), pending_key(group, u64::MAX))
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingEntry {
    consumer: String,
    delivered_at_ms: i64,
    attempt: u32,
}

/// One message handed to a consumer. On redelivery, `message.attempt`
/// carries the pending entry's count, not what the producer wrote.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub message: QueueMessage,
}

/// Terminal record of a message that exhausted its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub seq: u64,
    pub message: QueueMessage,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// QueueDb
// ---------------------------------------------------------------------------

pub struct QueueDb {
    db: Database,
}

impl QueueDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(InquestError::queue)?;
        let wt = db.begin_write().map_err(InquestError::queue)?;
        wt.open_table(STREAM).map_err(InquestError::queue)?;
        wt.open_table(CURSORS).map_err(InquestError::queue)?;
        wt.open_table(PENDING).map_err(InquestError::queue)?;
        wt.open_table(DEAD_LETTERS).map_err(InquestError::queue)?;
        wt.open_table(META).map_err(InquestError::queue)?;
        wt.commit().map_err(InquestError::queue)?;
        Ok(Self { db })
    }

    /// Append one message to the stream. Returns its sequence number.
    pub fn append(&self, message: &QueueMessage) -> Result<u64> {
        let value = serde_json::to_vec(message)?;
        let wt = self.db.begin_write().map_err(InquestError::queue)?;
        let seq = {
            let mut meta = wt.open_table(META).map_err(InquestError::queue)?;
            let seq = meta
                .get(NEXT_SEQ)
                .map_err(InquestError::queue)?
                .map(|v| v.value())
                .unwrap_or(1);
            meta.insert(NEXT_SEQ, seq + 1).map_err(InquestError::queue)?;
            let mut stream = wt.open_table(STREAM).map_err(InquestError::queue)?;
            stream
                .insert(seq, value.as_slice())
                .map_err(InquestError::queue)?;
            seq
        };
        wt.commit().map_err(InquestError::queue)?;
        Ok(seq)
    }

    /// Deliver up to `max` new messages to `consumer` within `group`.
    ///
    /// Each delivered message gets a pending entry owned by the consumer;
    /// the group's cursor advances so no other member sees the same
    /// message. Redelivery of unacknowledged messages is the reclaimer's
    /// job, not this read path's.
    pub fn read_group(&self, group: &str, consumer: &str, max: usize) -> Result<Vec<Delivery>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let now_ms = Utc::now().timestamp_millis();
        let wt = self.db.begin_write().map_err(InquestError::queue)?;
        let deliveries = {
            let mut cursors = wt.open_table(CURSORS).map_err(InquestError::queue)?;
            let cursor = cursors
                .get(group)
                .map_err(InquestError::queue)?
                .map(|v| v.value())
                .unwrap_or(0);

            let stream = wt.open_table(STREAM).map_err(InquestError::queue)?;
            let mut deliveries = Vec::new();
            for entry in stream
                .range(cursor + 1..)
                .map_err(InquestError::queue)?
                .take(max)
            {
                let (k, v) = entry.map_err(InquestError::queue)?;
                let message: QueueMessage = serde_json::from_slice(v.value())?;
                deliveries.push(Delivery {
                    seq: k.value(),
                    message,
                });
            }

            if let Some(last) = deliveries.last() {
                cursors
                    .insert(group, last.seq)
                    .map_err(InquestError::queue)?;
                let mut pending = wt.open_table(PENDING).map_err(InquestError::queue)?;
                for delivery in &deliveries {
                    let entry = PendingEntry {
                        consumer: consumer.to_string(),
                        delivered_at_ms: now_ms,
                        attempt: delivery.message.attempt.max(1),
                    };
                    let key = pending_key(group, delivery.seq);
                    let value = serde_json::to_vec(&entry)?;
                    pending
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(InquestError::queue)?;
                }
            }
            deliveries
        };
        wt.commit().map_err(InquestError::queue)?;
        Ok(deliveries)
    }

    /// Acknowledge successful handling: removes the pending entry.
    /// Acknowledging an unknown entry is a no-op, as on redelivery races.
    pub fn ack(&self, group: &str, seq: u64) -> Result<()> {
        let wt = self.db.begin_write().map_err(InquestError::queue)?;
        {
            let mut pending = wt.open_table(PENDING).map_err(InquestError::queue)?;
            let key = pending_key(group, seq);
            pending
                .remove(key.as_slice())
                .map_err(InquestError::queue)?;
        }
        wt.commit().map_err(InquestError::queue)?;
        Ok(())
    }

    /// Transfer ownership of stale pending entries to `consumer`,
    /// incrementing `attempt` by exactly 1 per reclaim. Entries whose next
    /// attempt would exceed `max_attempts` are dead-lettered instead.
    pub fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max_attempts: u32,
    ) -> Result<Vec<Delivery>> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let min_idle_ms = min_idle.as_millis() as i64;

        let wt = self.db.begin_write().map_err(InquestError::queue)?;
        let reclaimed = {
            let mut pending = wt.open_table(PENDING).map_err(InquestError::queue)?;

            // Collect stale entries first; the iterator borrows the table.
            let (lower, upper) = pending_range(group);
            let mut stale: Vec<(Vec<u8>, u64, PendingEntry)> = Vec::new();
            for entry in pending
                .range(lower.as_slice()..=upper.as_slice())
                .map_err(InquestError::queue)?
            {
                let (k, v) = entry.map_err(InquestError::queue)?;
                let record: PendingEntry = serde_json::from_slice(v.value())?;
                if now_ms - record.delivered_at_ms >= min_idle_ms {
                    let key = k.value().to_vec();
                    let suffix: [u8; 8] = key[key.len() - 8..]
                        .try_into()
                        .map_err(|_| InquestError::Queue("malformed pending key".into()))?;
                    stale.push((key, u64::from_be_bytes(suffix), record));
                }
            }

            let stream = wt.open_table(STREAM).map_err(InquestError::queue)?;
            let mut dead = wt.open_table(DEAD_LETTERS).map_err(InquestError::queue)?;
            let mut reclaimed = Vec::new();

            for (key, seq, record) in stale {
                let Some(raw) = stream.get(seq).map_err(InquestError::queue)? else {
                    // Stream entry vanished; drop the orphaned pending entry.
                    pending.remove(key.as_slice()).map_err(InquestError::queue)?;
                    continue;
                };
                let mut message: QueueMessage = serde_json::from_slice(raw.value())?;
                let next_attempt = record.attempt + 1;

                if next_attempt > max_attempts {
                    message.attempt = record.attempt;
                    let letter = DeadLetter {
                        seq,
                        message,
                        reason: format!(
                            "exceeded {max_attempts} delivery attempts (last consumer: {})",
                            record.consumer
                        ),
                        dead_lettered_at: now,
                    };
                    let value = serde_json::to_vec(&letter)?;
                    dead.insert(seq, value.as_slice())
                        .map_err(InquestError::queue)?;
                    pending.remove(key.as_slice()).map_err(InquestError::queue)?;
                    tracing::error!(seq, reason = %letter.reason, "message dead-lettered");
                } else {
                    let entry = PendingEntry {
                        consumer: consumer.to_string(),
                        delivered_at_ms: now_ms,
                        attempt: next_attempt,
                    };
                    let value = serde_json::to_vec(&entry)?;
                    pending
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(InquestError::queue)?;
                    message.attempt = next_attempt;
                    reclaimed.push(Delivery { seq, message });
                }
            }
            reclaimed
        };
        wt.commit().map_err(InquestError::queue)?;
        Ok(reclaimed)
    }

    pub fn pending_count(&self, group: &str) -> Result<usize> {
        let rt = self.db.begin_read().map_err(InquestError::queue)?;
        let pending = rt.open_table(PENDING).map_err(InquestError::queue)?;
        let (lower, upper) = pending_range(group);
        let mut count = 0;
        for entry in pending
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(InquestError::queue)?
        {
            entry.map_err(InquestError::queue)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let rt = self.db.begin_read().map_err(InquestError::queue)?;
        let table = rt.open_table(DEAD_LETTERS).map_err(InquestError::queue)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(InquestError::queue)? {
            let (_, v) = entry.map_err(InquestError::queue)?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Backdate a pending entry's delivery clock (test hook for idle-time
    /// scenarios).
    #[cfg(test)]
    pub(crate) fn backdate_pending(&self, group: &str, seq: u64, by: Duration) -> Result<()> {
        let wt = self.db.begin_write().map_err(InquestError::queue)?;
        {
            let mut pending = wt.open_table(PENDING).map_err(InquestError::queue)?;
            let key = pending_key(group, seq);
            let mut record: PendingEntry = {
                let v = pending
                    .get(key.as_slice())
                    .map_err(InquestError::queue)?
                    .expect("pending entry exists");
                serde_json::from_slice(v.value())?
            };
            record.delivered_at_ms -= by.as_millis() as i64;
            let value = serde_json::to_vec(&record)?;
            pending
                .insert(key.as_slice(), value.as_slice())
                .map_err(InquestError::queue)?;
        }
        wt.commit().map_err(InquestError::queue)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
