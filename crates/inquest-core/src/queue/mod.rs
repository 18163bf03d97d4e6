//! Durable queue: an append-only message log with consumer-group delivery,
//! stuck-message reclaim, and dead-letter escalation.
//!
//! The logical contract mirrors a stream with consumer groups: each message
//! is delivered to exactly one member of a named group, must be explicitly
//! acknowledged, and is redelivered (attempt + 1) when its owner goes quiet
//! past the reclaim timeout. Delivery is at-least-once; downstream handling
//! is idempotent via the issue state machine, which is keyed on issue id,
//! not message id.

pub mod consumer;
pub mod db;
pub mod producer;
pub mod reclaimer;

pub use consumer::Consumer;
pub use db::{DeadLetter, Delivery, QueueDb};
pub use producer::Producer;
pub use reclaimer::{MessageProcessor, Reclaimer, ReclaimerConfig};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// QueueMessage
// ---------------------------------------------------------------------------

/// The transport entry. Flat key/value fields only — no nested structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub event_log_id: u64,
    pub issue_id: u64,
    pub event_type: String,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_thread_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
