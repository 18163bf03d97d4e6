//! Snowflake-style id generation.
//!
//! Ids are time-ordered u64s: 41 bits of milliseconds since a fixed epoch,
//! 10 bits of node identity, 12 bits of per-millisecond sequence. The
//! generator is an explicitly constructed, injected instance — node identity
//! travels with it, there is no ambient global state.

use chrono::Utc;
use std::sync::Mutex;

const NODE_BITS: u64 = 10;
const SEQ_BITS: u64 = 12;
const NODE_MAX: u64 = (1 << NODE_BITS) - 1;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;

/// Custom epoch: 2024-01-01T00:00:00Z, keeps the timestamp within 41 bits
/// for decades.
const EPOCH_MS: i64 = 1_704_067_200_000;

#[derive(Debug)]
struct ClockState {
    last_ms: u64,
    sequence: u64,
}

/// Generates unique, roughly time-ordered ids for one process.
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u64,
    state: Mutex<ClockState>,
}

impl IdGenerator {
    /// `node_id` must fit in 10 bits; values above are masked down.
    pub fn new(node_id: u64) -> Self {
        Self {
            node_id: node_id & NODE_MAX,
            state: Mutex::new(ClockState {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn next(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut now_ms = Self::millis();

        if now_ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQ_MASK;
            if state.sequence == 0 {
                // Sequence exhausted within this millisecond; spin to the next.
                while now_ms <= state.last_ms {
                    now_ms = Self::millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now_ms;

        (now_ms << (NODE_BITS + SEQ_BITS)) | (self.node_id << SEQ_BITS) | state.sequence
    }

    fn millis() -> u64 {
        (Utc::now().timestamp_millis() - EPOCH_MS).max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
