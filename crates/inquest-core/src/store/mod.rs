//! Persistent store for issues, event logs, gaps, integrations, and
//! learnings, backed by redb.
//!
//! Values are JSON-encoded records keyed by snowflake id; secondary lookups
//! (issue by external id, event log by dedupe key) go through small index
//! tables written in the same transaction as the primary row. redb write
//! transactions are serialized, which is what makes the conditional issue
//! transitions in `issue.rs` atomic without any in-process locking.

pub mod event_log;
pub mod gap;
pub mod integration;
pub mod issue;

use std::path::Path;

use redb::{Database, TableDefinition};

use crate::error::{InquestError, Result};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// issue id → JSON `Issue`
pub(crate) const ISSUES: TableDefinition<u64, &[u8]> = TableDefinition::new("issues");
/// "integration_id:external_issue_id" → issue id
pub(crate) const ISSUE_BY_EXTERNAL: TableDefinition<&str, u64> =
    TableDefinition::new("issue_by_external");
/// event log id → JSON `EventLogEntry`
pub(crate) const EVENT_LOGS: TableDefinition<u64, &[u8]> = TableDefinition::new("event_logs");
/// dedupe key → event log id; the unique constraint behind idempotent ingest
pub(crate) const EVENT_DEDUPE: TableDefinition<&str, u64> = TableDefinition::new("event_dedupe");
/// gap id → JSON `Gap`
pub(crate) const GAPS: TableDefinition<u64, &[u8]> = TableDefinition::new("gaps");
/// integration id → JSON `Integration`
pub(crate) const INTEGRATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("integrations");
/// learning id → JSON `Learning`
pub(crate) const LEARNINGS: TableDefinition<u64, &[u8]> = TableDefinition::new("learnings");

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    db: Database,
}

impl Store {
    /// Open or create the store database at `path`, ensuring all tables
    /// exist before any reads.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(InquestError::store)?;
        let wt = db.begin_write().map_err(InquestError::store)?;
        wt.open_table(ISSUES).map_err(InquestError::store)?;
        wt.open_table(ISSUE_BY_EXTERNAL).map_err(InquestError::store)?;
        wt.open_table(EVENT_LOGS).map_err(InquestError::store)?;
        wt.open_table(EVENT_DEDUPE).map_err(InquestError::store)?;
        wt.open_table(GAPS).map_err(InquestError::store)?;
        wt.open_table(INTEGRATIONS).map_err(InquestError::store)?;
        wt.open_table(LEARNINGS).map_err(InquestError::store)?;
        wt.commit().map_err(InquestError::store)?;
        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use tempfile::TempDir;

    pub fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("store.redb")).unwrap();
        (dir, store)
    }
}
