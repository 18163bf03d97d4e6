//! Gap ledger: the open questions that gate spec generation.

use chrono::Utc;
use redb::ReadableTable;

use crate::error::{InquestError, Result};
use crate::model::{Gap, GapStatus};
use crate::store::{Store, GAPS};

impl Store {
    pub fn insert_gap(&self, gap: &Gap) -> Result<()> {
        let value = serde_json::to_vec(gap)?;
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        {
            let mut table = wt.open_table(GAPS).map_err(InquestError::store)?;
            table
                .insert(gap.id, value.as_slice())
                .map_err(InquestError::store)?;
        }
        wt.commit().map_err(InquestError::store)?;
        Ok(())
    }

    pub fn get_gap(&self, id: u64) -> Result<Gap> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let table = rt.open_table(GAPS).map_err(InquestError::store)?;
        match table.get(id).map_err(InquestError::store)? {
            Some(v) => Ok(serde_json::from_slice(v.value())?),
            None => Err(InquestError::GapNotFound(id)),
        }
    }

    pub fn list_gaps_by_issue(&self, issue_id: u64) -> Result<Vec<Gap>> {
        self.list_gaps_where(|g| g.issue_id == issue_id)
    }

    pub fn list_open_gaps(&self, issue_id: u64) -> Result<Vec<Gap>> {
        self.list_gaps_where(|g| g.issue_id == issue_id && g.status == GapStatus::Open)
    }

    /// Closed gaps (resolved or skipped) for an issue, most recent first.
    pub fn list_closed_gaps(&self, issue_id: u64, limit: usize) -> Result<Vec<Gap>> {
        let mut closed =
            self.list_gaps_where(|g| g.issue_id == issue_id && g.status != GapStatus::Open)?;
        closed.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at));
        closed.truncate(limit);
        Ok(closed)
    }

    /// The sole gate for proposing spec generation: readiness must never be
    /// accepted while this is greater than zero.
    pub fn count_open_blocking(&self, issue_id: u64) -> Result<usize> {
        Ok(self
            .list_gaps_where(|g| {
                g.issue_id == issue_id
                    && g.status == GapStatus::Open
                    && g.severity == crate::model::GapSeverity::Blocking
            })?
            .len())
    }

    /// open → resolved. Terminal; closing a non-open gap is an error.
    pub fn resolve_gap(&self, id: u64, reason: &str, note: Option<&str>) -> Result<Gap> {
        self.close_gap(id, GapStatus::Resolved, reason, note)
    }

    /// open → skipped. Terminal; a skipped gap can never be reopened.
    pub fn skip_gap(&self, id: u64, reason: &str, note: Option<&str>) -> Result<Gap> {
        self.close_gap(id, GapStatus::Skipped, reason, note)
    }

    fn close_gap(&self, id: u64, status: GapStatus, reason: &str, note: Option<&str>) -> Result<Gap> {
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        let closed = {
            let mut table = wt.open_table(GAPS).map_err(InquestError::store)?;
            let mut gap: Gap = match table.get(id).map_err(InquestError::store)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(InquestError::GapNotFound(id)),
            };
            if gap.status != GapStatus::Open {
                return Err(InquestError::InvalidGapTransition {
                    from: gap.status.to_string(),
                    to: status.to_string(),
                });
            }
            gap.status = status;
            gap.closed_reason = Some(reason.to_string());
            gap.closed_note = note.map(str::to_string);
            gap.resolved_at = Some(Utc::now());
            let value = serde_json::to_vec(&gap)?;
            table
                .insert(id, value.as_slice())
                .map_err(InquestError::store)?;
            gap
        };
        wt.commit().map_err(InquestError::store)?;
        Ok(closed)
    }

    fn list_gaps_where(&self, keep: impl Fn(&Gap) -> bool) -> Result<Vec<Gap>> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let table = rt.open_table(GAPS).map_err(InquestError::store)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(InquestError::store)? {
            let (_, v) = entry.map_err(InquestError::store)?;
            let gap: Gap = serde_json::from_slice(v.value())?;
            if keep(&gap) {
                result.push(gap);
            }
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
