//! Issue persistence and the idle/queued/processing state machine.
//!
//! Every transition runs inside a single redb write transaction. redb
//! serializes writers, so each conditional update below is an atomic
//! compare-and-swap: concurrent callers observe either the state before or
//! the state after, never a torn read-then-write.

use chrono::{DateTime, Duration, Utc};
use redb::ReadableTable;

use crate::error::{InquestError, Result};
use crate::model::Issue;
use crate::store::{Store, ISSUES, ISSUE_BY_EXTERNAL};
use crate::types::ProcessingState;

pub(crate) fn external_key(integration_id: u64, external_issue_id: &str) -> String {
    format!("{integration_id}:{external_issue_id}")
}

impl Store {
    pub fn get_issue(&self, id: u64) -> Result<Issue> {
        self.find_issue(id)?.ok_or(InquestError::IssueNotFound(id))
    }

    pub fn find_issue(&self, id: u64) -> Result<Option<Issue>> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let table = rt.open_table(ISSUES).map_err(InquestError::store)?;
        match table.get(id).map_err(InquestError::store)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_issue_by_external(
        &self,
        integration_id: u64,
        external_issue_id: &str,
    ) -> Result<Option<Issue>> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let index = rt
            .open_table(ISSUE_BY_EXTERNAL)
            .map_err(InquestError::store)?;
        let key = external_key(integration_id, external_issue_id);
        let Some(id) = index.get(key.as_str()).map_err(InquestError::store)? else {
            return Ok(None);
        };
        let id = id.value();
        let table = rt.open_table(ISSUES).map_err(InquestError::store)?;
        match table.get(id).map_err(InquestError::store)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Insert a new issue and its external-id index entry.
    pub fn insert_issue(&self, issue: &Issue) -> Result<()> {
        let value = serde_json::to_vec(issue)?;
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        {
            let mut table = wt.open_table(ISSUES).map_err(InquestError::store)?;
            table
                .insert(issue.id, value.as_slice())
                .map_err(InquestError::store)?;
            let mut index = wt
                .open_table(ISSUE_BY_EXTERNAL)
                .map_err(InquestError::store)?;
            let key = external_key(issue.integration_id, &issue.external_issue_id);
            index
                .insert(key.as_str(), issue.id)
                .map_err(InquestError::store)?;
        }
        wt.commit().map_err(InquestError::store)?;
        Ok(())
    }

    /// Read-modify-write an issue inside one transaction.
    ///
    /// `apply` must not touch `processing` — state transitions go through
    /// the dedicated operations below so they stay observable CAS steps.
    pub fn update_issue(&self, id: u64, apply: impl FnOnce(&mut Issue)) -> Result<Issue> {
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        let updated = {
            let mut table = wt.open_table(ISSUES).map_err(InquestError::store)?;
            let mut issue: Issue = match table.get(id).map_err(InquestError::store)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(InquestError::IssueNotFound(id)),
            };
            apply(&mut issue);
            issue.updated_at = Utc::now();
            let value = serde_json::to_vec(&issue)?;
            table
                .insert(id, value.as_slice())
                .map_err(InquestError::store)?;
            issue
        };
        wt.commit().map_err(InquestError::store)?;
        Ok(updated)
    }

    /// Attempt the idle→queued transition.
    ///
    /// A `queued` or `processing` state whose timestamp is older than
    /// `stuck_after` is treated as abandoned by a crashed worker and
    /// force-reset in the same atomic step (StuckRecovered — logged, not an
    /// error). Exactly one of any set of concurrent callers gets `true`.
    pub fn queue_if_idle(&self, id: u64, stuck_after: Duration) -> Result<bool> {
        let now = Utc::now();
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        let queued = {
            let mut table = wt.open_table(ISSUES).map_err(InquestError::store)?;
            let mut issue: Issue = match table.get(id).map_err(InquestError::store)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(InquestError::IssueNotFound(id)),
            };

            let eligible = match &issue.processing {
                ProcessingState::Idle => true,
                state => {
                    let stuck = is_stale(state.since(), now, stuck_after);
                    if stuck {
                        tracing::warn!(
                            issue_id = id,
                            state = state.name(),
                            "stuck issue recovered, re-queueing"
                        );
                    }
                    stuck
                }
            };

            if eligible {
                issue.processing = ProcessingState::Queued { queued_at: now };
                issue.updated_at = now;
                let value = serde_json::to_vec(&issue)?;
                table
                    .insert(id, value.as_slice())
                    .map_err(InquestError::store)?;
            }
            eligible
        };
        wt.commit().map_err(InquestError::store)?;
        Ok(queued)
    }

    /// Attempt the queued→processing transition. Returns the claimed issue,
    /// or `None` if another worker already transitioned it.
    pub fn claim_queued(&self, id: u64) -> Result<Option<Issue>> {
        let now = Utc::now();
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        let claimed = {
            let mut table = wt.open_table(ISSUES).map_err(InquestError::store)?;
            let mut issue: Issue = match table.get(id).map_err(InquestError::store)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(InquestError::IssueNotFound(id)),
            };
            match issue.processing {
                ProcessingState::Queued { .. } => {
                    issue.processing = ProcessingState::Processing { started_at: now };
                    issue.updated_at = now;
                    let value = serde_json::to_vec(&issue)?;
                    table
                        .insert(id, value.as_slice())
                        .map_err(InquestError::store)?;
                    Some(issue)
                }
                _ => None,
            }
        };
        wt.commit().map_err(InquestError::store)?;
        Ok(claimed)
    }

    /// Unconditional release back to idle, called on pipeline completion
    /// (success or classified-fatal termination).
    pub fn set_idle(&self, id: u64) -> Result<()> {
        let now = Utc::now();
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        {
            let mut table = wt.open_table(ISSUES).map_err(InquestError::store)?;
            let mut issue: Issue = match table.get(id).map_err(InquestError::store)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(InquestError::IssueNotFound(id)),
            };
            issue.processing = ProcessingState::Idle;
            issue.last_processed_at = Some(now);
            issue.updated_at = now;
            let value = serde_json::to_vec(&issue)?;
            table
                .insert(id, value.as_slice())
                .map_err(InquestError::store)?;
        }
        wt.commit().map_err(InquestError::store)?;
        Ok(())
    }
}

fn is_stale(since: Option<DateTime<Utc>>, now: DateTime<Utc>, stuck_after: Duration) -> bool {
    match since {
        Some(ts) => now - ts > stuck_after,
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::open_tmp;
    use std::sync::Arc;

    fn issue(id: u64) -> Issue {
        let now = Utc::now();
        Issue {
            id,
            integration_id: 1,
            external_issue_id: id.to_string(),
            external_project_id: 77,
            title: None,
            description: None,
            labels: Vec::new(),
            assignees: Vec::new(),
            reporter: None,
            discussions: Vec::new(),
            code_findings: Vec::new(),
            gap_ids: Vec::new(),
            spec_proposal: None,
            processing: ProcessingState::Idle,
            last_processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn queue_claim_release_cycle() {
        let (_dir, store) = open_tmp();
        store.insert_issue(&issue(10)).unwrap();

        assert!(store.queue_if_idle(10, Duration::minutes(15)).unwrap());
        let claimed = store.claim_queued(10).unwrap().unwrap();
        assert_eq!(claimed.processing.name(), "processing");

        store.set_idle(10).unwrap();
        let released = store.get_issue(10).unwrap();
        assert_eq!(released.processing, ProcessingState::Idle);
        assert!(released.last_processed_at.is_some());
    }

    #[test]
    fn queue_if_idle_rejects_busy_issue() {
        let (_dir, store) = open_tmp();
        store.insert_issue(&issue(10)).unwrap();

        assert!(store.queue_if_idle(10, Duration::minutes(15)).unwrap());
        // Already queued within the threshold: no second winner.
        assert!(!store.queue_if_idle(10, Duration::minutes(15)).unwrap());
        store.claim_queued(10).unwrap().unwrap();
        assert!(!store.queue_if_idle(10, Duration::minutes(15)).unwrap());
    }

    #[test]
    fn claim_fails_when_not_queued() {
        let (_dir, store) = open_tmp();
        store.insert_issue(&issue(10)).unwrap();
        assert!(store.claim_queued(10).unwrap().is_none());

        store.queue_if_idle(10, Duration::minutes(15)).unwrap();
        assert!(store.claim_queued(10).unwrap().is_some());
        // Lost race: second claim sees `processing`.
        assert!(store.claim_queued(10).unwrap().is_none());
    }

    #[test]
    fn stuck_processing_issue_becomes_queueable() {
        let (_dir, store) = open_tmp();
        let mut stale = issue(10);
        stale.processing = ProcessingState::Processing {
            started_at: Utc::now() - Duration::minutes(20),
        };
        store.insert_issue(&stale).unwrap();

        assert!(store.queue_if_idle(10, Duration::minutes(15)).unwrap());
        let recovered = store.get_issue(10).unwrap();
        assert_eq!(recovered.processing.name(), "queued");
    }

    #[test]
    fn fresh_processing_issue_is_not_recovered() {
        let (_dir, store) = open_tmp();
        let mut busy = issue(10);
        busy.processing = ProcessingState::Processing {
            started_at: Utc::now() - Duration::minutes(2),
        };
        store.insert_issue(&busy).unwrap();

        assert!(!store.queue_if_idle(10, Duration::minutes(15)).unwrap());
    }

    #[test]
    fn concurrent_queue_if_idle_has_single_winner() {
        let (_dir, store) = open_tmp();
        store.insert_issue(&issue(10)).unwrap();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.queue_if_idle(10, Duration::minutes(15)).unwrap()
            }));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1, "exactly one caller may win the CAS");
    }

    #[test]
    fn missing_issue_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.queue_if_idle(99, Duration::minutes(15)),
            Err(InquestError::IssueNotFound(99))
        ));
        assert!(matches!(
            store.get_issue(99),
            Err(InquestError::IssueNotFound(99))
        ));
    }

    #[test]
    fn update_issue_preserves_processing_state() {
        let (_dir, store) = open_tmp();
        store.insert_issue(&issue(10)).unwrap();
        store.queue_if_idle(10, Duration::minutes(15)).unwrap();

        let updated = store
            .update_issue(10, |i| i.labels.push("bug".into()))
            .unwrap();
        assert_eq!(updated.labels, vec!["bug".to_string()]);
        assert_eq!(updated.processing.name(), "queued");
    }

    #[test]
    fn find_by_external_id() {
        let (_dir, store) = open_tmp();
        store.insert_issue(&issue(10)).unwrap();
        let found = store.find_issue_by_external(1, "10").unwrap().unwrap();
        assert_eq!(found.id, 10);
        assert!(store.find_issue_by_external(1, "11").unwrap().is_none());
        assert!(store.find_issue_by_external(2, "10").unwrap().is_none());
    }
}
