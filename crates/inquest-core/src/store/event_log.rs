//! Event log persistence: the durable ingest record behind deduplication.

use chrono::Utc;
use redb::ReadableTable;

use crate::error::{InquestError, Result};
use crate::idgen::IdGenerator;
use crate::model::{Discussion, EventLogEntry, Integration, Issue};
use crate::store::issue::external_key;
use crate::store::{Store, EVENT_DEDUPE, EVENT_LOGS, ISSUES, ISSUE_BY_EXTERNAL};
use crate::types::{CanonicalEventType, ProcessingState};

// ---------------------------------------------------------------------------
// NewEvent / EventRecord
// ---------------------------------------------------------------------------

/// Input to [`Store::record_event`]: one normalized webhook plus the issue
/// fields it may refresh.
pub struct NewEvent<'a> {
    pub dedupe_key: String,
    pub integration: &'a Integration,
    pub external_issue_id: &'a str,
    pub event_type: CanonicalEventType,
    pub payload: serde_json::Value,
    pub external_id: Option<String>,
    pub triggered_by: String,
    pub issue_title: Option<String>,
    pub issue_body: Option<String>,
    /// Comment carried by a comment-type event, appended to the issue's
    /// discussions (never refreshes issue-authoritative fields).
    pub comment: Option<Discussion>,
}

/// Outcome of recording one event.
pub struct EventRecord {
    pub event_log: EventLogEntry,
    pub issue: Issue,
    /// False when the dedupe key already existed (redelivered webhook).
    pub created: bool,
}

impl Store {
    /// Atomically upsert the issue and create-or-get the event log entry.
    ///
    /// On a dedupe hit the existing entry and its issue are returned with
    /// `created = false` and the transaction performs no writes at all — no
    /// issue refresh, and the caller must not enqueue.
    pub fn record_event(&self, idgen: &IdGenerator, new: NewEvent<'_>) -> Result<EventRecord> {
        let now = Utc::now();
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        let record = {
            let mut dedupe = wt.open_table(EVENT_DEDUPE).map_err(InquestError::store)?;
            let mut logs = wt.open_table(EVENT_LOGS).map_err(InquestError::store)?;
            let mut issues = wt.open_table(ISSUES).map_err(InquestError::store)?;
            let mut index = wt
                .open_table(ISSUE_BY_EXTERNAL)
                .map_err(InquestError::store)?;

            // Dedupe hit: return the existing entry untouched.
            let existing = dedupe
                .get(new.dedupe_key.as_str())
                .map_err(InquestError::store)?
                .map(|v| v.value());
            if let Some(event_id) = existing {
                let event_log: EventLogEntry = match logs.get(event_id).map_err(InquestError::store)? {
                    Some(v) => serde_json::from_slice(v.value())?,
                    None => return Err(InquestError::EventLogNotFound(event_id)),
                };
                let issue: Issue = match issues.get(event_log.issue_id).map_err(InquestError::store)? {
                    Some(v) => serde_json::from_slice(v.value())?,
                    None => return Err(InquestError::IssueNotFound(event_log.issue_id)),
                };
                EventRecord {
                    event_log,
                    issue,
                    created: false,
                }
            } else {
                // Upsert the issue by (integration, external id).
                let key = external_key(new.integration.id, new.external_issue_id);
                let issue_id = index
                    .get(key.as_str())
                    .map_err(InquestError::store)?
                    .map(|v| v.value());

                let mut issue = match issue_id {
                    Some(id) => match issues.get(id).map_err(InquestError::store)? {
                        Some(v) => serde_json::from_slice(v.value())?,
                        None => return Err(InquestError::IssueNotFound(id)),
                    },
                    None => Issue {
                        id: idgen.next(),
                        integration_id: new.integration.id,
                        external_issue_id: new.external_issue_id.to_string(),
                        external_project_id: new.integration.external_project_id,
                        title: None,
                        description: None,
                        labels: Vec::new(),
                        assignees: Vec::new(),
                        reporter: Some(new.triggered_by.clone()),
                        discussions: Vec::new(),
                        code_findings: Vec::new(),
                        gap_ids: Vec::new(),
                        spec_proposal: None,
                        processing: ProcessingState::Idle,
                        last_processed_at: None,
                        created_at: now,
                        updated_at: now,
                    },
                };

                if new.event_type.is_issue_event() {
                    // Only issue-type events are authoritative for these.
                    if new.issue_title.is_some() {
                        issue.title = new.issue_title.clone();
                    }
                    if new.issue_body.is_some() {
                        issue.description = new.issue_body.clone();
                    }
                } else if let Some(comment) = &new.comment {
                    let seen = issue
                        .discussions
                        .iter()
                        .any(|d| d.external_id == comment.external_id);
                    if !seen {
                        issue.discussions.push(comment.clone());
                    }
                }
                issue.updated_at = now;

                let event_log = EventLogEntry {
                    id: idgen.next(),
                    workspace_id: new.integration.workspace_id,
                    issue_id: issue.id,
                    triggered_by: new.triggered_by,
                    source: new.integration.provider,
                    event_type: new.event_type,
                    payload: new.payload,
                    external_id: new.external_id,
                    dedupe_key: new.dedupe_key.clone(),
                    processed_at: None,
                    processing_error: None,
                    created_at: now,
                };

                let issue_value = serde_json::to_vec(&issue)?;
                issues
                    .insert(issue.id, issue_value.as_slice())
                    .map_err(InquestError::store)?;
                index
                    .insert(key.as_str(), issue.id)
                    .map_err(InquestError::store)?;
                let log_value = serde_json::to_vec(&event_log)?;
                logs.insert(event_log.id, log_value.as_slice())
                    .map_err(InquestError::store)?;
                dedupe
                    .insert(new.dedupe_key.as_str(), event_log.id)
                    .map_err(InquestError::store)?;

                EventRecord {
                    event_log,
                    issue,
                    created: true,
                }
            }
        };
        wt.commit().map_err(InquestError::store)?;
        Ok(record)
    }

    pub fn get_event_log(&self, id: u64) -> Result<EventLogEntry> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let table = rt.open_table(EVENT_LOGS).map_err(InquestError::store)?;
        match table.get(id).map_err(InquestError::store)? {
            Some(v) => Ok(serde_json::from_slice(v.value())?),
            None => Err(InquestError::EventLogNotFound(id)),
        }
    }

    /// Unprocessed entries for an issue, oldest first (ids are time-ordered).
    pub fn list_unprocessed_events(&self, issue_id: u64) -> Result<Vec<EventLogEntry>> {
        let rt = self.db().begin_read().map_err(InquestError::store)?;
        let table = rt.open_table(EVENT_LOGS).map_err(InquestError::store)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(InquestError::store)? {
            let (_, v) = entry.map_err(InquestError::store)?;
            let log: EventLogEntry = serde_json::from_slice(v.value())?;
            if log.issue_id == issue_id && log.processed_at.is_none() {
                result.push(log);
            }
        }
        Ok(result)
    }

    pub fn mark_events_processed(&self, ids: &[u64]) -> Result<()> {
        let now = Utc::now();
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        {
            let mut table = wt.open_table(EVENT_LOGS).map_err(InquestError::store)?;
            for &id in ids {
                let mut log: EventLogEntry = match table.get(id).map_err(InquestError::store)? {
                    Some(v) => serde_json::from_slice(v.value())?,
                    None => return Err(InquestError::EventLogNotFound(id)),
                };
                log.processed_at = Some(now);
                let value = serde_json::to_vec(&log)?;
                table
                    .insert(id, value.as_slice())
                    .map_err(InquestError::store)?;
            }
        }
        wt.commit().map_err(InquestError::store)?;
        Ok(())
    }

    pub fn mark_event_failed(&self, id: u64, error: &str) -> Result<()> {
        let wt = self.db().begin_write().map_err(InquestError::store)?;
        {
            let mut table = wt.open_table(EVENT_LOGS).map_err(InquestError::store)?;
            let mut log: EventLogEntry = match table.get(id).map_err(InquestError::store)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(InquestError::EventLogNotFound(id)),
            };
            log.processing_error = Some(error.to_string());
            let value = serde_json::to_vec(&log)?;
            table
                .insert(id, value.as_slice())
                .map_err(InquestError::store)?;
        }
        wt.commit().map_err(InquestError::store)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
