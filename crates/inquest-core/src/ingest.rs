//! Event ingestion: validate, deduplicate, upsert the issue, and decide
//! whether to enqueue.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};

use crate::error::{InquestError, Result};
use crate::idgen::IdGenerator;
use crate::model::{Discussion, EventLogEntry, Issue};
use crate::queue::{Producer, QueueMessage};
use crate::store::event_log::NewEvent;
use crate::store::Store;
use crate::types::{CanonicalEventType, Provider};

// ---------------------------------------------------------------------------
// IngestParams / IngestResult
// ---------------------------------------------------------------------------

/// One normalized webhook, as bound by the (external) HTTP layer.
#[derive(Debug, Clone)]
pub struct IngestParams {
    pub integration_id: u64,
    pub external_issue_id: String,
    pub external_project_id: u64,
    pub provider: Provider,
    pub issue_title: Option<String>,
    pub issue_body: Option<String>,
    pub comment_body: Option<String>,
    pub discussion_id: Option<String>,
    pub comment_id: Option<String>,
    pub triggered_by: String,
    pub event_type: CanonicalEventType,
    pub payload: serde_json::Value,
    pub trace_id: Option<String>,
}

#[derive(Debug)]
pub struct IngestResult {
    /// False when the event was dropped before any side effect
    /// (self-triggered by the bot's own service account).
    pub engaged: bool,
    pub event_log: Option<EventLogEntry>,
    pub issue: Option<Issue>,
    pub dedupe_key: Option<String>,
    /// True when this webhook was a redelivery of an already-seen event.
    pub duplicated: bool,
    /// True when this ingest won the idle→queued race and published a
    /// queue message.
    pub enqueued: bool,
}

impl IngestResult {
    fn not_engaged() -> Self {
        Self {
            engaged: false,
            event_log: None,
            issue: None,
            dedupe_key: None,
            duplicated: false,
            enqueued: false,
        }
    }
}

// ---------------------------------------------------------------------------
// EventIngestService
// ---------------------------------------------------------------------------

pub struct EventIngestService {
    store: Arc<Store>,
    producer: Producer,
    idgen: Arc<IdGenerator>,
    stuck_after: Duration,
}

impl EventIngestService {
    pub fn new(
        store: Arc<Store>,
        producer: Producer,
        idgen: Arc<IdGenerator>,
        stuck_after: Duration,
    ) -> Self {
        Self {
            store,
            producer,
            idgen,
            stuck_after,
        }
    }

    pub fn ingest(&self, params: IngestParams) -> Result<IngestResult> {
        if params.integration_id == 0 || params.external_issue_id.is_empty() {
            return Err(InquestError::Validation(
                "integration_id and external_issue_id are required".into(),
            ));
        }
        if params.payload.is_null() {
            return Err(InquestError::Validation("payload is required".into()));
        }

        let integration = self.store.get_integration(params.integration_id)?;
        if !integration.enabled {
            return Err(InquestError::Validation(format!(
                "integration {} is disabled",
                integration.id
            )));
        }

        // Events the bot triggered itself would loop forever through the
        // webhook pipeline.
        if params
            .triggered_by
            .eq_ignore_ascii_case(&integration.bot_username)
        {
            tracing::info!(
                integration_id = integration.id,
                triggered_by = %params.triggered_by,
                "ignoring self-triggered event"
            );
            return Ok(IngestResult::not_engaged());
        }

        let dedupe_key = compute_dedupe_key(&params);

        let comment = build_comment(&params);
        let record = self.store.record_event(
            &self.idgen,
            NewEvent {
                dedupe_key: dedupe_key.clone(),
                integration: &integration,
                external_issue_id: &params.external_issue_id,
                event_type: params.event_type,
                payload: params.payload.clone(),
                external_id: params.comment_id.clone(),
                triggered_by: params.triggered_by.clone(),
                issue_title: params.issue_title.clone(),
                issue_body: params.issue_body.clone(),
                comment,
            },
        )?;

        let mut enqueued = false;
        if !record.created {
            tracing::info!(
                event_log_id = record.event_log.id,
                issue_id = record.issue.id,
                dedupe_key = %dedupe_key,
                "duplicate event deduped"
            );
        } else if self
            .store
            .queue_if_idle(record.issue.id, self.stuck_after)?
        {
            // Only publish when the issue transitions idle→queued. If it is
            // already queued or processing, the active run picks the logged
            // event up before releasing the issue.
            self.producer.enqueue(QueueMessage {
                event_log_id: record.event_log.id,
                issue_id: record.issue.id,
                event_type: record.event_log.event_type.as_str().to_string(),
                attempt: 1,
                trace_id: params.trace_id.clone(),
                trigger_thread_id: params.discussion_id.clone(),
            })?;
            enqueued = true;
        } else {
            tracing::info!(
                event_log_id = record.event_log.id,
                issue_id = record.issue.id,
                "event logged, issue already being processed"
            );
        }

        // Re-read so the returned issue reflects the queue transition.
        let issue = self.store.get_issue(record.issue.id)?;

        Ok(IngestResult {
            engaged: true,
            duplicated: !record.created,
            enqueued,
            dedupe_key: Some(dedupe_key),
            event_log: Some(record.event_log),
            issue: Some(issue),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Deterministic fingerprint of one webhook: provider-prefixed SHA-256 of
/// the integration id and the most specific natural key available for the
/// event subtype. Stable across byte-identical redeliveries.
fn compute_dedupe_key(params: &IngestParams) -> String {
    let natural = match (&params.comment_id, &params.discussion_id) {
        (Some(comment_id), _) if !comment_id.is_empty() => format!("comment:{comment_id}"),
        (_, Some(discussion_id)) if !discussion_id.is_empty() => {
            format!("discussion:{discussion_id}")
        }
        _ => format!("issue:{}:{}", params.external_issue_id, params.event_type),
    };

    let mut hasher = Sha256::new();
    hasher.update(params.integration_id.to_be_bytes());
    hasher.update(b"|");
    hasher.update(natural.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}:{hex}", params.provider)
}

fn build_comment(params: &IngestParams) -> Option<Discussion> {
    if params.event_type.is_issue_event() {
        return None;
    }
    let body = params.comment_body.clone()?;
    Some(Discussion {
        external_id: params
            .comment_id
            .clone()
            .unwrap_or_else(|| format!("reply:{}", params.external_issue_id)),
        thread_id: params.discussion_id.clone(),
        author: params.triggered_by.clone(),
        body,
        created_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Integration;
    use crate::queue::QueueDb;
    use crate::store::testutil::open_tmp;
    use crate::types::ProcessingState;
    use tempfile::TempDir;

    fn service() -> (TempDir, TempDir, Arc<Store>, Arc<QueueDb>, EventIngestService) {
        let (store_dir, store) = open_tmp();
        let store = Arc::new(store);
        let queue_dir = TempDir::new().unwrap();
        let queue = Arc::new(QueueDb::open(&queue_dir.path().join("queue.redb")).unwrap());
        let service = EventIngestService::new(
            Arc::clone(&store),
            Producer::new(Arc::clone(&queue)),
            Arc::new(IdGenerator::new(1)),
            Duration::minutes(15),
        );
        store
            .insert_integration(&Integration {
                id: 1,
                workspace_id: 2,
                provider: Provider::Gitlab,
                external_project_id: 77,
                bot_username: "inquest-bot".into(),
                enabled: true,
                created_at: Utc::now(),
            })
            .unwrap();
        (store_dir, queue_dir, store, queue, service)
    }

    fn issue_created(external_issue_id: &str) -> IngestParams {
        IngestParams {
            integration_id: 1,
            external_issue_id: external_issue_id.into(),
            external_project_id: 77,
            provider: Provider::Gitlab,
            issue_title: Some("crash on save".into()),
            issue_body: Some("it crashes".into()),
            comment_body: None,
            discussion_id: None,
            comment_id: None,
            triggered_by: "alice".into(),
            event_type: CanonicalEventType::IssueCreated,
            payload: serde_json::json!({"object_kind": "issue"}),
            trace_id: None,
        }
    }

    #[test]
    fn first_ingest_creates_and_enqueues() {
        let (_s, _q, store, queue, service) = service();
        let result = service.ingest(issue_created("5")).unwrap();

        assert!(result.engaged);
        assert!(!result.duplicated);
        assert!(result.enqueued);
        let issue = result.issue.unwrap();
        assert_eq!(issue.processing.name(), "queued");
        assert_eq!(store.list_unprocessed_events(issue.id).unwrap().len(), 1);
        let deliveries = queue.read_group("workers", "w", 10).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].message.issue_id, issue.id);
    }

    #[test]
    fn byte_identical_redelivery_is_deduped() {
        let (_s, _q, store, queue, service) = service();
        let first = service.ingest(issue_created("5")).unwrap();
        let second = service.ingest(issue_created("5")).unwrap();

        assert!(second.duplicated);
        assert!(!second.enqueued);
        assert_eq!(
            first.event_log.as_ref().unwrap().id,
            second.event_log.as_ref().unwrap().id
        );
        // Exactly one entry, exactly one queue message.
        let issue_id = first.issue.unwrap().id;
        assert_eq!(store.list_unprocessed_events(issue_id).unwrap().len(), 1);
        assert_eq!(queue.read_group("workers", "w", 10).unwrap().len(), 1);
    }

    #[test]
    fn second_event_while_queued_is_logged_but_not_published() {
        let (_s, _q, store, queue, service) = service();
        let first = service.ingest(issue_created("5")).unwrap();
        assert!(first.enqueued);

        let mut reply = issue_created("5");
        reply.event_type = CanonicalEventType::Reply;
        reply.comment_body = Some("any updates?".into());
        reply.comment_id = Some("c-1".into());
        reply.triggered_by = "bob".into();
        let second = service.ingest(reply).unwrap();

        assert!(!second.duplicated);
        assert!(!second.enqueued, "issue already queued");
        let issue_id = second.issue.unwrap().id;
        assert_eq!(store.list_unprocessed_events(issue_id).unwrap().len(), 2);
        assert_eq!(queue.read_group("workers", "w", 10).unwrap().len(), 1);
    }

    #[test]
    fn missing_integration_is_fatal_not_found() {
        let (_s, _q, _store, _queue, service) = service();
        let mut params = issue_created("5");
        params.integration_id = 9;
        assert!(matches!(
            service.ingest(params),
            Err(InquestError::IntegrationNotFound(9))
        ));
    }

    #[test]
    fn disabled_integration_is_rejected_at_ingress() {
        let (_s, _q, store, queue, service) = service();
        store
            .insert_integration(&Integration {
                id: 3,
                workspace_id: 2,
                provider: Provider::Gitlab,
                external_project_id: 78,
                bot_username: "inquest-bot".into(),
                enabled: false,
                created_at: Utc::now(),
            })
            .unwrap();
        let mut params = issue_created("5");
        params.integration_id = 3;
        assert!(matches!(
            service.ingest(params),
            Err(InquestError::Validation(_))
        ));
        assert!(queue.read_group("workers", "w", 10).unwrap().is_empty());
    }

    #[test]
    fn self_triggered_event_is_dropped_without_side_effects() {
        let (_s, _q, store, queue, service) = service();
        let mut params = issue_created("5");
        params.triggered_by = "Inquest-Bot".into();
        let result = service.ingest(params).unwrap();

        assert!(!result.engaged);
        assert!(result.event_log.is_none());
        assert!(store.find_issue_by_external(1, "5").unwrap().is_none());
        assert!(queue.read_group("workers", "w", 10).unwrap().is_empty());
    }

    #[test]
    fn malformed_request_is_rejected_before_persistence() {
        let (_s, _q, store, _queue, service) = service();
        let mut params = issue_created("");
        params.external_issue_id = String::new();
        assert!(matches!(
            service.ingest(params),
            Err(InquestError::Validation(_))
        ));
        assert!(store.find_issue_by_external(1, "").unwrap().is_none());
    }

    #[test]
    fn dedupe_key_distinguishes_subtypes() {
        let base = issue_created("5");
        let mut reply = base.clone();
        reply.event_type = CanonicalEventType::Reply;
        reply.comment_id = Some("c-1".into());
        let mut thread_only = base.clone();
        thread_only.event_type = CanonicalEventType::Reply;
        thread_only.discussion_id = Some("d-1".into());

        let k1 = compute_dedupe_key(&base);
        let k2 = compute_dedupe_key(&reply);
        let k3 = compute_dedupe_key(&thread_only);
        assert_ne!(k1, k2);
        assert_ne!(k2, k3);
        assert_ne!(k1, k3);
        assert!(k1.starts_with("gitlab:"));
        // Deterministic across recomputation.
        assert_eq!(k1, compute_dedupe_key(&base));
    }

    #[test]
    fn stuck_issue_is_requeued_by_new_ingest() {
        let (_s, _q, store, queue, service) = service();
        let first = service.ingest(issue_created("5")).unwrap();
        let issue_id = first.issue.unwrap().id;
        // Simulate a crashed worker: claim, then backdate the start.
        queue.read_group("workers", "w", 10).unwrap();
        store.claim_queued(issue_id).unwrap().unwrap();
        store
            .update_issue(issue_id, |i| {
                i.processing = ProcessingState::Processing {
                    started_at: Utc::now() - Duration::minutes(20),
                }
            })
            .unwrap();

        let mut reply = issue_created("5");
        reply.event_type = CanonicalEventType::Reply;
        reply.comment_body = Some("still there?".into());
        reply.comment_id = Some("c-2".into());
        let second = service.ingest(reply).unwrap();

        assert!(second.enqueued, "stuck issue recovered and re-queued");
        assert_eq!(store.get_issue(issue_id).unwrap().processing.name(), "queued");
    }
}
