//! The per-message processing pipeline: claim the issue, build planner
//! context, run the planning loop, execute returned actions, release.
//!
//! Error classification drives queue behavior. Fatal conditions (missing
//! issue or integration, no tracker for the provider, validation exhausted)
//! release the issue and acknowledge the message — retrying cannot help.
//! Retryable conditions (context build, planner call, action execution)
//! surface to the worker, which leaves the message unacknowledged so the
//! reclaimer redelivers it later.

pub mod action;
pub mod context;
pub mod executor;
pub mod validator;

pub use action::{Action, ActionKind};
pub use executor::{ActionExecutor, BatchReport};
pub use validator::ActionValidator;

use std::sync::Arc;

use chrono::Duration;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::error::InquestError;
use crate::idgen::IdGenerator;
use crate::model::Issue;
use crate::queue::QueueMessage;
use crate::store::Store;
use crate::tracker::TrackerRegistry;
use context::ContextBuilder;
use planner_agent::{PlannerClient, PlannerMessage};

// ---------------------------------------------------------------------------
// RunError / Disposition
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RunError {
    /// Abort, release the issue, acknowledge the message.
    #[error("fatal: {0}")]
    Fatal(#[source] InquestError),
    /// Leave the message unacknowledged for reclaim-driven redelivery.
    #[error("retryable: {0}")]
    Retryable(#[source] InquestError),
}

fn classify(err: InquestError) -> RunError {
    match err {
        InquestError::IssueNotFound(_)
        | InquestError::IntegrationNotFound(_)
        | InquestError::GapNotFound(_)
        | InquestError::TrackerNotRegistered(_) => RunError::Fatal(err),
        _ => RunError::Retryable(err),
    }
}

/// What the worker should do with the queue message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Another worker legitimately holds the issue; redelivery will retry.
    LeavePending,
}

enum ClaimOutcome {
    Claimed(Issue),
    /// The message was redelivered for work that already finished.
    AlreadyIdle,
    /// Another worker holds a live claim.
    Busy,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Drain-loop bound: how many planner cycles one claim may run while
    /// new events keep arriving.
    pub max_cycles: usize,
    /// Validation retries after the initial attempt, with the validation
    /// error fed back to the planner.
    pub max_validation_retries: usize,
    pub stuck_after: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_cycles: 8,
            max_validation_retries: 2,
            stuck_after: Duration::minutes(15),
        }
    }
}

pub struct Orchestrator {
    store: Arc<Store>,
    planner: Arc<dyn PlannerClient>,
    trackers: TrackerRegistry,
    context: ContextBuilder,
    validator: ActionValidator,
    executor: ActionExecutor,
    cfg: OrchestratorConfig,
}

const ACK_MESSAGES: &[&str] = &[
    "I'll take a look at this.",
    "On it...",
    "Got it, digging in.",
    "Looking into this now.",
    "I'll check this out and come back to you.",
];

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        planner: Arc<dyn PlannerClient>,
        trackers: TrackerRegistry,
        idgen: Arc<IdGenerator>,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            context: ContextBuilder::new(Arc::clone(&store)),
            validator: ActionValidator::new(Arc::clone(&store)),
            executor: ActionExecutor::new(Arc::clone(&store), idgen),
            store,
            planner,
            trackers,
            cfg,
        }
    }

    /// Handle one dequeued message end to end.
    pub async fn handle(&self, msg: &QueueMessage) -> Result<Disposition, RunError> {
        tracing::info!(
            issue_id = msg.issue_id,
            event_log_id = msg.event_log_id,
            event_type = %msg.event_type,
            attempt = msg.attempt,
            trace_id = msg.trace_id.as_deref().unwrap_or(""),
            "processing message"
        );

        let issue = self
            .store
            .find_issue(msg.issue_id)
            .map_err(classify)?
            .ok_or_else(|| {
                // Cannot release an issue that does not exist; ack and move on.
                RunError::Fatal(InquestError::IssueNotFound(msg.issue_id))
            })?;

        let claimed = match self.claim(issue.id).map_err(classify)? {
            ClaimOutcome::Claimed(claimed) => claimed,
            ClaimOutcome::AlreadyIdle => {
                tracing::info!(issue_id = issue.id, "issue already processed, acknowledging");
                return Ok(Disposition::Ack);
            }
            ClaimOutcome::Busy => {
                tracing::info!(
                    issue_id = issue.id,
                    "issue held by another worker, leaving message pending"
                );
                return Ok(Disposition::LeavePending);
            }
        };

        match self.run_claimed(&claimed, msg).await {
            Ok(()) => {
                self.store.set_idle(claimed.id).map_err(classify)?;
                tracing::info!(issue_id = claimed.id, "engagement completed");
                Ok(Disposition::Ack)
            }
            Err(RunError::Fatal(err)) => {
                // Classified-fatal termination still releases the issue.
                if let Err(release_err) = self.store.set_idle(claimed.id) {
                    tracing::error!(issue_id = claimed.id, error = %release_err, "failed to release issue");
                }
                Err(RunError::Fatal(err))
            }
            Err(retryable) => {
                // The issue stays `processing`; redelivery re-claims it via
                // the stuck reset once it goes stale.
                Err(retryable)
            }
        }
    }

    /// queued→processing, recovering a stale claim if the previous owner
    /// crashed mid-run.
    fn claim(&self, issue_id: u64) -> crate::error::Result<ClaimOutcome> {
        if let Some(claimed) = self.store.claim_queued(issue_id)? {
            return Ok(ClaimOutcome::Claimed(claimed));
        }
        let current = self.store.get_issue(issue_id)?;
        if current.processing == crate::types::ProcessingState::Idle {
            return Ok(ClaimOutcome::AlreadyIdle);
        }
        // Queued or processing under another worker. If the holder went
        // stale this performs the same reset `queue_if_idle` applies on
        // ingest, then races for the claim like everyone else.
        if self.store.queue_if_idle(issue_id, self.cfg.stuck_after)? {
            if let Some(claimed) = self.store.claim_queued(issue_id)? {
                return Ok(ClaimOutcome::Claimed(claimed));
            }
        }
        Ok(ClaimOutcome::Busy)
    }

    async fn run_claimed(&self, issue: &Issue, msg: &QueueMessage) -> Result<(), RunError> {
        let integration = self
            .store
            .get_integration(issue.integration_id)
            .map_err(classify)?;
        let tracker = self.trackers.get(integration.provider).map_err(classify)?;

        let trigger_thread = msg.trigger_thread_id.as_deref();
        let mut issue = issue.clone();
        let mut acked_first_contact = false;

        for cycle in 1..=self.cfg.max_cycles {
            let pending = self
                .store
                .list_unprocessed_events(issue.id)
                .map_err(classify)?;
            if pending.is_empty() {
                break;
            }

            // Fast acknowledgement the first time the bot ever speaks on
            // this issue, posted once and only when real work is about to
            // happen.
            if !acked_first_contact && self.is_first_contact(&issue, &integration.bot_username) {
                acked_first_contact = true;
                let ack = *ACK_MESSAGES
                    .choose(&mut rand::thread_rng())
                    .unwrap_or(&ACK_MESSAGES[0]);
                let posted = match trigger_thread {
                    Some(thread) => tracker.reply_to_thread(&issue, thread, ack).await,
                    None => tracker.create_discussion(&issue, ack).await,
                };
                if let Err(error) = posted {
                    tracing::warn!(issue_id = issue.id, %error, "failed to post first-contact ack");
                }
            }

            let events: Vec<crate::model::CanonicalEvent> = pending
                .iter()
                .map(|entry| {
                    crate::model::CanonicalEvent::from_log(
                        entry,
                        issue.integration_id,
                        msg.attempt,
                        msg.trace_id.clone(),
                    )
                })
                .collect();

            self.run_planner_cycle(&issue, &events, &integration.bot_username, trigger_thread, &tracker)
                .await?;

            let ids: Vec<u64> = pending.iter().map(|e| e.id).collect();
            self.store.mark_events_processed(&ids).map_err(classify)?;

            // Events that arrived mid-cycle keep the claim alive for one
            // more pass instead of waiting for a fresh enqueue.
            let remaining = self
                .store
                .list_unprocessed_events(issue.id)
                .map_err(classify)?;
            if remaining.is_empty() {
                break;
            }
            if cycle == self.cfg.max_cycles {
                tracing::warn!(
                    issue_id = issue.id,
                    pending = remaining.len(),
                    "max planner cycles reached with events still pending"
                );
                break;
            }
            tracing::info!(
                issue_id = issue.id,
                cycle,
                new_events = remaining.len(),
                "new events arrived during processing, re-running planner"
            );
            issue = self.store.get_issue(issue.id).map_err(classify)?;
        }
        Ok(())
    }

    /// One planner iteration: build context → plan → decode+validate (with
    /// feedback retries) → execute.
    async fn run_planner_cycle(
        &self,
        issue: &Issue,
        events: &[crate::model::CanonicalEvent],
        bot_username: &str,
        trigger_thread: Option<&str>,
        tracker: &Arc<dyn crate::tracker::IssueTracker>,
    ) -> Result<(), RunError> {
        let mut messages = self
            .context
            .build(issue, events, bot_username, trigger_thread)
            .map_err(classify)?;
        tracing::debug!(issue_id = issue.id, message_count = messages.len(), "context built");

        let mut validated: Option<Vec<Action>> = None;
        let mut last_error: Option<InquestError> = None;

        for attempt in 0..=self.cfg.max_validation_retries {
            let outcome = self
                .planner
                .plan(&messages)
                .await
                .map_err(|e| RunError::Retryable(e.into()))?;

            if outcome.actions.is_empty() {
                tracing::info!(issue_id = issue.id, "planner returned no actions");
                return Ok(());
            }

            let decoded: crate::error::Result<Vec<Action>> =
                outcome.actions.iter().map(Action::decode).collect();
            let validation = decoded.and_then(|actions| {
                self.validator.validate(issue, &actions).map(|()| actions)
            });

            match validation {
                Ok(actions) => {
                    validated = Some(actions);
                    break;
                }
                Err(error) => {
                    tracing::warn!(
                        issue_id = issue.id,
                        attempt = attempt + 1,
                        %error,
                        "action validation failed"
                    );
                    // Feed the failure back so the model can fix the batch.
                    messages.push(PlannerMessage::assistant(outcome.reasoning.clone()));
                    messages.push(PlannerMessage::user(format!(
                        "Your submitted actions failed validation: {error}. \
Correct the batch and resubmit, or submit no actions."
                    )));
                    last_error = Some(error);
                }
            }
        }

        let Some(actions) = validated else {
            let err = last_error
                .unwrap_or_else(|| InquestError::Validation("validation retries exhausted".into()));
            return Err(RunError::Fatal(InquestError::Validation(format!(
                "validating actions after {} attempts: {err}",
                self.cfg.max_validation_retries + 1
            ))));
        };

        let report = self.executor.execute_batch(tracker, issue, &actions).await;
        if !report.failures.is_empty() {
            return Err(RunError::Retryable(InquestError::ActionExecution(format!(
                "{} of {} actions failed, first: {}",
                report.failures.len(),
                actions.len(),
                report.failures[0].error
            ))));
        }
        Ok(())
    }

    fn is_first_contact(&self, issue: &Issue, bot_username: &str) -> bool {
        !issue
            .discussions
            .iter()
            .any(|d| d.author.eq_ignore_ascii_case(bot_username))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Discussion, Integration};
    use crate::store::testutil::open_tmp;
    use crate::tracker::IssueTracker;
    use crate::types::{CanonicalEventType, ProcessingState, Provider};
    use async_trait::async_trait;
    use chrono::Utc;
    use planner_agent::{PlanOutcome, PlannedAction};
    use std::sync::Mutex;

    // Scripted planner: pops one outcome per call.
    struct ScriptedPlanner {
        script: Mutex<Vec<PlanOutcome>>,
        fail: bool,
    }

    #[async_trait]
    impl PlannerClient for ScriptedPlanner {
        async fn plan(
            &self,
            _messages: &[PlannerMessage],
        ) -> planner_agent::Result<PlanOutcome> {
            if self.fail {
                return Err(planner_agent::PlannerAgentError::Endpoint {
                    status: 503,
                    body: "overloaded".into(),
                });
            }
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Ok(PlanOutcome {
                    actions: Vec::new(),
                    reasoning: String::new(),
                });
            }
            Ok(script.remove(0))
        }
    }

    struct RecordingTracker {
        posts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IssueTracker for RecordingTracker {
        async fn create_discussion(
            &self,
            _issue: &crate::model::Issue,
            content: &str,
        ) -> crate::error::Result<()> {
            self.posts.lock().unwrap().push(content.to_string());
            Ok(())
        }
        async fn reply_to_thread(
            &self,
            _issue: &crate::model::Issue,
            _discussion_id: &str,
            content: &str,
        ) -> crate::error::Result<()> {
            self.posts.lock().unwrap().push(content.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<Store>,
        orchestrator: Orchestrator,
        tracker: Arc<RecordingTracker>,
    }

    fn fixture(script: Vec<PlanOutcome>, planner_fails: bool) -> Fixture {
        let (_dir, store) = open_tmp();
        let store = Arc::new(store);
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

        let tracker = Arc::new(RecordingTracker {
            posts: Mutex::new(Vec::new()),
        });
        let mut trackers = TrackerRegistry::new();
        trackers.register(
            Provider::Gitlab,
            Arc::clone(&tracker) as Arc<dyn IssueTracker>,
        );

        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            Arc::new(ScriptedPlanner {
                script: Mutex::new(script),
                fail: planner_fails,
            }),
            trackers,
            Arc::new(IdGenerator::new(1)),
            OrchestratorConfig::default(),
        );
        Fixture {
            _dir,
            store,
            orchestrator,
            tracker,
        }
    }

    fn seed_issue(store: &Store, id: u64, queued: bool) {
        let now = Utc::now();
        let issue = crate::model::Issue {
            id,
            integration_id: 1,
            external_issue_id: "5".into(),
            external_project_id: 77,
            title: Some("crash on save".into()),
            description: None,
            labels: Vec::new(),
            assignees: Vec::new(),
            reporter: Some("alice".into()),
            discussions: vec![Discussion {
                external_id: "c-0".into(),
                thread_id: None,
                author: "alice".into(),
                body: "please look".into(),
                created_at: now,
            }],
            code_findings: Vec::new(),
            gap_ids: Vec::new(),
            spec_proposal: None,
            processing: if queued {
                ProcessingState::Queued { queued_at: now }
            } else {
                ProcessingState::Idle
            },
            last_processed_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_issue(&issue).unwrap();
    }

    fn seed_event(store: &Store, issue_id: u64, key: &str) -> u64 {
        let idgen = IdGenerator::new(9);
        let integration = store.get_integration(1).unwrap();
        let record = store
            .record_event(
                &idgen,
                crate::store::event_log::NewEvent {
                    dedupe_key: key.into(),
                    integration: &integration,
                    external_issue_id: "5",
                    event_type: CanonicalEventType::Reply,
                    payload: serde_json::json!({}),
                    external_id: None,
                    triggered_by: "alice".into(),
                    issue_title: None,
                    issue_body: None,
                    comment: None,
                },
            )
            .unwrap();
        assert_eq!(record.issue.id, issue_id, "event landed on seeded issue");
        record.event_log.id
    }

    fn msg(issue_id: u64, event_log_id: u64) -> QueueMessage {
        QueueMessage {
            event_log_id,
            issue_id,
            event_type: "reply".into(),
            attempt: 1,
            trace_id: None,
            trigger_thread_id: None,
        }
    }

    fn comment_and_gap() -> PlanOutcome {
        PlanOutcome {
            actions: vec![
                PlannedAction {
                    kind: "post_comment".into(),
                    payload: serde_json::json!({"content": "1. Which database?\nLet me know."}),
                },
                PlannedAction {
                    kind: "update_gaps".into(),
                    payload: serde_json::json!({"add": [{
                        "question": "Which database?",
                        "severity": "blocking",
                        "respondent": "reporter"
                    }]}),
                },
            ],
            reasoning: "need the storage answer first".into(),
        }
    }

    #[tokio::test]
    async fn missing_issue_is_fatal() {
        let f = fixture(Vec::new(), false);
        let err = f.orchestrator.handle(&msg(404, 1)).await.unwrap_err();
        assert!(matches!(err, RunError::Fatal(InquestError::IssueNotFound(404))));
    }

    #[tokio::test]
    async fn successful_run_executes_actions_and_releases() {
        let f = fixture(vec![comment_and_gap()], false);
        seed_issue(&f.store, 0, false);
        let issue_id = f.store.find_issue_by_external(1, "5").unwrap().unwrap().id;
        let event_id = seed_event(&f.store, issue_id, "k1");
        f.store
            .queue_if_idle(issue_id, Duration::minutes(15))
            .unwrap();

        let disposition = f
            .orchestrator
            .handle(&msg(issue_id, event_id))
            .await
            .unwrap();

        assert_eq!(disposition, Disposition::Ack);
        let issue = f.store.get_issue(issue_id).unwrap();
        assert_eq!(issue.processing, ProcessingState::Idle);
        assert_eq!(f.store.list_open_gaps(issue_id).unwrap().len(), 1);
        assert!(f.store.list_unprocessed_events(issue_id).unwrap().is_empty());
        // First-contact ack plus the planner's comment.
        let posts = f.tracker.posts.lock().unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts[1].contains("Which database?"));
    }

    #[tokio::test]
    async fn lost_claim_leaves_message_pending() {
        let f = fixture(Vec::new(), false);
        seed_issue(&f.store, 0, true);
        let issue_id = f.store.find_issue_by_external(1, "5").unwrap().unwrap().id;
        // Another worker claims first.
        f.store.claim_queued(issue_id).unwrap().unwrap();

        let disposition = f.orchestrator.handle(&msg(issue_id, 1)).await.unwrap();
        assert_eq!(disposition, Disposition::LeavePending);
        assert_eq!(
            f.store.get_issue(issue_id).unwrap().processing.name(),
            "processing"
        );
    }

    #[tokio::test]
    async fn idle_issue_is_acknowledged_without_work() {
        let f = fixture(Vec::new(), false);
        seed_issue(&f.store, 0, false);
        let issue_id = f.store.find_issue_by_external(1, "5").unwrap().unwrap().id;

        let disposition = f.orchestrator.handle(&msg(issue_id, 1)).await.unwrap();
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn stale_claim_is_recovered_and_processed() {
        let f = fixture(vec![PlanOutcome {
            actions: Vec::new(),
            reasoning: String::new(),
        }], false);
        seed_issue(&f.store, 0, false);
        let issue_id = f.store.find_issue_by_external(1, "5").unwrap().unwrap().id;
        let event_id = seed_event(&f.store, issue_id, "k1");
        // A worker crashed 20 minutes into its claim.
        f.store
            .update_issue(issue_id, |i| {
                i.processing = ProcessingState::Processing {
                    started_at: Utc::now() - Duration::minutes(20),
                }
            })
            .unwrap();

        let disposition = f
            .orchestrator
            .handle(&msg(issue_id, event_id))
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(
            f.store.get_issue(issue_id).unwrap().processing,
            ProcessingState::Idle
        );
    }

    #[tokio::test]
    async fn planner_failure_is_retryable_and_keeps_claim() {
        let f = fixture(Vec::new(), true);
        seed_issue(&f.store, 0, false);
        let issue_id = f.store.find_issue_by_external(1, "5").unwrap().unwrap().id;
        let event_id = seed_event(&f.store, issue_id, "k1");
        f.store
            .queue_if_idle(issue_id, Duration::minutes(15))
            .unwrap();

        let err = f
            .orchestrator
            .handle(&msg(issue_id, event_id))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Retryable(_)));
        // Issue stays processing; stuck recovery will re-queue it later.
        assert_eq!(
            f.store.get_issue(issue_id).unwrap().processing.name(),
            "processing"
        );
        // Event remains unprocessed for the retry.
        assert_eq!(f.store.list_unprocessed_events(issue_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persistent_validation_failure_is_fatal_and_releases() {
        let bad = PlanOutcome {
            actions: vec![PlannedAction {
                kind: "launch_missiles".into(),
                payload: serde_json::json!({}),
            }],
            reasoning: "hmm".into(),
        };
        let f = fixture(vec![bad.clone(), bad.clone(), bad], false);
        seed_issue(&f.store, 0, false);
        let issue_id = f.store.find_issue_by_external(1, "5").unwrap().unwrap().id;
        let event_id = seed_event(&f.store, issue_id, "k1");
        f.store
            .queue_if_idle(issue_id, Duration::minutes(15))
            .unwrap();

        let err = f
            .orchestrator
            .handle(&msg(issue_id, event_id))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Fatal(_)));
        // Fatal termination still releases the issue.
        assert_eq!(
            f.store.get_issue(issue_id).unwrap().processing,
            ProcessingState::Idle
        );
    }

    #[tokio::test]
    async fn validation_feedback_lets_planner_correct_the_batch() {
        let bad = PlanOutcome {
            actions: vec![PlannedAction {
                kind: "post_comment".into(),
                payload: serde_json::json!({"content": "1. Which database?"}),
            }],
            reasoning: "ask".into(),
        };
        let f = fixture(vec![bad, comment_and_gap()], false);
        seed_issue(&f.store, 0, false);
        let issue_id = f.store.find_issue_by_external(1, "5").unwrap().unwrap().id;
        let event_id = seed_event(&f.store, issue_id, "k1");
        f.store
            .queue_if_idle(issue_id, Duration::minutes(15))
            .unwrap();

        let disposition = f
            .orchestrator
            .handle(&msg(issue_id, event_id))
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(f.store.list_open_gaps(issue_id).unwrap().len(), 1);
    }
}
