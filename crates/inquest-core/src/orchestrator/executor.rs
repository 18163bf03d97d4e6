//! Action execution with per-action failure isolation: one failing action
//! never blocks the rest of the batch; all failures are collected and
//! reported together with what succeeded.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;

use crate::error::Result;
use crate::idgen::IdGenerator;
use crate::model::{CodeFinding, CodeSource, Gap, GapStatus, Issue, SpecProposal};
use crate::orchestrator::action::{Action, ActionKind, GapCloseReason};
use crate::store::Store;
use crate::tracker::IssueTracker;

const MAX_CODE_FINDINGS: usize = 20;

/// One failed action out of a batch.
#[derive(Debug)]
pub struct ActionFailure {
    pub kind: ActionKind,
    pub error: String,
}

/// Result of executing a batch: which kinds ran, which failed.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub executed: Vec<ActionKind>,
    pub failures: Vec<ActionFailure>,
}

/// Matches `[gap 17]` markers — internal bookkeeping, never user-facing.
fn gap_marker() -> &'static Regex {
    static GAP_MARKER: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    GAP_MARKER.get_or_init(|| Regex::new(r"\[gap\s+\d+\]\s*").unwrap())
}

pub struct ActionExecutor {
    store: Arc<Store>,
    idgen: Arc<IdGenerator>,
}

impl ActionExecutor {
    pub fn new(store: Arc<Store>, idgen: Arc<IdGenerator>) -> Self {
        Self { store, idgen }
    }

    pub async fn execute_batch(
        &self,
        tracker: &Arc<dyn IssueTracker>,
        issue: &Issue,
        actions: &[Action],
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for action in actions {
            match self.execute(tracker, issue, action).await {
                Ok(()) => report.executed.push(action.kind()),
                Err(error) => {
                    tracing::error!(
                        issue_id = issue.id,
                        action = %action.kind(),
                        %error,
                        "action failed"
                    );
                    report.failures.push(ActionFailure {
                        kind: action.kind(),
                        error: error.to_string(),
                    });
                }
            }
        }
        report
    }

    async fn execute(
        &self,
        tracker: &Arc<dyn IssueTracker>,
        issue: &Issue,
        action: &Action,
    ) -> Result<()> {
        match action {
            Action::PostComment(p) => {
                let (content, stripped) = self.sanitize(&p.content);
                if stripped > 0 {
                    tracing::warn!(
                        issue_id = issue.id,
                        count = stripped,
                        "stripped gap markers from comment"
                    );
                }
                match &p.reply_to_id {
                    Some(thread) => tracker.reply_to_thread(issue, thread, &content).await,
                    None => tracker.create_discussion(issue, &content).await,
                }
            }
            Action::UpdateFindings(p) => {
                let mut findings: Vec<CodeFinding> = Vec::new();
                for input in &p.add {
                    findings.push(CodeFinding {
                        id: self.idgen.next(),
                        synthesis: input.synthesis.clone(),
                        sources: input
                            .sources
                            .iter()
                            .map(|s| CodeSource {
                                location: s.location.clone(),
                                snippet: s.snippet.clone(),
                            })
                            .collect(),
                    });
                }
                let remove = p.remove.clone();
                self.store.update_issue(issue.id, move |i| {
                    i.code_findings.retain(|f| !remove.contains(&f.id));
                    i.code_findings.extend(findings);
                    if i.code_findings.len() > MAX_CODE_FINDINGS {
                        let overflow = i.code_findings.len() - MAX_CODE_FINDINGS;
                        i.code_findings.drain(..overflow);
                    }
                })?;
                Ok(())
            }
            Action::UpdateGaps(p) => {
                let mut new_ids = Vec::new();
                for input in &p.add {
                    let gap = Gap {
                        id: self.idgen.next(),
                        issue_id: issue.id,
                        status: GapStatus::Open,
                        question: input.question.clone(),
                        evidence: input.evidence.clone(),
                        severity: input.severity,
                        respondent: input.respondent,
                        closed_reason: None,
                        closed_note: None,
                        created_at: Utc::now(),
                        resolved_at: None,
                    };
                    self.store.insert_gap(&gap)?;
                    new_ids.push(gap.id);
                }
                if !new_ids.is_empty() {
                    self.store.update_issue(issue.id, move |i| {
                        i.gap_ids.extend(new_ids);
                    })?;
                }
                for close in &p.close {
                    let note = close.note.as_deref();
                    match close.reason {
                        GapCloseReason::Answered => {
                            self.store.resolve_gap(close.gap_id, "answered", note)?
                        }
                        GapCloseReason::Inferred => {
                            self.store.resolve_gap(close.gap_id, "inferred", note)?
                        }
                        GapCloseReason::NotRelevant => {
                            self.store.skip_gap(close.gap_id, "not_relevant", note)?
                        }
                    };
                }
                Ok(())
            }
            Action::ReadyForSpecGeneration(p) => {
                let proposal = SpecProposal {
                    context_summary: p.context_summary.clone(),
                    proceed_signal: p.proceed_signal.clone(),
                    closed_gap_ids: p.closed_gap_ids.clone(),
                    relevant_finding_ids: p.relevant_finding_ids.clone(),
                    proposed_at: Utc::now(),
                };
                self.store.update_issue(issue.id, move |i| {
                    i.spec_proposal = Some(proposal);
                })?;
                tracing::info!(issue_id = issue.id, "spec generation proposed");
                Ok(())
            }
        }
    }

    fn sanitize(&self, content: &str) -> (String, usize) {
        let marker = gap_marker();
        let count = marker.find_iter(content).count();
        if count == 0 {
            return (content.to_string(), 0);
        }
        (marker.replace_all(content, "").into_owned(), count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GapRespondent, GapSeverity};
    use crate::orchestrator::action::{
        FindingInput, FindingSourceInput, GapClose, GapInput, PostCommentPayload,
        ReadyForSpecPayload, UpdateFindingsPayload, UpdateGapsPayload,
    };
    use crate::store::testutil::open_tmp;
    use crate::types::ProcessingState;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingTracker {
        posts: Mutex<Vec<(Option<String>, String)>>,
        fail_posts: bool,
    }

    impl RecordingTracker {
        fn new(fail_posts: bool) -> Arc<Self> {
            Arc::new(Self {
                posts: Mutex::new(Vec::new()),
                fail_posts,
            })
        }
    }

    #[async_trait]
    impl IssueTracker for RecordingTracker {
        async fn create_discussion(&self, _issue: &Issue, content: &str) -> Result<()> {
            if self.fail_posts {
                return Err(crate::error::InquestError::Tracker("boom".into()));
            }
            self.posts.lock().unwrap().push((None, content.to_string()));
            Ok(())
        }
        async fn reply_to_thread(
            &self,
            _issue: &Issue,
            discussion_id: &str,
            content: &str,
        ) -> Result<()> {
            if self.fail_posts {
                return Err(crate::error::InquestError::Tracker("boom".into()));
            }
            self.posts
                .lock()
                .unwrap()
                .push((Some(discussion_id.to_string()), content.to_string()));
            Ok(())
        }
    }

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

    fn setup() -> (tempfile::TempDir, Arc<Store>, ActionExecutor) {
        let (dir, store) = open_tmp();
        let store = Arc::new(store);
        let executor = ActionExecutor::new(Arc::clone(&store), Arc::new(IdGenerator::new(1)));
        (dir, store, executor)
    }

    #[tokio::test]
    async fn post_comment_strips_gap_markers() {
        let (_dir, store, executor) = setup();
        store.insert_issue(&issue(10)).unwrap();
        let tracker = RecordingTracker::new(false);
        let dyn_tracker: Arc<dyn IssueTracker> = tracker.clone();

        let report = executor
            .execute_batch(
                &dyn_tracker,
                &issue(10),
                &[Action::PostComment(PostCommentPayload {
                    content: "[gap 17] Which flow? [gap  42] Also this.".into(),
                    reply_to_id: Some("t-1".into()),
                })],
            )
            .await;

        assert!(report.failures.is_empty());
        let posts = tracker.posts.lock().unwrap();
        assert_eq!(posts[0].0.as_deref(), Some("t-1"));
        assert_eq!(posts[0].1, "Which flow? Also this.");
    }

    #[tokio::test]
    async fn update_gaps_creates_and_closes() {
        let (_dir, store, executor) = setup();
        store.insert_issue(&issue(10)).unwrap();
        let tracker: Arc<dyn IssueTracker> = RecordingTracker::new(false);

        let report = executor
            .execute_batch(
                &tracker,
                &issue(10),
                &[Action::UpdateGaps(UpdateGapsPayload {
                    add: vec![GapInput {
                        question: "which DB?".into(),
                        evidence: "two configs exist".into(),
                        severity: GapSeverity::Blocking,
                        respondent: GapRespondent::Reporter,
                    }],
                    close: Vec::new(),
                })],
            )
            .await;
        assert!(report.failures.is_empty());

        let open = store.list_open_gaps(10).unwrap();
        assert_eq!(open.len(), 1);
        let gap_id = open[0].id;
        assert_eq!(store.get_issue(10).unwrap().gap_ids, vec![gap_id]);

        let report = executor
            .execute_batch(
                &tracker,
                &issue(10),
                &[Action::UpdateGaps(UpdateGapsPayload {
                    add: Vec::new(),
                    close: vec![GapClose {
                        gap_id,
                        reason: GapCloseReason::Answered,
                        note: Some("postgres".into()),
                    }],
                })],
            )
            .await;
        assert!(report.failures.is_empty());
        assert_eq!(store.count_open_blocking(10).unwrap(), 0);
        let closed = store.get_gap(gap_id).unwrap();
        assert_eq!(closed.status, GapStatus::Resolved);
        assert_eq!(closed.closed_note.as_deref(), Some("postgres"));
    }

    #[tokio::test]
    async fn findings_are_capped_at_limit() {
        let (_dir, store, executor) = setup();
        store.insert_issue(&issue(10)).unwrap();
        let tracker: Arc<dyn IssueTracker> = RecordingTracker::new(false);

        let add: Vec<FindingInput> = (0..MAX_CODE_FINDINGS + 5)
            .map(|i| FindingInput {
                synthesis: format!("finding {i}"),
                sources: vec![FindingSourceInput {
                    location: "src/lib.rs:1".into(),
                    snippet: String::new(),
                }],
            })
            .collect();
        executor
            .execute_batch(
                &tracker,
                &issue(10),
                &[Action::UpdateFindings(UpdateFindingsPayload {
                    add,
                    remove: Vec::new(),
                })],
            )
            .await;

        let stored = store.get_issue(10).unwrap();
        assert_eq!(stored.code_findings.len(), MAX_CODE_FINDINGS);
        // Oldest entries were dropped.
        assert_eq!(stored.code_findings[0].synthesis, "finding 5");
    }

    #[tokio::test]
    async fn one_failure_does_not_block_remaining_actions() {
        let (_dir, store, executor) = setup();
        store.insert_issue(&issue(10)).unwrap();
        let tracker: Arc<dyn IssueTracker> = RecordingTracker::new(true);

        let report = executor
            .execute_batch(
                &tracker,
                &issue(10),
                &[
                    Action::PostComment(PostCommentPayload {
                        content: "will fail".into(),
                        reply_to_id: None,
                    }),
                    Action::ReadyForSpecGeneration(ReadyForSpecPayload {
                        context_summary: "done".into(),
                        proceed_signal: "approved".into(),
                        closed_gap_ids: Vec::new(),
                        relevant_finding_ids: Vec::new(),
                    }),
                ],
            )
            .await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, ActionKind::PostComment);
        assert_eq!(report.executed, vec![ActionKind::ReadyForSpecGeneration]);
        // The second action still ran.
        assert!(store.get_issue(10).unwrap().spec_proposal.is_some());
    }

    #[tokio::test]
    async fn ready_records_spec_proposal() {
        let (_dir, store, executor) = setup();
        store.insert_issue(&issue(10)).unwrap();
        let tracker: Arc<dyn IssueTracker> = RecordingTracker::new(false);

        executor
            .execute_batch(
                &tracker,
                &issue(10),
                &[Action::ReadyForSpecGeneration(ReadyForSpecPayload {
                    context_summary: "auth flow settled".into(),
                    proceed_signal: "reporter approved".into(),
                    closed_gap_ids: vec![7],
                    relevant_finding_ids: vec![3],
                })],
            )
            .await;

        let proposal = store.get_issue(10).unwrap().spec_proposal.unwrap();
        assert_eq!(proposal.context_summary, "auth flow settled");
        assert_eq!(proposal.closed_gap_ids, vec![7]);
    }
}
