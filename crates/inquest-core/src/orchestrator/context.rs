//! Builds the planner's message thread: system identity, a context dump of
//! everything known about the issue, then the discussion history replayed
//! as a conversation.

use std::sync::Arc;

use planner_agent::PlannerMessage;

use crate::error::Result;
use crate::model::{CanonicalEvent, Discussion, Gap, Issue, Learning};
use crate::store::Store;

const MAX_DISCUSSIONS: usize = 100;
const RECENT_CLOSED_GAPS: usize = 10;

const PLANNER_SYSTEM_PROMPT: &str = "You are an engineering assistant embedded in an \
issue tracker. Your job is to understand the issue well enough to produce an \
implementation spec: surface unresolved questions as gaps, ask the right \
respondent, record code findings, and signal readiness only when every \
blocking gap is closed. Respond with a batch of actions.";

pub struct ContextBuilder {
    store: Arc<Store>,
}

impl ContextBuilder {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Assemble the full conversation for one planner cycle.
    /// `events` is the unprocessed activity that triggered this run;
    /// `trigger_thread_id` is the thread a reply is expected in.
    pub fn build(
        &self,
        issue: &Issue,
        events: &[CanonicalEvent],
        bot_username: &str,
        trigger_thread_id: Option<&str>,
    ) -> Result<Vec<PlannerMessage>> {
        let integration = self.store.get_integration(issue.integration_id)?;
        let learnings = self.store.list_learnings(integration.workspace_id)?;
        let open_gaps = self.store.list_open_gaps(issue.id)?;
        let recent_closed = self.store.list_closed_gaps(issue.id, RECENT_CLOSED_GAPS)?;

        let mut messages = Vec::with_capacity(2 + issue.discussions.len());
        messages.push(PlannerMessage::system(format!(
            "{PLANNER_SYSTEM_PROMPT}\n\n# Self-Identity\n\nYour comments appear as \
@{bot_username}. Messages from @{bot_username} in the discussion history are YOUR \
previous messages."
        )));
        messages.push(PlannerMessage::user(context_dump(
            issue,
            events,
            &learnings,
            &open_gaps,
            &recent_closed,
            trigger_thread_id,
        )));
        messages.extend(discussion_messages(&issue.discussions, bot_username));
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn context_dump(
    issue: &Issue,
    events: &[CanonicalEvent],
    learnings: &[Learning],
    open_gaps: &[Gap],
    recent_closed: &[Gap],
    trigger_thread_id: Option<&str>,
) -> String {
    let mut out = String::new();

    out.push_str("# Issue\n\n");
    if let Some(title) = &issue.title {
        out.push_str(&format!("**Title**: {title}\n\n"));
    }
    if let Some(description) = &issue.description {
        out.push_str(&format!("**Description**:\n{description}\n\n"));
    }

    out.push_str("# Participants\n\n");
    if let Some(reporter) = &issue.reporter {
        out.push_str(&format!("**Reporter**: @{reporter} — created this issue\n"));
    }
    if !issue.assignees.is_empty() {
        let list: Vec<String> = issue.assignees.iter().map(|a| format!("@{a}")).collect();
        out.push_str(&format!(
            "**Assignee(s)**: {} — assigned to implement\n",
            list.join(", ")
        ));
    }
    out.push('\n');

    if !learnings.is_empty() {
        out.push_str("# Learnings\n\n");
        for (i, l) in learnings.iter().enumerate() {
            out.push_str(&format!("{}. [{}] {}\n", i + 1, l.kind, l.content));
        }
        out.push('\n');
    }

    if !open_gaps.is_empty() {
        out.push_str("# Open gaps\n\n");
        for gap in open_gaps {
            out.push_str(&format!(
                "- gap {} [{:?}→{:?}]: {}\n",
                gap.id, gap.severity, gap.respondent, gap.question
            ));
        }
        out.push('\n');
    }

    if !recent_closed.is_empty() {
        out.push_str("# Recently closed gaps\n\n");
        for gap in recent_closed {
            out.push_str(&format!(
                "- gap {} ({}): {}\n",
                gap.id,
                gap.closed_reason.as_deref().unwrap_or("closed"),
                gap.question
            ));
        }
        out.push('\n');
    }

    if !issue.code_findings.is_empty() {
        out.push_str("# Code findings\n\n");
        for finding in &issue.code_findings {
            out.push_str(&format!("- finding {}: {}\n", finding.id, finding.synthesis));
            for source in &finding.sources {
                out.push_str(&format!("  - {}\n", source.location));
            }
        }
        out.push('\n');
    }

    if !events.is_empty() {
        out.push_str("# New activity\n\n");
        for event in events {
            out.push_str(&format!(
                "- {} at {}{}\n",
                event.event_type,
                event.created_at.to_rfc3339(),
                if event.attempt > 1 {
                    format!(" (redelivery, attempt {})", event.attempt)
                } else {
                    String::new()
                }
            ));
        }
        out.push('\n');
    }

    if let Some(thread) = trigger_thread_id {
        out.push_str(&format!(
            "# Trigger\n\nThis run was triggered from thread {thread}; reply there.\n"
        ));
    }

    out
}

/// Replay the discussion history as conversation turns, oldest first.
/// Replies within a thread are annotated so the chain stays visible even
/// though messages are flattened into one sequence.
fn discussion_messages(discussions: &[Discussion], bot_username: &str) -> Vec<PlannerMessage> {
    let mut ordered: Vec<&Discussion> = discussions.iter().collect();
    ordered.sort_by_key(|d| d.created_at);
    if ordered.len() > MAX_DISCUSSIONS {
        ordered.drain(..ordered.len() - MAX_DISCUSSIONS);
    }

    ordered
        .into_iter()
        .map(|d| {
            let thread = d
                .thread_id
                .as_deref()
                .map(|t| format!(" (in thread {t})"))
                .unwrap_or_default();
            let content = format!("@{}{thread}: {}", d.author, d.body);
            if d.author.eq_ignore_ascii_case(bot_username) {
                PlannerMessage::assistant(content)
            } else {
                PlannerMessage::user(content)
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
