use crate::error::{InquestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Issue-tracker provider an integration talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gitlab,
    Github,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Gitlab => f.write_str("gitlab"),
            Provider::Github => f.write_str("github"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = InquestError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gitlab" => Ok(Provider::Gitlab),
            "github" => Ok(Provider::Github),
            _ => Err(InquestError::Validation(format!(
                "unknown provider '{s}': must be gitlab or github"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// CanonicalEventType
// ---------------------------------------------------------------------------

/// Semantic type of an issue activity, normalized from provider webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalEventType {
    IssueCreated,
    IssueUpdated,
    IssueClosed,
    Reply,
    MergeRequestCreated,
}

impl CanonicalEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalEventType::IssueCreated => "issue_created",
            CanonicalEventType::IssueUpdated => "issue_updated",
            CanonicalEventType::IssueClosed => "issue_closed",
            CanonicalEventType::Reply => "reply",
            CanonicalEventType::MergeRequestCreated => "merge_request_created",
        }
    }

    /// True for events that carry issue-authoritative fields (title, body).
    /// Comment-type events must never refresh those.
    pub fn is_issue_event(&self) -> bool {
        matches!(
            self,
            CanonicalEventType::IssueCreated
                | CanonicalEventType::IssueUpdated
                | CanonicalEventType::IssueClosed
        )
    }
}

impl fmt::Display for CanonicalEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CanonicalEventType {
    type Err = InquestError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "issue_created" => Ok(CanonicalEventType::IssueCreated),
            "issue_updated" => Ok(CanonicalEventType::IssueUpdated),
            "issue_closed" => Ok(CanonicalEventType::IssueClosed),
            "reply" => Ok(CanonicalEventType::Reply),
            "merge_request_created" => Ok(CanonicalEventType::MergeRequestCreated),
            _ => Err(InquestError::UnrecognizedEvent(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessingState
// ---------------------------------------------------------------------------

/// Per-issue processing state.
///
/// Transitions: `Idle → Queued → Processing → Idle`, performed only by the
/// atomic conditional updates in the issue store. The embedded timestamps
/// drive stuck-job detection: a `Queued` or `Processing` state older than
/// the stuck threshold is force-reset by `queue_if_idle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessingState {
    Idle,
    Queued { queued_at: DateTime<Utc> },
    Processing { started_at: DateTime<Utc> },
}

impl ProcessingState {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingState::Idle => "idle",
            ProcessingState::Queued { .. } => "queued",
            ProcessingState::Processing { .. } => "processing",
        }
    }

    /// The timestamp relevant for staleness checks, if any.
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match self {
            ProcessingState::Idle => None,
            ProcessingState::Queued { queued_at } => Some(*queued_at),
            ProcessingState::Processing { started_at } => Some(*started_at),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
