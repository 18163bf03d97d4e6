use crate::types::{CanonicalEventType, ProcessingState, Provider};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

/// A workspace's connection to one issue-tracker project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: u64,
    pub workspace_id: u64,
    pub provider: Provider,
    pub external_project_id: u64,
    /// Service-account username the bot posts as. Events triggered by this
    /// username are dropped at ingest to prevent feedback loops.
    pub bot_username: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// EventLogEntry
// ---------------------------------------------------------------------------

/// Durable record of one ingested webhook. Created exactly once per
/// `dedupe_key`; terminal at mark-processed or mark-failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: u64,
    pub workspace_id: u64,
    pub issue_id: u64,
    pub triggered_by: String,
    pub source: Provider,
    pub event_type: CanonicalEventType,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub dedupe_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CanonicalEvent
// ---------------------------------------------------------------------------

/// An event as seen by the processing pipeline: an `EventLogEntry` hydrated
/// with queue delivery metadata. Immutable; `attempt` increases only on
/// redelivery.
#[derive(Debug, Clone)]
pub struct CanonicalEvent {
    pub id: u64,
    pub issue_id: u64,
    pub workspace_id: u64,
    pub integration_id: u64,
    pub event_type: CanonicalEventType,
    pub source: Provider,
    pub payload: serde_json::Value,
    pub external_id: Option<String>,
    pub trace_id: Option<String>,
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl CanonicalEvent {
    /// Hydrate from a stored log entry plus the delivering queue message.
    pub fn from_log(entry: &EventLogEntry, integration_id: u64, attempt: u32, trace_id: Option<String>) -> Self {
        Self {
            id: entry.id,
            issue_id: entry.issue_id,
            workspace_id: entry.workspace_id,
            integration_id,
            event_type: entry.event_type,
            source: entry.source,
            payload: entry.payload.clone(),
            external_id: entry.external_id.clone(),
            trace_id,
            attempt,
            created_at: entry.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Discussion
// ---------------------------------------------------------------------------

/// One comment in the issue's conversation, accumulated from comment-type
/// events. `thread_id` groups replies into provider discussion threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CodeFinding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeSource {
    pub location: String,
    pub snippet: String,
}

/// A synthesized piece of code knowledge the planner attached to the issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFinding {
    pub id: u64,
    pub synthesis: String,
    pub sources: Vec<CodeSource>,
}

// ---------------------------------------------------------------------------
// SpecProposal
// ---------------------------------------------------------------------------

/// Recorded when a validated `ready_for_spec_generation` action executes.
/// Actual spec generation is an external capability; this is the hand-off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecProposal {
    pub context_summary: String,
    pub proceed_signal: String,
    pub closed_gap_ids: Vec<u64>,
    pub relevant_finding_ids: Vec<u64>,
    pub proposed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// A tracked issue. Owns its gap list by id only; gaps hold a non-owning
/// back-reference to the issue id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub integration_id: u64,
    pub external_issue_id: String,
    #[serde(default)]
    pub external_project_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
    #[serde(default)]
    pub discussions: Vec<Discussion>,
    #[serde(default)]
    pub code_findings: Vec<CodeFinding>,
    #[serde(default)]
    pub gap_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_proposal: Option<SpecProposal>,
    pub processing: ProcessingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Gap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatus {
    Open,
    Resolved,
    Skipped,
}

impl std::fmt::Display for GapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GapStatus::Open => f.write_str("open"),
            GapStatus::Resolved => f.write_str("resolved"),
            GapStatus::Skipped => f.write_str("skipped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapSeverity {
    Blocking,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapRespondent {
    Reporter,
    Assignee,
}

/// An unresolved question blocking or informing spec generation.
///
/// `open → resolved` (answered or inferred) and `open → skipped` (not
/// relevant) are the only transitions, each terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    pub id: u64,
    pub issue_id: u64,
    pub status: GapStatus,
    pub question: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub evidence: String,
    pub severity: GapSeverity,
    pub respondent: GapRespondent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_note: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Learning
// ---------------------------------------------------------------------------

/// A workspace-level note fed into every planner context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: u64,
    pub workspace_id: u64,
    pub kind: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
