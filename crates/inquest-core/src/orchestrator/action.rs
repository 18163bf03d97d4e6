//! Planner-returned actions: a tagged union of `{kind, payload}` with an
//! explicit typed-decode step per kind.
//!
//! Unknown kinds are rejected here, at validation time, never at execution
//! time — by the time a batch executes every action has already decoded.

use serde::{Deserialize, Serialize};

use crate::error::{InquestError, Result};
use crate::model::{GapRespondent, GapSeverity};
use planner_agent::PlannedAction;

// ---------------------------------------------------------------------------
// Action kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    PostComment,
    UpdateFindings,
    UpdateGaps,
    ReadyForSpecGeneration,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::PostComment => "post_comment",
            ActionKind::UpdateFindings => "update_findings",
            ActionKind::UpdateGaps => "update_gaps",
            ActionKind::ReadyForSpecGeneration => "ready_for_spec_generation",
        }
    }

    fn parse(kind: &str) -> Result<Self> {
        match kind {
            "post_comment" => Ok(ActionKind::PostComment),
            "update_findings" => Ok(ActionKind::UpdateFindings),
            "update_gaps" => Ok(ActionKind::UpdateGaps),
            "ready_for_spec_generation" => Ok(ActionKind::ReadyForSpecGeneration),
            other => Err(InquestError::Validation(format!(
                "unknown action kind: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCommentPayload {
    pub content: String,
    /// Thread to reply into; absent means open a new discussion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingInput {
    pub synthesis: String,
    pub sources: Vec<FindingSourceInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingSourceInput {
    pub location: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateFindingsPayload {
    #[serde(default)]
    pub add: Vec<FindingInput>,
    #[serde(default)]
    pub remove: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapCloseReason {
    Answered,
    Inferred,
    NotRelevant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapInput {
    pub question: String,
    #[serde(default)]
    pub evidence: String,
    pub severity: GapSeverity,
    pub respondent: GapRespondent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapClose {
    pub gap_id: u64,
    pub reason: GapCloseReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateGapsPayload {
    #[serde(default)]
    pub add: Vec<GapInput>,
    #[serde(default)]
    pub close: Vec<GapClose>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyForSpecPayload {
    pub context_summary: String,
    pub proceed_signal: String,
    #[serde(default)]
    pub closed_gap_ids: Vec<u64>,
    #[serde(default)]
    pub relevant_finding_ids: Vec<u64>,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A fully decoded action, ready for validation and execution.
#[derive(Debug, Clone)]
pub enum Action {
    PostComment(PostCommentPayload),
    UpdateFindings(UpdateFindingsPayload),
    UpdateGaps(UpdateGapsPayload),
    ReadyForSpecGeneration(ReadyForSpecPayload),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::PostComment(_) => ActionKind::PostComment,
            Action::UpdateFindings(_) => ActionKind::UpdateFindings,
            Action::UpdateGaps(_) => ActionKind::UpdateGaps,
            Action::ReadyForSpecGeneration(_) => ActionKind::ReadyForSpecGeneration,
        }
    }

    /// Decode one wire action. Payload shape errors carry the kind so the
    /// planner can be told exactly what to fix.
    pub fn decode(raw: &PlannedAction) -> Result<Self> {
        let kind = ActionKind::parse(&raw.kind)?;
        let decoded = match kind {
            ActionKind::PostComment => Action::PostComment(decode_payload(kind, &raw.payload)?),
            ActionKind::UpdateFindings => {
                Action::UpdateFindings(decode_payload(kind, &raw.payload)?)
            }
            ActionKind::UpdateGaps => Action::UpdateGaps(decode_payload(kind, &raw.payload)?),
            ActionKind::ReadyForSpecGeneration => {
                Action::ReadyForSpecGeneration(decode_payload(kind, &raw.payload)?)
            }
        };
        Ok(decoded)
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    kind: ActionKind,
    payload: &serde_json::Value,
) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| InquestError::Validation(format!("decoding {kind} payload: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(kind: &str, payload: serde_json::Value) -> PlannedAction {
        PlannedAction {
            kind: kind.into(),
            payload,
        }
    }

    #[test]
    fn decodes_post_comment() {
        let action = Action::decode(&raw(
            "post_comment",
            serde_json::json!({"content": "hi", "reply_to_id": "t-1"}),
        ))
        .unwrap();
        match action {
            Action::PostComment(p) => {
                assert_eq!(p.content, "hi");
                assert_eq!(p.reply_to_id.as_deref(), Some("t-1"));
            }
            other => panic!("expected PostComment, got {:?}", other.kind()),
        }
    }

    #[test]
    fn decodes_update_gaps_with_reasons() {
        let action = Action::decode(&raw(
            "update_gaps",
            serde_json::json!({
                "add": [{
                    "question": "which DB?",
                    "severity": "blocking",
                    "respondent": "reporter"
                }],
                "close": [{"gap_id": 7, "reason": "not_relevant"}]
            }),
        ))
        .unwrap();
        match action {
            Action::UpdateGaps(p) => {
                assert_eq!(p.add.len(), 1);
                assert_eq!(p.add[0].severity, GapSeverity::Blocking);
                assert_eq!(p.close[0].reason, GapCloseReason::NotRelevant);
            }
            other => panic!("expected UpdateGaps, got {:?}", other.kind()),
        }
    }

    #[test]
    fn unknown_kind_is_rejected_at_decode() {
        let err = Action::decode(&raw("launch_missiles", serde_json::json!({}))).unwrap_err();
        assert!(err.to_string().contains("unknown action kind"));
    }

    #[test]
    fn malformed_payload_names_the_kind() {
        let err = Action::decode(&raw("post_comment", serde_json::json!({"nope": 1}))).unwrap_err();
        assert!(err.to_string().contains("post_comment"));
    }

    #[test]
    fn empty_collections_default() {
        let action = Action::decode(&raw("update_findings", serde_json::json!({}))).unwrap();
        match action {
            Action::UpdateFindings(p) => {
                assert!(p.add.is_empty());
                assert!(p.remove.is_empty());
            }
            other => panic!("expected UpdateFindings, got {:?}", other.kind()),
        }
    }
}
