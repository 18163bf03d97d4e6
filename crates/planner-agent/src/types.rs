use serde::{Deserialize, Serialize};

// ─── Messages ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry in the ordered conversation handed to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerMessage {
    pub role: Role,
    pub content: String,
}

impl PlannerMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ─── Planned actions ──────────────────────────────────────────────────────

/// An action as returned on the wire: a kind discriminator plus an opaque
/// payload. The consumer decodes the payload per kind and rejects unknown
/// kinds during validation — the planner contract stays open-ended here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAction {
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// The planner's full answer for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanOutcome {
    #[serde(default)]
    pub actions: Vec<PlannedAction>,
    #[serde(default)]
    pub reasoning: String,
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(PlannerMessage::system("s").role, Role::System);
        assert_eq!(PlannerMessage::user("u").role, Role::User);
        assert_eq!(PlannerMessage::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn plan_outcome_tolerates_missing_fields() {
        let outcome: PlanOutcome = serde_json::from_str("{}").unwrap();
        assert!(outcome.actions.is_empty());
        assert!(outcome.reasoning.is_empty());
    }

    #[test]
    fn planned_action_payload_defaults_to_null() {
        let action: PlannedAction =
            serde_json::from_str(r#"{"kind": "post_comment"}"#).unwrap();
        assert_eq!(action.kind, "post_comment");
        assert!(action.payload.is_null());
    }

    #[test]
    fn plan_outcome_roundtrip() {
        let json = r#"{
            "actions": [
                {"kind": "post_comment", "payload": {"content": "hi"}},
                {"kind": "update_gaps", "payload": {"add": []}}
            ],
            "reasoning": "ask first"
        }"#;
        let outcome: PlanOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(outcome.actions.len(), 2);
        assert_eq!(outcome.actions[0].kind, "post_comment");
        assert_eq!(outcome.reasoning, "ask first");
    }
}
