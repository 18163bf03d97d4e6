//! Pre-execution validation of planner action batches.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{InquestError, Result};
use crate::model::Issue;
use crate::orchestrator::action::Action;
use crate::store::Store;

const MAX_COMMENT_LENGTH: usize = 65_000;

pub struct ActionValidator {
    store: Arc<Store>,
}

impl ActionValidator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Validate a full batch. Batch-level rules see the whole submission:
    /// `ready_for_spec_generation` passes when the open blocking gaps are
    /// closed anywhere in the same batch, regardless of action ordering,
    /// and numbered questions in comments must come with tracked gaps.
    pub fn validate(&self, issue: &Issue, actions: &[Action]) -> Result<()> {
        if actions.is_empty() {
            return Err(InquestError::Validation("no actions provided".into()));
        }

        let pending_closures: HashSet<u64> = actions
            .iter()
            .filter_map(|a| match a {
                Action::UpdateGaps(p) => Some(p.close.iter().map(|c| c.gap_id)),
                _ => None,
            })
            .flatten()
            .collect();

        for (i, action) in actions.iter().enumerate() {
            self.validate_one(issue, action, &pending_closures)
                .map_err(|e| {
                    InquestError::Validation(format!("action[{i}] {}: {e}", action.kind()))
                })?;
        }

        self.validate_gap_discipline(actions)
    }

    fn validate_one(
        &self,
        issue: &Issue,
        action: &Action,
        pending_closures: &HashSet<u64>,
    ) -> Result<()> {
        match action {
            Action::PostComment(p) => {
                if p.content.is_empty() {
                    return Err(InquestError::Validation("content too short".into()));
                }
                if p.content.len() > MAX_COMMENT_LENGTH {
                    return Err(InquestError::Validation("content too long".into()));
                }
            }
            Action::UpdateFindings(p) => {
                for (i, finding) in p.add.iter().enumerate() {
                    if finding.synthesis.is_empty() {
                        return Err(InquestError::Validation(format!(
                            "add[{i}]: finding missing synthesis"
                        )));
                    }
                    if finding.sources.is_empty() {
                        return Err(InquestError::Validation(format!(
                            "add[{i}]: finding missing sources"
                        )));
                    }
                    if finding.sources.iter().any(|s| s.location.is_empty()) {
                        return Err(InquestError::Validation(format!(
                            "add[{i}]: source missing location"
                        )));
                    }
                }
            }
            Action::UpdateGaps(p) => {
                for (i, gap) in p.add.iter().enumerate() {
                    if gap.question.is_empty() {
                        return Err(InquestError::Validation(format!(
                            "add[{i}]: gap missing question"
                        )));
                    }
                }
                for close in &p.close {
                    let gap = self.store.get_gap(close.gap_id)?;
                    if gap.issue_id != issue.id {
                        return Err(InquestError::Validation(format!(
                            "gap {} belongs to another issue",
                            close.gap_id
                        )));
                    }
                }
            }
            Action::ReadyForSpecGeneration(p) => {
                if p.context_summary.is_empty() {
                    return Err(InquestError::Validation("context summary is required".into()));
                }
                if p.proceed_signal.is_empty() {
                    return Err(InquestError::Validation("proceed signal not provided".into()));
                }
                // The gate: no open blocking gaps may survive this batch.
                let blocking = self
                    .store
                    .list_open_gaps(issue.id)?
                    .into_iter()
                    .filter(|g| g.severity == crate::model::GapSeverity::Blocking)
                    .filter(|g| !pending_closures.contains(&g.id))
                    .count();
                if blocking > 0 {
                    return Err(InquestError::Validation(format!(
                        "open blocking gaps exist: {blocking}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every explicit numbered question a comment asks must be tracked as a
    /// gap in the same batch.
    fn validate_gap_discipline(&self, actions: &[Action]) -> Result<()> {
        let mut question_count = 0;
        let mut gaps_added = 0;
        for action in actions {
            match action {
                Action::PostComment(p) => question_count += count_numbered_questions(&p.content),
                Action::UpdateGaps(p) => gaps_added += p.add.len(),
                _ => {}
            }
        }
        if question_count > 0 && gaps_added == 0 {
            return Err(InquestError::Validation(format!(
                "comment contains {question_count} numbered questions but no gaps were added"
            )));
        }
        Ok(())
    }
}

/// Count lines shaped like "1. ...?", "2) ...?" or "3: ...?".
fn count_numbered_questions(content: &str) -> usize {
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 || line.len() <= digits {
                return false;
            }
            matches!(line.as_bytes()[digits], b'.' | b')' | b':') && line.contains('?')
        })
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
