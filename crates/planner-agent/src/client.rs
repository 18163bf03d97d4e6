use async_trait::async_trait;
use std::time::Duration;

use crate::{PlanOutcome, PlannerAgentError, PlannerMessage, Result};

// ─── PlannerClient ────────────────────────────────────────────────────────

/// The opaque planning capability: an ordered conversation in, a batch of
/// actions plus reasoning out. Implementations must be safe to call
/// concurrently from independent workers.
#[async_trait]
pub trait PlannerClient: Send + Sync {
    async fn plan(&self, messages: &[PlannerMessage]) -> Result<PlanOutcome>;
}

// ─── HttpPlanner ──────────────────────────────────────────────────────────

/// Planner reached over HTTP: POSTs `{"messages": [...]}` to the configured
/// endpoint and expects a `PlanOutcome` JSON body back.
pub struct HttpPlanner {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPlanner {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(serde::Serialize)]
struct PlanRequest<'a> {
    messages: &'a [PlannerMessage],
}

#[async_trait]
impl PlannerClient for HttpPlanner {
    async fn plan(&self, messages: &[PlannerMessage]) -> Result<PlanOutcome> {
        tracing::debug!(endpoint = %self.endpoint, message_count = messages.len(), "calling planner");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&PlanRequest { messages })
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PlannerAgentError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let outcome: PlanOutcome =
            serde_json::from_str(&body).map_err(|source| PlannerAgentError::Parse { body, source })?;

        tracing::debug!(action_count = outcome.actions.len(), "planner responded");
        Ok(outcome)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
