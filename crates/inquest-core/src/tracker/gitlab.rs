//! GitLab issue-tracker client: discussions on project issues.

use async_trait::async_trait;

use crate::error::{InquestError, Result};
use crate::model::Issue;
use crate::tracker::IssueTracker;

pub struct GitlabTracker {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GitlabTracker {
    /// `base_url` is the API root, e.g. `https://gitlab.example.com/api/v4`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn post(&self, url: String, body: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| InquestError::Tracker(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InquestError::Tracker(format!(
                "gitlab returned {status}: {text}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for GitlabTracker {
    async fn create_discussion(&self, issue: &Issue, content: &str) -> Result<()> {
        let url = format!(
            "{}/projects/{}/issues/{}/discussions",
            self.base_url, issue.external_project_id, issue.external_issue_id
        );
        self.post(url, serde_json::json!({ "body": content })).await?;
        tracing::info!(
            issue_id = issue.id,
            external_issue_id = %issue.external_issue_id,
            "created discussion"
        );
        Ok(())
    }

    async fn reply_to_thread(
        &self,
        issue: &Issue,
        discussion_id: &str,
        content: &str,
    ) -> Result<()> {
        let url = format!(
            "{}/projects/{}/issues/{}/discussions/{}/notes",
            self.base_url, issue.external_project_id, issue.external_issue_id, discussion_id
        );
        self.post(url, serde_json::json!({ "body": content })).await?;
        tracing::info!(
            issue_id = issue.id,
            discussion_id = %discussion_id,
            "replied to thread"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
