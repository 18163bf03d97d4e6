//! Issue-tracker capability: posting comments back to the provider.
//!
//! Provider API clients are external collaborators; this module pins down
//! the contract the executor consumes and a registry selecting the
//! implementation per issue provider.

pub mod gitlab;

pub use gitlab::GitlabTracker;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{InquestError, Result};
use crate::model::Issue;
use crate::types::Provider;

#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Open a new discussion thread on the issue.
    async fn create_discussion(&self, issue: &Issue, content: &str) -> Result<()>;

    /// Reply into an existing discussion thread.
    async fn reply_to_thread(&self, issue: &Issue, discussion_id: &str, content: &str)
        -> Result<()>;
}

// ---------------------------------------------------------------------------
// TrackerRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TrackerRegistry {
    trackers: HashMap<Provider, Arc<dyn IssueTracker>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Provider, tracker: Arc<dyn IssueTracker>) {
        self.trackers.insert(provider, tracker);
    }

    /// The tracker for a provider; a missing registration is a fatal
    /// condition for the orchestrator.
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn IssueTracker>> {
        self.trackers
            .get(&provider)
            .cloned()
            .ok_or_else(|| InquestError::TrackerNotRegistered(provider.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
